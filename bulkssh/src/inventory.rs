//! Device and command list collection.
//!
//! Hosts come from the command line, either directly or from files holding
//! one hostname per line. Commands come from a `;` separated string, a file
//! or stdin.

use std::io::BufRead;
use std::path::PathBuf;

use indexmap::IndexSet;
use log::debug;

use crate::error::{ConfigError, Result};

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Turn host arguments into a de-duplicated device list.
///
/// An argument naming an existing file contributes every non-blank line of
/// that file; anything else is a hostname. First-seen order is kept.
pub fn collect_devices<I, S>(args: I) -> Result<IndexSet<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut devices = IndexSet::new();

    for arg in args {
        let path = expand_home(arg.as_ref());
        if path.is_file() {
            let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            let before = devices.len();
            devices.extend(
                text.lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .map(str::to_string),
            );
            debug!(
                "Found {} new hosts in file \"{}\"",
                devices.len() - before,
                path.display()
            );
        } else {
            let host = arg.as_ref().trim();
            if !host.is_empty() {
                debug!("Using \"{}\" as hostname", host);
                devices.insert(host.to_string());
            }
        }
    }

    if devices.is_empty() {
        return Err(ConfigError::NoDevices.into());
    }
    Ok(devices)
}

/// Split `-c` style input on `;`.
pub fn split_commands(input: &str) -> Vec<String> {
    clean_commands(input.split(';'))
}

/// Read commands one per line.
pub fn read_commands<R: BufRead>(reader: R) -> Result<Vec<String>> {
    let lines = reader
        .lines()
        .collect::<std::io::Result<Vec<_>>>()
        .map_err(|source| ConfigError::Read {
            path: PathBuf::from("<input>"),
            source,
        })?;
    Ok(clean_commands(lines.iter().map(String::as_str)))
}

/// Trim every entry and drop the blank ones.
pub fn clean_commands<'a, I>(raw: I) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    raw.into_iter()
        .map(str::trim)
        .filter(|cmd| !cmd.is_empty())
        .map(str::to_string)
        .collect()
}
