//! Output filename templates.
//!
//! Tokens: `%h` device name (upper case), `%d` date as `YYYY-MM-DD`,
//! `%t` time as `HH.MM.SS`.

use std::path::PathBuf;

use chrono::{Local, NaiveDateTime};

use crate::inventory::expand_home;

/// Substitute the template tokens for `device` at time `now`.
pub fn render_template(template: &str, device: &str, now: NaiveDateTime) -> String {
    template
        .replace("%h", &device.to_uppercase())
        .replace("%d", &now.format("%Y-%m-%d").to_string())
        .replace("%t", &now.format("%H.%M.%S").to_string())
}

/// Build the output path for `device` using the local clock.
pub fn expand_template(template: &str, device: &str) -> PathBuf {
    let expanded = expand_home(template);
    let rendered = render_template(
        &expanded.to_string_lossy(),
        device,
        Local::now().naive_local(),
    );
    PathBuf::from(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(9, 5, 2)
            .unwrap()
    }

    #[test]
    fn test_all_tokens() {
        let name = render_template("/var/log/%h_%d_%t.txt", "core-sw1", at());
        assert_eq!(name, "/var/log/CORE-SW1_2024-03-07_09.05.02.txt");
    }

    #[test]
    fn test_repeated_and_missing_tokens() {
        assert_eq!(render_template("%h/%h.log", "r1", at()), "R1/R1.log");
        assert_eq!(render_template("static.log", "r1", at()), "static.log");
    }

    #[test]
    fn test_expand_uses_device_name() {
        let path = expand_template("/tmp/%h.log", "edge1");
        assert_eq!(path, PathBuf::from("/tmp/EDGE1.log"));
    }
}
