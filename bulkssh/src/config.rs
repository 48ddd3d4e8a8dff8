//! Run configuration.
//!
//! Every field has a default so an empty TOML file (or no file at all) gives
//! the behaviour of the plain command line tool. CLI flags are applied on top
//! of whatever [`RunConfig::load`] returns.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Top-level configuration for one bulk run.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunConfig {
    /// Number of devices processed concurrently.
    pub threads: usize,

    /// Suppress the console sink.
    pub hide_output: bool,

    /// Per-device output file, with `%h`, `%d` and `%t` tokens.
    pub output_file_template: Option<String>,

    /// Session automation settings.
    pub engine: EngineConfig,

    /// How sessions are established.
    pub transport: TransportConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            hide_output: false,
            output_file_template: None,
            engine: EngineConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl RunConfig {
    /// Load a config file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.threads == 0 {
            return Err(invalid("threads must be at least 1"));
        }
        if self.engine.idle_timeout_secs == 0 {
            return Err(invalid("idle_timeout_secs must be at least 1"));
        }
        if self.engine.search_depth == 0 {
            return Err(invalid("search_depth must be at least 1"));
        }
        if self.transport.ssh_program.trim().is_empty() {
            return Err(invalid("ssh_program must not be empty"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> crate::error::Error {
    ConfigError::Invalid {
        message: message.to_string(),
    }
    .into()
}

/// Settings for the per-device state machine.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Idle timeout applied to every individual wait.
    pub idle_timeout_secs: u64,

    /// Sent once after login so output is never paged.
    pub pagination_command: String,

    /// Sent after the last command.
    pub exit_command: String,

    /// Hold back output until the first prompt after login.
    pub start_at_prompt: bool,

    /// Bytes of unconsumed output kept for pattern matching.
    pub search_depth: usize,

    /// Patterns recognised in the session output.
    pub patterns: PatternConfig,
}

impl EngineConfig {
    /// The idle timeout as a [`Duration`].
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: 600,
            pagination_command: "terminal length 0".to_string(),
            exit_command: "exit".to_string(),
            start_at_prompt: false,
            search_depth: 1000,
            patterns: PatternConfig::default(),
        }
    }
}

/// Regex sources for the interactive idioms of a device shell.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PatternConfig {
    /// Password prompt.
    pub password: String,

    /// First-contact host key question.
    pub host_key: String,

    /// Command prompt.
    pub prompt: String,

    /// Inline confirmation request.
    pub confirm: String,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            password: r"[Pp]assword:\s*$".to_string(),
            host_key: r"\(yes/no(/\[fingerprint\])?\)".to_string(),
            prompt: r"(?m)^[^\r\n]+#[ \t]*$".to_string(),
            confirm: r"\[confirm\]".to_string(),
        }
    }
}

/// Which session implementation to use.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Spawn the system ssh client inside a pty.
    #[default]
    Process,

    /// In-process SSH client.
    Native,
}

/// Host key verification mode, analogous to OpenSSH's `StrictHostKeyChecking`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyVerification {
    /// Reject unknown and changed keys.
    Strict,

    /// Accept and learn unknown keys, reject changed keys.
    #[default]
    AcceptNew,

    /// Accept all keys without checking. For lab use only.
    Disabled,
}

/// Session transport settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransportConfig {
    pub kind: TransportKind,

    /// ssh client binary for the process transport.
    pub ssh_program: String,

    /// Extra arguments passed to the ssh client before the destination.
    pub ssh_args: Vec<String>,

    /// SSH port. Only passed to the ssh client when not 22.
    pub port: u16,

    pub terminal_width: u16,
    pub terminal_height: u16,

    /// Native transport only.
    pub host_key_verification: HostKeyVerification,

    /// Native transport only; defaults to `~/.ssh/known_hosts`.
    pub known_hosts_path: Option<PathBuf>,

    /// Native transport only.
    pub connect_timeout_secs: u64,
}

impl TransportConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::Process,
            ssh_program: "ssh".to_string(),
            ssh_args: Vec::new(),
            port: 22,
            terminal_width: 511,
            terminal_height: 24,
            host_key_verification: HostKeyVerification::AcceptNew,
            known_hosts_path: None,
            connect_timeout_secs: 30,
        }
    }
}
