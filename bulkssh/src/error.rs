//! Error types for bulkssh.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Main error type for bulkssh operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Session transport errors (spawning, connecting, writing).
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Pattern matching and output errors on a live session.
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Invalid configuration or unusable inputs.
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Transport layer errors (process spawn, SSH connection).
#[derive(Error, Debug)]
pub enum TransportError {
    /// The local ssh client process could not be started.
    #[error("Failed to spawn '{program}': {message}")]
    SpawnFailed { program: String, message: String },

    /// Failed to reach the host.
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Host key is not in known_hosts and strict checking is on.
    #[error("Host key for {host}:{port} is not known")]
    HostKeyUnknown { host: String, port: u16 },

    /// Host key differs from the known_hosts entry.
    #[error("Host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// known_hosts could not be read or written.
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// Session already terminated.
    #[error("Session closed")]
    Closed,

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Channel layer errors (pattern matching, output fan-out).
#[derive(Error, Debug)]
pub enum ChannelError {
    /// No expected pattern arrived within the idle window.
    #[error("Pattern not found within {0:?}")]
    PatternTimeout(Duration),

    /// A sink rejected a write.
    #[error("Output sink write failed: {0}")]
    Sink(#[source] io::Error),

    /// Invalid regex pattern
    #[error("Invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Configuration and input collection errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A configuration value is out of range.
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    /// Config file could not be read.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Config file is not valid TOML for [`RunConfig`](crate::config::RunConfig).
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// No commands left after filtering blank entries.
    #[error("No commands to run")]
    NoCommands,

    /// No devices given.
    #[error("No devices to process")]
    NoDevices,
}

/// Result type alias using bulkssh's Error.
pub type Result<T> = std::result::Result<T, Error>;
