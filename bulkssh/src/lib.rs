//! # bulkssh
//!
//! Run the same list of commands on many network devices over interactive
//! SSH shells.
//!
//! Each device gets its own session automation engine: it answers the
//! first-contact host key question, logs in with a password, turns paging
//! off, sends every command (answering inline `[confirm]` prompts) and
//! exits. Everything the device prints is streamed to the console and/or a
//! per-device log file as it arrives. A bounded pool of workers processes
//! the devices concurrently and collects a report per device.
//!
//! ## Features
//!
//! - Pattern-driven login and command state machine (pexpect style)
//! - Sessions over the system `ssh` client in a pty, or in-process via russh
//! - Output fan-out to any number of sinks
//! - Per-device outcome reporting, serialisable as JSON
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bulkssh::{Credential, Orchestrator, ProcessConnector, RunConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), bulkssh::Error> {
//!     let config = RunConfig {
//!         threads: 4,
//!         ..Default::default()
//!     };
//!     let connector = ProcessConnector::new(&config.transport);
//!
//!     let orchestrator = Orchestrator::new(
//!         vec!["r1".to_string(), "r2".to_string()],
//!         Credential::new("admin", "secret"),
//!         vec!["show version".to_string()],
//!         config,
//!         connector,
//!     )?;
//!
//!     let summary = orchestrator.start().await;
//!     println!("{} ok, {} failed", summary.succeeded, summary.failed);
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod config;
pub mod credential;
pub mod engine;
pub mod error;
pub mod inventory;
pub mod orchestrator;
pub mod output;
pub mod transport;

// Re-export main types for convenience
pub use config::{EngineConfig, RunConfig, TransportConfig, TransportKind};
pub use credential::Credential;
pub use engine::{DeviceContext, DeviceReport, FailureReason, Outcome, SessionEngine};
pub use error::{Error, Result};
pub use orchestrator::{Orchestrator, RunSummary};
pub use output::{OutputMultiplexer, Sink, SinkId};
pub use transport::{Connector, ProcessConnector, ScriptedConnector, Session, SshConnector};
