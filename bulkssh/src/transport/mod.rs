//! Session transports.
//!
//! A [`Session`] is a live interactive shell: bytes go in through
//! [`Session::send`], output comes back through [`Session::read_chunk`].
//! Everything above this module sees only these two traits, so the engine
//! runs unchanged over a spawned `ssh` client, the in-process client or a
//! scripted device.

mod process;
pub mod scripted;
mod ssh;

pub use process::{ProcessConnector, PtySession};
pub use scripted::{ScriptedConnector, ScriptedSession, Step};
pub use ssh::{SshConnector, SshSession};

use std::future::Future;

use bytes::Bytes;

use crate::error::Result;

/// A live interactive shell session to one device.
pub trait Session: Send {
    /// Write raw bytes to the session input.
    fn send(&mut self, data: &[u8]) -> impl Future<Output = Result<()>> + Send;

    /// Wait for the next chunk of output.
    ///
    /// Returns `Ok(None)` once the peer has closed the stream. Must be
    /// cancel-safe: dropping the future before it completes loses no data.
    fn read_chunk(&mut self) -> impl Future<Output = Result<Option<Bytes>>> + Send;

    /// Whether the stream is still open.
    fn is_alive(&self) -> bool;

    /// Release the session and everything behind it.
    fn close(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Factory for sessions, shared by all workers.
pub trait Connector: Send + Sync + 'static {
    type Session: Session + 'static;

    /// Start a session to `host` logging in as `username`.
    fn connect(
        &self,
        host: &str,
        username: &str,
    ) -> impl Future<Output = Result<Self::Session>> + Send;
}
