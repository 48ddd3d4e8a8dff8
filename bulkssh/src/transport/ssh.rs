//! In-process SSH transport using russh.
//!
//! Host keys are checked out of band according to the configured policy.
//! Password authentication is bridged into the byte stream: the session
//! starts by emitting a `Password: ` prompt, treats the next line written to
//! it as the password, and either opens the shell or prompts again. From the
//! engine's point of view this is indistinguishable from the ssh client.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use log::{debug, trace, warn};
use russh::client::{self, Handle, Msg};
use russh::keys::PublicKey;
use russh::{Channel, ChannelMsg};

use super::{Connector, Session};
use crate::config::{HostKeyVerification, TransportConfig};
use crate::error::{Result, TransportError};

const PASSWORD_PROMPT: &[u8] = b"Password: ";
const PASSWORD_REJECTED: &[u8] = b"\r\nPermission denied, please try again.\r\n";

/// Opens russh sessions.
#[derive(Debug, Clone)]
pub struct SshConnector {
    port: u16,
    timeout: Duration,
    terminal_width: u32,
    terminal_height: u32,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
}

impl SshConnector {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            port: config.port,
            timeout: config.connect_timeout(),
            terminal_width: u32::from(config.terminal_width),
            terminal_height: u32::from(config.terminal_height),
            host_key_verification: config.host_key_verification,
            known_hosts_path: config.known_hosts_path.clone(),
        }
    }
}

impl Connector for SshConnector {
    type Session = SshSession;

    async fn connect(&self, host: &str, username: &str) -> Result<SshSession> {
        let ssh_config = Arc::new(client::Config {
            inactivity_timeout: None,
            ..Default::default()
        });

        let host_key_error: Arc<Mutex<Option<TransportError>>> = Arc::new(Mutex::new(None));

        let handler = SshHandler {
            policy: self.host_key_verification,
            known_hosts: KnownHosts {
                host: host.to_string(),
                port: self.port,
                path: self.known_hosts_path.clone(),
            },
            host_key_error: host_key_error.clone(),
        };

        debug!("Connecting to {}:{}", host, self.port);
        let handle = tokio::time::timeout(
            self.timeout,
            client::connect(ssh_config, (host, self.port), handler),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.timeout))?
        .map_err(|e| {
            // Prefer the detailed host key error over russh's generic one.
            let detailed = host_key_error.lock().ok().and_then(|mut slot| slot.take());
            detailed.unwrap_or(TransportError::Ssh(e))
        })?;

        Ok(SshSession {
            handle,
            username: username.to_string(),
            phase: Phase::Login {
                prompted: false,
                line: Vec::new(),
            },
            pending: Vec::new(),
            terminal_width: self.terminal_width,
            terminal_height: self.terminal_height,
        })
    }
}

enum Phase {
    /// Waiting for the password line.
    Login { prompted: bool, line: Vec<u8> },
    /// Shell channel open.
    Shell(Channel<Msg>),
    /// Stream finished.
    Closed,
}

/// A russh connection plus its interactive shell channel.
pub struct SshSession {
    handle: Handle<SshHandler>,
    username: String,
    phase: Phase,
    /// Synthesised output not yet returned by `read_chunk`.
    pending: Vec<u8>,
    terminal_width: u32,
    terminal_height: u32,
}

impl SshSession {
    async fn try_password(&mut self, password: &str) -> Result<()> {
        let accepted = self
            .handle
            .authenticate_password(&self.username, password)
            .await
            .map_err(TransportError::Ssh)?
            .success();

        if !accepted {
            debug!("Password rejected for user '{}'", self.username);
            self.pending.extend_from_slice(PASSWORD_REJECTED);
            self.pending.extend_from_slice(PASSWORD_PROMPT);
            return Ok(());
        }

        let channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(TransportError::Ssh)?;
        channel
            .request_pty(
                true,
                "xterm",
                self.terminal_width,
                self.terminal_height,
                0,
                0,
                &[],
            )
            .await
            .map_err(TransportError::Ssh)?;
        channel
            .request_shell(true)
            .await
            .map_err(TransportError::Ssh)?;

        self.pending.extend_from_slice(b"\r\n");
        self.phase = Phase::Shell(channel);
        Ok(())
    }
}

impl Session for SshSession {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        match &mut self.phase {
            Phase::Login { line, .. } => {
                line.extend_from_slice(data);
                let Some(end) = memchr::memchr(b'\n', line) else {
                    return Ok(());
                };
                let password = String::from_utf8_lossy(&line[..end])
                    .trim_end_matches('\r')
                    .to_string();
                line.clear();
                self.try_password(&password).await
            }
            Phase::Shell(channel) => {
                channel.data(data).await.map_err(TransportError::Ssh)?;
                Ok(())
            }
            Phase::Closed => Err(TransportError::Closed.into()),
        }
    }

    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        if !self.pending.is_empty() {
            return Ok(Some(Bytes::from(std::mem::take(&mut self.pending))));
        }

        match &mut self.phase {
            Phase::Login { prompted, .. } => {
                if !*prompted {
                    *prompted = true;
                    return Ok(Some(Bytes::from_static(PASSWORD_PROMPT)));
                }
                // Nothing more until a password line arrives.
                std::future::pending::<()>().await;
                Ok(None)
            }
            Phase::Shell(channel) => loop {
                match channel.wait().await {
                    Some(ChannelMsg::Data { ref data }) => {
                        return Ok(Some(Bytes::copy_from_slice(data)));
                    }
                    Some(ChannelMsg::ExtendedData { ref data, .. }) => {
                        return Ok(Some(Bytes::copy_from_slice(data)));
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        trace!("remote shell exited with status {}", exit_status);
                    }
                    Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                        self.phase = Phase::Closed;
                        return Ok(None);
                    }
                    Some(_) => {}
                }
            },
            Phase::Closed => Ok(None),
        }
    }

    fn is_alive(&self) -> bool {
        !matches!(self.phase, Phase::Closed) && !self.handle.is_closed()
    }

    async fn close(&mut self) -> Result<()> {
        if let Phase::Shell(channel) = std::mem::replace(&mut self.phase, Phase::Closed) {
            let _ = channel.eof().await;
        }
        self.handle
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
            .map_err(TransportError::Ssh)?;
        Ok(())
    }
}

/// A host's entries in a known_hosts file.
struct KnownHosts {
    host: String,
    port: u16,
    /// `~/.ssh/known_hosts` when unset.
    path: Option<PathBuf>,
}

impl KnownHosts {
    /// `Ok(true)` if `key` is recorded for this host, `Ok(false)` if the
    /// host has no entry.
    fn contains(&self, key: &PublicKey) -> std::result::Result<bool, TransportError> {
        let found = match &self.path {
            Some(path) => russh::keys::check_known_hosts_path(&self.host, self.port, key, path),
            None => russh::keys::check_known_hosts(&self.host, self.port, key),
        };
        found.map_err(|e| match e {
            russh::keys::Error::KeyChanged { line } => TransportError::HostKeyChanged {
                host: self.host.clone(),
                port: self.port,
                line,
            },
            other => TransportError::KnownHosts(other.to_string()),
        })
    }

    fn record(&self, key: &PublicKey) -> std::result::Result<(), TransportError> {
        use russh::keys::known_hosts::{learn_known_hosts, learn_known_hosts_path};

        match &self.path {
            Some(path) => learn_known_hosts_path(&self.host, self.port, key, path),
            None => learn_known_hosts(&self.host, self.port, key),
        }
        .map_err(|e| TransportError::KnownHosts(e.to_string()))
    }
}

struct SshHandler {
    policy: HostKeyVerification,
    known_hosts: KnownHosts,
    /// Why the key was refused; russh itself only reports `UnknownKey`.
    host_key_error: Arc<Mutex<Option<TransportError>>>,
}

impl SshHandler {
    /// Apply the host key policy to `key`.
    fn verify(&self, key: &PublicKey) -> std::result::Result<(), TransportError> {
        if self.policy == HostKeyVerification::Disabled || self.known_hosts.contains(key)? {
            return Ok(());
        }

        let KnownHosts { host, port, .. } = &self.known_hosts;
        if self.policy == HostKeyVerification::Strict {
            return Err(TransportError::HostKeyUnknown {
                host: host.clone(),
                port: *port,
            });
        }

        debug!("Learning host key for {}:{}", host, port);
        if let Err(e) = self.known_hosts.record(key) {
            warn!("Failed to save host key: {}", e);
        }
        Ok(())
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let Err(e) = self.verify(server_public_key) else {
            return Ok(true);
        };
        if let Ok(mut slot) = self.host_key_error.lock() {
            *slot = Some(e);
        }
        Ok(false)
    }
}
