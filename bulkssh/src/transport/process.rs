//! The system ssh client, spawned inside a pseudo-terminal.
//!
//! The client owns authentication and host key handling, and asks for both
//! on the terminal, so the password and `(yes/no)` questions appear in the
//! output stream exactly as an operator would see them.

use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use log::{debug, trace, warn};
use portable_pty::{Child, ChildKiller, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tokio::sync::mpsc;

use super::{Connector, Session};
use crate::config::TransportConfig;
use crate::error::{Result, TransportError};

/// How long `close` lets the client exit on its own before killing it.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Spawns one ssh client per device.
#[derive(Debug, Clone)]
pub struct ProcessConnector {
    program: String,
    args: Vec<String>,
    port: u16,
    cols: u16,
    rows: u16,
}

impl ProcessConnector {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            program: config.ssh_program.clone(),
            args: config.ssh_args.clone(),
            port: config.port,
            cols: config.terminal_width,
            rows: config.terminal_height,
        }
    }

    /// Arguments for the client, after the program name.
    pub fn arguments(&self, host: &str, username: &str) -> Vec<String> {
        let mut argv = self.args.clone();
        if self.port != 22 {
            argv.push("-p".to_string());
            argv.push(self.port.to_string());
        }
        argv.push(format!("{}@{}", username, host));
        argv
    }
}

impl Connector for ProcessConnector {
    type Session = PtySession;

    async fn connect(&self, host: &str, username: &str) -> Result<PtySession> {
        let program = self.program.clone();
        let argv = self.arguments(host, username);
        let size = PtySize {
            rows: self.rows,
            cols: self.cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        debug!("Spawning {} {}", program, argv.join(" "));

        tokio::task::spawn_blocking(move || PtySession::spawn(&program, &argv, size))
            .await
            .map_err(|e| TransportError::SpawnFailed {
                program: self.program.clone(),
                message: e.to_string(),
            })?
    }
}

/// A child process attached to a pty.
pub struct PtySession {
    /// Kept so the pty stays open.
    _master: Box<dyn MasterPty + Send>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    child: Option<Box<dyn Child + Send + Sync>>,
    output: mpsc::Receiver<Bytes>,
    eof: bool,
}

impl PtySession {
    /// Start `program` with `argv` and begin pumping its output.
    pub fn spawn(program: &str, argv: &[String], size: PtySize) -> Result<Self> {
        let spawn_failed = |message: String| TransportError::SpawnFailed {
            program: program.to_string(),
            message,
        };

        let pair = native_pty_system()
            .openpty(size)
            .map_err(|e| spawn_failed(format!("failed to open pty: {e}")))?;

        let mut cmd = CommandBuilder::new(program);
        for arg in argv {
            cmd.arg(arg);
        }
        cmd.env("TERM", "xterm");

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| spawn_failed(e.to_string()))?;
        // Only the child may hold the slave side, or EOF never arrives.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| spawn_failed(format!("failed to clone pty reader: {e}")))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| spawn_failed(format!("failed to take pty writer: {e}")))?;

        let (tx, rx) = mpsc::channel(64);
        std::thread::Builder::new()
            .name("pty-reader".to_string())
            .spawn(move || pump(reader, tx))
            .map_err(TransportError::Io)?;

        Ok(Self {
            _master: pair.master,
            writer: Arc::new(Mutex::new(writer)),
            child: Some(child),
            output: rx,
            eof: false,
        })
    }
}

/// Blocking read loop; ends when the pty reports EOF or an error (EIO once
/// the child has exited) or the session is dropped.
fn pump(mut reader: Box<dyn Read + Send>, tx: mpsc::Sender<Bytes>) {
    let mut buf = [0u8; 4096];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => {
                if tx.blocking_send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                trace!("pty read ended: {}", e);
                break;
            }
        }
    }
}

impl Session for PtySession {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if self.eof {
            return Err(TransportError::Closed.into());
        }
        let writer = Arc::clone(&self.writer);
        let data = data.to_vec();
        tokio::task::spawn_blocking(move || -> io::Result<()> {
            let mut writer = writer
                .lock()
                .map_err(|_| io::Error::other("pty writer lock poisoned"))?;
            writer.write_all(&data)?;
            writer.flush()
        })
        .await
        .map_err(io::Error::other)
        .and_then(|r| r)
        .map_err(TransportError::Io)?;
        Ok(())
    }

    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        if self.eof {
            return Ok(None);
        }
        let chunk = self.output.recv().await;
        if chunk.is_none() {
            self.eof = true;
        }
        Ok(chunk)
    }

    fn is_alive(&self) -> bool {
        !self.eof
    }

    async fn close(&mut self) -> Result<()> {
        self.eof = true;
        self.output.close();
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        let status = tokio::task::spawn_blocking(move || {
            let start = Instant::now();
            while start.elapsed() < CLOSE_GRACE {
                if let Ok(Some(status)) = child.try_wait() {
                    return Ok(status);
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            child.kill()?;
            child.wait()
        })
        .await
        .map_err(io::Error::other)
        .and_then(|r| r)
        .map_err(TransportError::Io)?;

        trace!("ssh client exited with code {}", status.exit_code());
        Ok(())
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Ok(None) = child.try_wait() {
                warn!("ssh client still running when its session was dropped, killing it");
                let _ = child.kill();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arguments_default_port() {
        let connector = ProcessConnector::new(&TransportConfig::default());
        assert_eq!(connector.arguments("r1", "admin"), vec!["admin@r1"]);
    }

    #[test]
    fn test_arguments_with_options_and_port() {
        let config = TransportConfig {
            ssh_args: vec!["-o".into(), "ConnectTimeout=10".into()],
            port: 2222,
            ..Default::default()
        };
        let connector = ProcessConnector::new(&config);
        assert_eq!(
            connector.arguments("10.0.0.1", "ops"),
            vec!["-o", "ConnectTimeout=10", "-p", "2222", "ops@10.0.0.1"]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawned_process_output_and_eof() {
        let size = PtySize {
            rows: 24,
            cols: 80,
            pixel_width: 0,
            pixel_height: 0,
        };
        let mut session =
            PtySession::spawn("/bin/sh", &["-c".to_string(), "echo ready".to_string()], size)
                .unwrap();

        let mut output = Vec::new();
        while let Some(chunk) = session.read_chunk().await.unwrap() {
            output.extend_from_slice(&chunk);
        }
        assert!(String::from_utf8_lossy(&output).contains("ready"));
        assert!(!session.is_alive());
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let connector = ProcessConnector::new(&TransportConfig {
            ssh_program: "/nonexistent/ssh-client".to_string(),
            ..Default::default()
        });
        assert!(connector.connect("r1", "admin").await.is_err());
    }
}
