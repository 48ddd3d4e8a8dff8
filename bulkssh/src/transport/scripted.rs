//! Scripted device sessions.
//!
//! A script is a list of [`Step`]s played back in order: output is emitted,
//! expected input lines are waited for, and the stream can stall or close.
//! Every line sent by the client is recorded so callers can check exactly
//! what was typed. Used for tests and dry runs without real devices.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;

use super::{Connector, Session};
use crate::error::{Result, TransportError};

/// One step of a device script.
#[derive(Debug, Clone)]
pub enum Step {
    /// Produce output.
    Emit(Bytes),
    /// Wait until the client sends this line (without line terminator).
    Expect(String),
    /// Pause before continuing.
    Delay(Duration),
    /// Go silent, keeping the stream open.
    Stall,
    /// Close the stream.
    Close,
}

impl Step {
    pub fn emit(text: impl AsRef<[u8]>) -> Self {
        Step::Emit(Bytes::copy_from_slice(text.as_ref()))
    }

    pub fn expect(line: impl Into<String>) -> Self {
        Step::Expect(line.into())
    }
}

/// Script of a device that asks for a password, accepts `password`, runs
/// every `(command, output)` pair and closes on `exit`.
pub fn ios_device(hostname: &str, password: &str, commands: &[(&str, &str)]) -> Vec<Step> {
    let prompt = format!("{}#", hostname);
    let mut steps = vec![
        Step::emit("Password: "),
        Step::expect(password),
        Step::emit(format!("\r\n{}", prompt)),
        Step::expect("terminal length 0"),
        Step::emit(format!("terminal length 0\r\n{}", prompt)),
    ];
    for (command, output) in commands {
        steps.push(Step::expect(*command));
        steps.push(Step::emit(format!("{}\r\n{}\r\n{}", command, output, prompt)));
    }
    steps.push(Step::expect("exit"));
    steps.push(Step::Close);
    steps
}

/// Lines sent to a scripted session, shared with whoever created it.
#[derive(Debug, Default, Clone)]
pub struct Transcript {
    lines: Arc<Mutex<Vec<String>>>,
}

impl Transcript {
    /// All complete lines sent so far.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn push(&self, line: String) {
        if let Ok(mut lines) = self.lines.lock() {
            lines.push(line);
        }
    }
}

/// Counts live sessions and remembers the peak.
#[derive(Debug, Default)]
struct Occupancy {
    active: AtomicUsize,
    peak: AtomicUsize,
}

struct OccupancyGuard(Arc<Occupancy>);

impl OccupancyGuard {
    fn enter(occupancy: Arc<Occupancy>) -> Self {
        let now = occupancy.active.fetch_add(1, Ordering::SeqCst) + 1;
        occupancy.peak.fetch_max(now, Ordering::SeqCst);
        Self(occupancy)
    }
}

impl Drop for OccupancyGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A session that plays back a script.
pub struct ScriptedSession {
    steps: VecDeque<Step>,
    pending_input: VecDeque<String>,
    partial: Vec<u8>,
    transcript: Transcript,
    closed: bool,
    _occupancy: Option<OccupancyGuard>,
}

impl ScriptedSession {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps: steps.into(),
            pending_input: VecDeque::new(),
            partial: Vec::new(),
            transcript: Transcript::default(),
            closed: false,
            _occupancy: None,
        }
    }

    /// Handle to the lines this session receives.
    pub fn transcript(&self) -> Transcript {
        self.transcript.clone()
    }
}

impl Session for ScriptedSession {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        if self.closed {
            return Err(TransportError::Closed.into());
        }
        self.partial.extend_from_slice(data);
        while let Some(pos) = memchr::memchr(b'\n', &self.partial) {
            let raw: Vec<u8> = self.partial.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw)
                .trim_end_matches(['\r', '\n'])
                .to_string();
            self.transcript.push(line.clone());
            self.pending_input.push_back(line);
        }
        Ok(())
    }

    async fn read_chunk(&mut self) -> Result<Option<Bytes>> {
        loop {
            let Some(step) = self.steps.front() else {
                self.closed = true;
                return Ok(None);
            };

            match step {
                Step::Emit(data) => {
                    let data = data.clone();
                    self.steps.pop_front();
                    return Ok(Some(data));
                }
                Step::Expect(expected) => {
                    // Unexpected lines are dropped, like a shell that ignores them.
                    let expected = expected.clone();
                    match self.pending_input.pop_front() {
                        Some(line) if line == expected => {
                            self.steps.pop_front();
                        }
                        Some(_) => {}
                        None => std::future::pending::<()>().await,
                    }
                }
                Step::Delay(delay) => {
                    let delay = *delay;
                    tokio::time::sleep(delay).await;
                    self.steps.pop_front();
                }
                Step::Stall => std::future::pending::<()>().await,
                Step::Close => {
                    self.closed = true;
                    return Ok(None);
                }
            }
        }
    }

    fn is_alive(&self) -> bool {
        !self.closed
    }

    async fn close(&mut self) -> Result<()> {
        self.closed = true;
        self.steps.clear();
        Ok(())
    }
}

/// Hands out scripted sessions by host name.
#[derive(Default)]
pub struct ScriptedConnector {
    scripts: Mutex<HashMap<String, Vec<Step>>>,
    transcripts: Mutex<HashMap<String, Transcript>>,
    usernames: Mutex<HashMap<String, String>>,
    occupancy: Arc<Occupancy>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the script for `host`. Hosts without a script refuse
    /// connections.
    pub fn device(self, host: impl Into<String>, steps: Vec<Step>) -> Self {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.insert(host.into(), steps);
        }
        self
    }

    /// Lines sent to `host`, empty if it never connected.
    pub fn transcript(&self, host: &str) -> Vec<String> {
        self.transcripts
            .lock()
            .ok()
            .and_then(|t| t.get(host).map(Transcript::lines))
            .unwrap_or_default()
    }

    /// Username used to connect to `host`.
    pub fn username(&self, host: &str) -> Option<String> {
        self.usernames.lock().ok()?.get(host).cloned()
    }

    /// Highest number of sessions alive at the same time.
    pub fn peak_concurrency(&self) -> usize {
        self.occupancy.peak.load(Ordering::SeqCst)
    }

    /// Sessions currently alive.
    pub fn active(&self) -> usize {
        self.occupancy.active.load(Ordering::SeqCst)
    }
}

impl Connector for ScriptedConnector {
    type Session = ScriptedSession;

    async fn connect(&self, host: &str, username: &str) -> Result<ScriptedSession> {
        let steps = self
            .scripts
            .lock()
            .ok()
            .and_then(|mut scripts| scripts.remove(host));

        let Some(steps) = steps else {
            return Err(TransportError::ConnectionFailed {
                host: host.to_string(),
                port: 22,
                source: std::io::Error::new(
                    std::io::ErrorKind::ConnectionRefused,
                    "no script for host",
                ),
            }
            .into());
        };

        let mut session = ScriptedSession::new(steps);
        session._occupancy = Some(OccupancyGuard::enter(Arc::clone(&self.occupancy)));
        if let Ok(mut transcripts) = self.transcripts.lock() {
            transcripts.insert(host.to_string(), session.transcript());
        }
        if let Ok(mut usernames) = self.usernames.lock() {
            usernames.insert(host.to_string(), username.to_string());
        }
        Ok(session)
    }
}
