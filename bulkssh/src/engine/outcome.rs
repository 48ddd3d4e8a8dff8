//! Engine states and per-device results.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::error::{ChannelError, Error, TransportError};

/// Non-terminal states of a device run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Connecting,
    Authenticating,
    Ready,
    /// Running the command at this zero-based position.
    Executing { command: usize },
    Closing,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Connecting => write!(f, "connecting"),
            EngineState::Authenticating => write!(f, "authenticating"),
            EngineState::Ready => write!(f, "disabling pagination"),
            EngineState::Executing { command } => write!(f, "executing command {}", command + 1),
            EngineState::Closing => write!(f, "closing"),
        }
    }
}

/// Why a device run failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureReason {
    /// The session could not be established.
    Connect { message: String },
    /// The password was rejected.
    Authentication,
    /// No expected pattern arrived within the idle timeout.
    Timeout { state: EngineState, after: Duration },
    /// The stream ended where it should not have.
    Protocol { message: String },
    /// A sink failed while output was being written.
    Sink { message: String },
    /// Anything else.
    Other { message: String },
}

impl FailureReason {
    /// Classify an error raised while the engine was in `state`.
    pub fn from_error(error: Error, state: EngineState) -> Self {
        match error {
            Error::Channel(ChannelError::PatternTimeout(after)) => {
                FailureReason::Timeout { state, after }
            }
            Error::Channel(ChannelError::Sink(e)) => FailureReason::Sink {
                message: e.to_string(),
            },
            Error::Transport(TransportError::Closed) => FailureReason::Protocol {
                message: format!("session closed while {}", state),
            },
            Error::Transport(e) if state == EngineState::Connecting => FailureReason::Connect {
                message: e.to_string(),
            },
            other => FailureReason::Other {
                message: other.to_string(),
            },
        }
    }

    /// Whether the session may still accept an exit command.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            FailureReason::Timeout { .. } | FailureReason::Sink { .. } | FailureReason::Other { .. }
        )
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Connect { message } => write!(f, "connect failed: {}", message),
            FailureReason::Authentication => write!(f, "password is incorrect"),
            FailureReason::Timeout { state, after } => {
                write!(f, "timed out after {:?} while {}", after, state)
            }
            FailureReason::Protocol { message } => write!(f, "protocol failure: {}", message),
            FailureReason::Sink { message } => write!(f, "output failure: {}", message),
            FailureReason::Other { message } => write!(f, "{}", message),
        }
    }
}

/// Terminal state of a device run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Failed { reason: FailureReason },
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Completed)
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            Outcome::Completed => None,
            Outcome::Failed { reason } => Some(reason),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Completed => write!(f, "completed"),
            Outcome::Failed { reason } => write!(f, "failed: {}", reason),
        }
    }
}

/// Result of one device run.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceReport {
    /// Host as given.
    pub host: String,

    /// Upper-cased host name.
    pub device: String,

    pub outcome: Outcome,

    /// Commands whose prompt was seen.
    pub commands_completed: usize,

    /// Empty lines sent in answer to confirmation prompts.
    pub confirmations: usize,

    pub elapsed: Duration,
}

impl DeviceReport {
    pub fn is_success(&self) -> bool {
        self.outcome.is_success()
    }
}
