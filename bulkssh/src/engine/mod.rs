//! Session automation engine.
//!
//! One [`SessionEngine`] drives one device through
//! `Connecting -> Authenticating -> Ready -> Executing -> Closing` and ends
//! in a terminal [`Outcome`]. Every wait races the patterns valid for the
//! current state against end-of-stream and the idle timeout; the engine
//! never retries.

mod context;
mod outcome;
mod patterns;

pub use context::DeviceContext;
pub use outcome::{DeviceReport, EngineState, FailureReason, Outcome};
pub use patterns::SessionPatterns;

use std::sync::Arc;

use log::{debug, error, info, warn};

use crate::channel::{ExpectChannel, Expectation, PatternSet};
use crate::config::EngineConfig;
use crate::credential::Credential;
use crate::error::Result;
use crate::output::OutputMultiplexer;
use crate::transport::{Connector, Session};

/// Result of the login exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStatus {
    /// A command prompt followed the password.
    Accepted,
    /// The password prompt came back.
    Rejected,
    /// The stream ended during login.
    Closed {
        after_password: bool,
        message: String,
    },
}

/// Counters kept while a run progresses.
#[derive(Debug, Default)]
struct Progress {
    ready: bool,
    commands_completed: usize,
    confirmations: usize,
}

/// Drives a single device session from connect to close.
pub struct SessionEngine {
    ctx: DeviceContext,
    credential: Arc<Credential>,
    commands: Arc<[String]>,
    config: Arc<EngineConfig>,
    patterns: Arc<SessionPatterns>,
}

impl SessionEngine {
    pub fn new(
        ctx: DeviceContext,
        credential: Arc<Credential>,
        commands: Arc<[String]>,
        config: Arc<EngineConfig>,
        patterns: Arc<SessionPatterns>,
    ) -> Self {
        Self {
            ctx,
            credential,
            commands,
            config,
            patterns,
        }
    }

    pub fn context(&self) -> &DeviceContext {
        &self.ctx
    }

    /// Run the full state machine, writing every byte read to `output`.
    ///
    /// Never fails: whatever happens ends up in the returned report. The
    /// session is released before this returns.
    pub async fn run<C: Connector>(
        &self,
        connector: &C,
        output: &mut OutputMultiplexer,
    ) -> DeviceReport {
        let mut progress = Progress::default();

        info!("{} Connecting", self.ctx);
        let session = match connector
            .connect(self.ctx.host(), self.credential.username())
            .await
        {
            Ok(session) => session,
            Err(e) => {
                let reason = FailureReason::from_error(e, EngineState::Connecting);
                error!("{} {}", self.ctx, reason);
                return self.report(Outcome::Failed { reason }, &progress);
            }
        };

        let mut channel = ExpectChannel::new(
            session,
            output,
            self.config.idle_timeout(),
            self.config.search_depth,
        );
        channel.set_muted(self.config.start_at_prompt);

        let outcome = match self.drive(&mut channel, &mut progress).await {
            Ok(()) => Outcome::Completed,
            Err(reason) => {
                error!("{} {}", self.ctx, reason);
                Outcome::Failed { reason }
            }
        };

        let closing = self.close(&mut channel, &progress, &outcome).await;
        let outcome = match (outcome, closing) {
            (outcome, Ok(())) => outcome,
            (Outcome::Completed, Err(reason @ FailureReason::Sink { .. })) => {
                error!("{} {}", self.ctx, reason);
                Outcome::Failed { reason }
            }
            (outcome, Err(reason)) => {
                warn!("{} {}", self.ctx, reason);
                outcome
            }
        };

        match &outcome {
            Outcome::Completed => info!(
                "{} Completed {} command(s) in {:.1?}",
                self.ctx,
                progress.commands_completed,
                self.ctx.elapsed()
            ),
            Outcome::Failed { .. } => debug!(
                "{} Stopped after {} of {} command(s)",
                self.ctx,
                progress.commands_completed,
                self.commands.len()
            ),
        }

        self.report(outcome, &progress)
    }

    async fn drive<S: Session>(
        &self,
        channel: &mut ExpectChannel<'_, S>,
        progress: &mut Progress,
    ) -> std::result::Result<(), FailureReason> {
        let mut state = EngineState::Authenticating;
        let fail = |state: EngineState| move |e| FailureReason::from_error(e, state);

        debug!("{} Waiting for login prompt", self.ctx);
        match self.authenticate(channel).await.map_err(fail(state))? {
            AuthStatus::Accepted => info!("{} Logged in", self.ctx),
            AuthStatus::Rejected => return Err(FailureReason::Authentication),
            AuthStatus::Closed {
                after_password: false,
                message,
            } => return Err(FailureReason::Connect { message }),
            AuthStatus::Closed {
                after_password: true,
                message,
            } => {
                return Err(FailureReason::Protocol {
                    message: format!("session closed after password: {}", message),
                });
            }
        }

        state = EngineState::Ready;
        progress.ready = true;
        channel.set_muted(false);

        let prompt_only = PatternSet::new().with(&self.patterns.prompt);
        let pagination = self.config.pagination_command.as_str();
        if !pagination.is_empty() {
            debug!("{} Disabling pagination", self.ctx);
            channel.send_line(pagination).await.map_err(fail(state))?;
            if let Expectation::Eof { .. } =
                channel.expect(&prompt_only).await.map_err(fail(state))?
            {
                return Err(closed_while(state));
            }
        }

        let executing = PatternSet::new()
            .with(&self.patterns.prompt)
            .with(&self.patterns.confirm);

        for (index, command) in self.commands.iter().enumerate() {
            state = EngineState::Executing { command: index };
            info!("{} Sending command: {}", self.ctx, command);
            channel.send_line(command).await.map_err(fail(state))?;

            loop {
                match channel.expect(&executing).await.map_err(fail(state))? {
                    Expectation::Matched { index: 0, .. } => break,
                    Expectation::Matched { .. } => {
                        debug!("{} Confirming", self.ctx);
                        progress.confirmations += 1;
                        channel.send_line("").await.map_err(fail(state))?;
                    }
                    Expectation::Eof { .. } => return Err(closed_while(state)),
                }
            }
            progress.commands_completed += 1;
        }

        Ok(())
    }

    /// Answer host key questions, send the password and report whether
    /// the device accepted it.
    pub async fn authenticate<S: Session>(
        &self,
        channel: &mut ExpectChannel<'_, S>,
    ) -> Result<AuthStatus> {
        let login = PatternSet::new()
            .with(&self.patterns.password)
            .with(&self.patterns.host_key);

        loop {
            match channel.expect(&login).await? {
                Expectation::Matched { index: 0, .. } => break,
                Expectation::Matched { .. } => {
                    info!("{} Accepting host key", self.ctx);
                    channel.send_line("yes").await?;
                }
                Expectation::Eof { before } => {
                    return Ok(AuthStatus::Closed {
                        after_password: false,
                        message: last_line(&before, "connection closed before login"),
                    });
                }
            }
        }

        debug!("{} Sending password", self.ctx);
        channel.send_line(self.credential.expose_secret()).await?;

        let after_password = PatternSet::new()
            .with(&self.patterns.prompt)
            .with(&self.patterns.password);

        Ok(match channel.expect(&after_password).await? {
            Expectation::Matched { index: 0, .. } => AuthStatus::Accepted,
            Expectation::Matched { .. } => AuthStatus::Rejected,
            Expectation::Eof { before } => AuthStatus::Closed {
                after_password: true,
                message: last_line(&before, "no output"),
            },
        })
    }

    /// Send the exit command when the session can still take it, then
    /// release the session. Exit is best effort; only the release can fail.
    async fn close<S: Session>(
        &self,
        channel: &mut ExpectChannel<'_, S>,
        progress: &Progress,
        outcome: &Outcome,
    ) -> std::result::Result<(), FailureReason> {
        let state = EngineState::Closing;
        let recoverable = outcome.failure().is_none_or(FailureReason::is_recoverable);
        let exit = self.config.exit_command.as_str();

        if progress.ready && recoverable && channel.is_alive() && !exit.is_empty() {
            debug!("{} Sending {}", self.ctx, exit);
            if let Err(e) = channel.send_line(exit).await {
                debug!("{} {}", self.ctx, FailureReason::from_error(e, state));
            }
        }

        channel
            .close()
            .await
            .map_err(|e| FailureReason::from_error(e, state))
    }

    fn report(&self, outcome: Outcome, progress: &Progress) -> DeviceReport {
        DeviceReport {
            host: self.ctx.host().to_string(),
            device: self.ctx.label().to_string(),
            outcome,
            commands_completed: progress.commands_completed,
            confirmations: progress.confirmations,
            elapsed: self.ctx.elapsed(),
        }
    }
}

fn closed_while(state: EngineState) -> FailureReason {
    FailureReason::Protocol {
        message: format!("session closed while {}", state),
    }
}

/// Last non-blank line of `text`, or `fallback`.
fn last_line(text: &str, fallback: &str) -> String {
    text.lines()
        .map(str::trim)
        .rfind(|line| !line.is_empty())
        .unwrap_or(fallback)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::config::PatternConfig;
    use crate::output::SharedBuffer;
    use crate::transport::scripted::ios_device;
    use crate::transport::{ScriptedConnector, Step};

    fn engine(host: &str, commands: &[&str], config: EngineConfig) -> SessionEngine {
        let patterns = SessionPatterns::compile(&PatternConfig::default()).unwrap();
        SessionEngine::new(
            DeviceContext::new(host),
            Arc::new(Credential::new("admin", "s3cret")),
            commands.iter().map(|c| c.to_string()).collect(),
            Arc::new(config),
            Arc::new(patterns),
        )
    }

    fn fast() -> EngineConfig {
        EngineConfig {
            idle_timeout_secs: 1,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_commands_sent_in_order() {
        let connector = ScriptedConnector::new().device(
            "r1",
            ios_device(
                "R1",
                "s3cret",
                &[("show version", "IOS 15.2"), ("show clock", "12:00:00")],
            ),
        );
        let capture = SharedBuffer::new();
        let mut out = OutputMultiplexer::new();
        out.add(capture.clone());

        let report = engine("r1", &["show version", "show clock"], fast())
            .run(&connector, &mut out)
            .await;

        assert_eq!(report.outcome, Outcome::Completed);
        assert_eq!(report.device, "R1");
        assert_eq!(report.commands_completed, 2);
        assert_eq!(report.confirmations, 0);
        assert_eq!(
            connector.transcript("r1"),
            vec!["s3cret", "terminal length 0", "show version", "show clock", "exit"]
        );
        assert_eq!(connector.username("r1").as_deref(), Some("admin"));

        let text = capture.to_string_lossy();
        assert!(text.starts_with("Password: "));
        assert_eq!(text.matches("IOS 15.2").count(), 1);
        assert_eq!(text.matches("12:00:00").count(), 1);
    }

    #[tokio::test]
    async fn test_confirmations_do_not_advance() {
        let steps = vec![
            Step::emit("Password: "),
            Step::expect("s3cret"),
            Step::emit("\r\nR1#"),
            Step::expect("terminal length 0"),
            Step::emit("terminal length 0\r\nR1#"),
            Step::expect("reload"),
            Step::emit("reload\r\nSystem configuration has been modified. Save? [confirm]"),
            Step::expect(""),
            Step::emit("\r\nProceed with reload? [confirm]"),
            Step::expect(""),
            Step::emit("\r\nR1#"),
            Step::expect("show clock"),
            Step::emit("show clock\r\n12:00\r\nR1#"),
            Step::expect("exit"),
            Step::Close,
        ];
        let connector = ScriptedConnector::new().device("r1", steps);
        let mut out = OutputMultiplexer::new();

        let report = engine("r1", &["reload", "show clock"], fast())
            .run(&connector, &mut out)
            .await;

        assert_eq!(report.outcome, Outcome::Completed);
        assert_eq!(report.confirmations, 2);
        assert_eq!(
            connector.transcript("r1"),
            vec!["s3cret", "terminal length 0", "reload", "", "", "show clock", "exit"]
        );
    }

    #[tokio::test]
    async fn test_rejected_password_sends_no_commands() {
        let steps = vec![
            Step::emit("Password: "),
            Step::expect("s3cret"),
            Step::emit("\r\nPassword: "),
            Step::Stall,
        ];
        let connector = ScriptedConnector::new().device("r1", steps);
        let mut out = OutputMultiplexer::new();

        let report = engine("r1", &["show version"], fast())
            .run(&connector, &mut out)
            .await;

        assert_eq!(
            report.outcome,
            Outcome::Failed {
                reason: FailureReason::Authentication
            }
        );
        assert_eq!(report.commands_completed, 0);
        assert_eq!(connector.transcript("r1"), vec!["s3cret"]);
        assert_eq!(connector.active(), 0);
    }

    #[tokio::test]
    async fn test_host_key_then_password() {
        let mut steps = vec![
            Step::emit(
                "The authenticity of host 'r1' can't be established.\r\n\
                 Are you sure you want to continue connecting (yes/no/[fingerprint])? ",
            ),
            Step::expect("yes"),
            Step::emit("Warning: Permanently added 'r1' to the list of known hosts.\r\n"),
        ];
        steps.extend(ios_device("R1", "s3cret", &[("show version", "IOS")]));
        let connector = ScriptedConnector::new().device("r1", steps);
        let mut out = OutputMultiplexer::new();

        let report = engine("r1", &["show version"], fast())
            .run(&connector, &mut out)
            .await;

        assert!(report.is_success());
        assert_eq!(
            connector.transcript("r1"),
            vec!["yes", "s3cret", "terminal length 0", "show version", "exit"]
        );
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        let steps = vec![
            Step::emit("Password: "),
            Step::expect("s3cret"),
            Step::emit("\r\nR1#"),
            Step::expect("terminal length 0"),
            Step::emit("terminal length 0\r\nR1#"),
            Step::expect("show tech"),
            Step::emit("show tech\r\n---- building ----"),
            Step::Stall,
        ];
        let connector = ScriptedConnector::new().device("r1", steps);
        let mut out = OutputMultiplexer::new();

        let report = engine("r1", &["show tech", "show clock"], fast())
            .run(&connector, &mut out)
            .await;

        match report.outcome {
            Outcome::Failed {
                reason: FailureReason::Timeout { state, after },
            } => {
                assert_eq!(state, EngineState::Executing { command: 0 });
                assert_eq!(after, Duration::from_secs(1));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        // Timeouts are recoverable, so the session still gets an exit.
        assert_eq!(
            connector.transcript("r1"),
            vec!["s3cret", "terminal length 0", "show tech", "exit"]
        );
    }

    #[tokio::test]
    async fn test_eof_mid_command_aborts_rest() {
        let steps = vec![
            Step::emit("Password: "),
            Step::expect("s3cret"),
            Step::emit("\r\nR1#"),
            Step::expect("terminal length 0"),
            Step::emit("terminal length 0\r\nR1#"),
            Step::expect("reload"),
            Step::emit("reload\r\nConnection closed by foreign host.\r\n"),
            Step::Close,
        ];
        let connector = ScriptedConnector::new().device("r1", steps);
        let mut out = OutputMultiplexer::new();

        let report = engine("r1", &["reload", "show clock"], fast())
            .run(&connector, &mut out)
            .await;

        assert!(matches!(
            report.outcome,
            Outcome::Failed {
                reason: FailureReason::Protocol { .. }
            }
        ));
        assert_eq!(report.commands_completed, 0);
        assert_eq!(
            connector.transcript("r1"),
            vec!["s3cret", "terminal length 0", "reload"]
        );
    }

    #[tokio::test]
    async fn test_eof_before_login_is_connect_failure() {
        let steps = vec![
            Step::emit("ssh: Could not resolve hostname r9: Name or service not known\r\n"),
            Step::Close,
        ];
        let connector = ScriptedConnector::new().device("r9", steps);
        let mut out = OutputMultiplexer::new();

        let report = engine("r9", &["show version"], fast())
            .run(&connector, &mut out)
            .await;

        match report.outcome {
            Outcome::Failed {
                reason: FailureReason::Connect { message },
            } => assert!(message.contains("Could not resolve hostname")),
            other => panic!("expected connect failure, got {:?}", other),
        }
        assert!(connector.transcript("r9").is_empty());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let connector = ScriptedConnector::new();
        let mut out = OutputMultiplexer::new();

        let report = engine("nowhere", &["show version"], fast())
            .run(&connector, &mut out)
            .await;

        assert!(matches!(
            report.outcome,
            Outcome::Failed {
                reason: FailureReason::Connect { .. }
            }
        ));
    }

    #[tokio::test]
    async fn test_start_at_prompt_hides_login() {
        let connector = ScriptedConnector::new().device(
            "r1",
            ios_device("R1", "s3cret", &[("show version", "IOS 15.2")]),
        );
        let capture = SharedBuffer::new();
        let mut out = OutputMultiplexer::new();
        out.add(capture.clone());

        let config = EngineConfig {
            start_at_prompt: true,
            ..fast()
        };
        let report = engine("r1", &["show version"], config)
            .run(&connector, &mut out)
            .await;

        assert!(report.is_success());
        let text = capture.to_string_lossy();
        assert!(!text.contains("Password"));
        assert!(text.starts_with("terminal length 0"));
        assert!(text.contains("IOS 15.2"));
    }

    #[tokio::test]
    async fn test_sink_failure_fails_run() {
        struct Broken;
        impl crate::output::Sink for Broken {
            fn write(&mut self, _data: &[u8]) -> std::io::Result<()> {
                Err(std::io::Error::other("disk full"))
            }
        }

        let connector = ScriptedConnector::new().device(
            "r1",
            ios_device("R1", "s3cret", &[("show version", "IOS")]),
        );
        let mut out = OutputMultiplexer::new();
        out.add(Broken);

        let report = engine("r1", &["show version"], fast())
            .run(&connector, &mut out)
            .await;

        match report.outcome {
            Outcome::Failed {
                reason: FailureReason::Sink { message },
            } => assert!(message.contains("disk full")),
            other => panic!("expected sink failure, got {:?}", other),
        }
        assert!(connector.transcript("r1").is_empty());
    }

    #[tokio::test]
    async fn test_flush_failure_on_close_fails_completed_run() {
        struct FlushFails;
        impl crate::output::Sink for FlushFails {
            fn write(&mut self, _data: &[u8]) -> std::io::Result<()> {
                Ok(())
            }

            fn flush(&mut self) -> std::io::Result<()> {
                Err(std::io::Error::other("device gone"))
            }
        }

        let connector = ScriptedConnector::new().device(
            "r1",
            ios_device("R1", "s3cret", &[("show version", "IOS")]),
        );
        let mut out = OutputMultiplexer::new();
        out.add(FlushFails);

        let report = engine("r1", &["show version"], fast())
            .run(&connector, &mut out)
            .await;

        assert_eq!(report.commands_completed, 1);
        match report.outcome {
            Outcome::Failed {
                reason: FailureReason::Sink { message },
            } => assert!(message.contains("device gone")),
            other => panic!("expected sink failure, got {:?}", other),
        }
        assert_eq!(
            connector.transcript("r1"),
            vec!["s3cret", "terminal length 0", "show version", "exit"]
        );
    }

    #[tokio::test]
    async fn test_empty_pagination_command_skipped() {
        let steps = vec![
            Step::emit("Password: "),
            Step::expect("s3cret"),
            Step::emit("\r\nsw1# "),
            Step::expect("show ver"),
            Step::emit("show ver\r\nok\r\nsw1# "),
            Step::expect("exit"),
            Step::Close,
        ];
        let connector = ScriptedConnector::new().device("sw1", steps);
        let mut out = OutputMultiplexer::new();

        let config = EngineConfig {
            pagination_command: String::new(),
            ..fast()
        };
        let report = engine("sw1", &["show ver"], config)
            .run(&connector, &mut out)
            .await;

        assert!(report.is_success());
        assert_eq!(connector.transcript("sw1"), vec!["s3cret", "show ver", "exit"]);
    }

    #[test]
    fn test_last_line() {
        assert_eq!(last_line("a\r\nb\r\n\r\n", "x"), "b");
        assert_eq!(last_line("  \r\n", "x"), "x");
    }
}
