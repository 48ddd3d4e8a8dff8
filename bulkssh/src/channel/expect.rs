//! Pattern waits over a live session.

use std::time::Duration;

use log::trace;
use tokio::time::Instant;

use super::buffer::PatternBuffer;
use super::patterns::PatternSet;
use crate::error::{ChannelError, Result};
use crate::output::OutputMultiplexer;
use crate::transport::Session;

/// Line terminator appended by [`ExpectChannel::send_line`].
pub const LINE_ENDING: &str = "\n";

/// What ended a wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    /// Pattern `index` of the set matched.
    Matched {
        index: usize,
        before: String,
        matched: String,
    },
    /// The peer closed the stream first.
    Eof { before: String },
}

/// A session plus the match window over its output.
///
/// Every byte read is forwarded to the output multiplexer as soon as it
/// arrives, before any matching happens.
pub struct ExpectChannel<'o, S: Session> {
    session: S,
    buffer: PatternBuffer,
    output: &'o mut OutputMultiplexer,
    timeout: Duration,
    muted: bool,
    eof: bool,
}

impl<'o, S: Session> ExpectChannel<'o, S> {
    pub fn new(
        session: S,
        output: &'o mut OutputMultiplexer,
        timeout: Duration,
        search_depth: usize,
    ) -> Self {
        Self {
            session,
            buffer: PatternBuffer::new(search_depth),
            output,
            timeout,
            muted: false,
            eof: false,
        }
    }

    /// Stop or resume forwarding output to the sinks.
    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
    }

    /// True once end-of-stream has been read.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Whether the session can still take input.
    pub fn is_alive(&self) -> bool {
        !self.eof && self.session.is_alive()
    }

    /// Send `text` followed by a line ending.
    pub async fn send_line(&mut self, text: &str) -> Result<()> {
        let mut line = String::with_capacity(text.len() + LINE_ENDING.len());
        line.push_str(text);
        line.push_str(LINE_ENDING);
        self.session.send(line.as_bytes()).await
    }

    /// Wait until one of `patterns` matches or the stream ends.
    ///
    /// Output left over from the previous wait is searched first. Fails
    /// with [`ChannelError::PatternTimeout`] when neither happens within
    /// the idle timeout.
    pub async fn expect(&mut self, patterns: &PatternSet<'_>) -> Result<Expectation> {
        let deadline = Instant::now() + self.timeout;

        loop {
            if let Some(consumed) = self.buffer.take_match(patterns) {
                trace!("pattern {} matched", consumed.found.index);
                return Ok(Expectation::Matched {
                    index: consumed.found.index,
                    before: String::from_utf8_lossy(consumed.before()).into_owned(),
                    matched: String::from_utf8_lossy(consumed.matched()).into_owned(),
                });
            }

            if self.eof {
                let rest = self.buffer.take();
                return Ok(Expectation::Eof {
                    before: String::from_utf8_lossy(&rest).into_owned(),
                });
            }

            self.buffer.trim();

            let chunk = tokio::time::timeout_at(deadline, self.session.read_chunk())
                .await
                .map_err(|_| ChannelError::PatternTimeout(self.timeout))??;

            match chunk {
                Some(data) => {
                    if !self.muted {
                        self.output.write(&data).map_err(ChannelError::Sink)?;
                    }
                    self.buffer.extend(&data);
                }
                None => {
                    trace!("end of stream");
                    self.eof = true;
                }
            }
        }
    }

    /// Release the session.
    pub async fn close(&mut self) -> Result<()> {
        let result = self.session.close().await;
        self.eof = true;
        self.output.flush().map_err(ChannelError::Sink)?;
        result
    }
}
