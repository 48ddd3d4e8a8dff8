//! Per-run logging context.

use std::fmt;
use std::time::{Duration, Instant};

/// Identity of the device a single engine run works on.
///
/// Passed into the engine and used as the prefix of every log line the run
/// emits, so interleaved logs from concurrent devices stay attributable.
#[derive(Debug, Clone)]
pub struct DeviceContext {
    host: String,
    label: String,
    started: Instant,
}

impl DeviceContext {
    pub fn new(host: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            label: host.to_uppercase(),
            host,
            started: Instant::now(),
        }
    }

    /// Host name as given, used for connecting.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Upper-cased host name, used in logs and file names.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Time since the context was created.
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

impl fmt::Display for DeviceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_is_upper_case_host_is_not() {
        let ctx = DeviceContext::new("core-sw1.lab");
        assert_eq!(ctx.host(), "core-sw1.lab");
        assert_eq!(ctx.label(), "CORE-SW1.LAB");
        assert_eq!(ctx.to_string(), "[CORE-SW1.LAB]");
    }
}
