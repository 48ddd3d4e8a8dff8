//! Compiled session patterns.

use regex::bytes::Regex;

use crate::config::PatternConfig;
use crate::error::{ChannelError, Result};

/// The interactive idioms the engine recognises, compiled once per run and
/// shared by every device.
#[derive(Debug, Clone)]
pub struct SessionPatterns {
    pub password: Regex,
    pub host_key: Regex,
    pub prompt: Regex,
    pub confirm: Regex,
}

impl SessionPatterns {
    pub fn compile(config: &PatternConfig) -> Result<Self> {
        let compile = |source: &str| Regex::new(source).map_err(ChannelError::InvalidPattern);
        Ok(Self {
            password: compile(&config.password)?,
            host_key: compile(&config.host_key)?,
            prompt: compile(&config.prompt)?,
            confirm: compile(&config.confirm)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defaults() -> SessionPatterns {
        SessionPatterns::compile(&PatternConfig::default()).unwrap()
    }

    #[test]
    fn test_password_prompt() {
        let p = defaults();
        assert!(p.password.is_match(b"Password: "));
        assert!(p.password.is_match(b"admin@10.0.0.1's password: "));
        assert!(!p.password.is_match(b"Password: \r\nR1#"));
    }

    #[test]
    fn test_host_key_question() {
        let p = defaults();
        assert!(p.host_key.is_match(
            b"Are you sure you want to continue connecting (yes/no)? "
        ));
        assert!(p.host_key.is_match(
            b"Are you sure you want to continue connecting (yes/no/[fingerprint])? "
        ));
    }

    #[test]
    fn test_prompt_at_line_end_only() {
        let p = defaults();
        assert!(p.prompt.is_match(b"\r\nR1#"));
        assert!(p.prompt.is_match(b"core-sw1# "));
        assert!(!p.prompt.is_match(b"R1#show version\r\n"));
        assert!(!p.prompt.is_match(b"R1>"));
        assert!(!p.prompt.is_match(b"#"));
    }

    #[test]
    fn test_confirm() {
        let p = defaults();
        assert!(p.confirm.is_match(b"Destination filename [startup-config]? \r\n[confirm]"));
        assert!(!p.confirm.is_match(b"confirm"));
    }

    #[test]
    fn test_invalid_pattern() {
        let config = PatternConfig {
            prompt: "(".to_string(),
            ..Default::default()
        };
        assert!(SessionPatterns::compile(&config).is_err());
    }
}
