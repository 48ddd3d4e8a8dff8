//! Login credential shared by every device session.

use std::fmt;
use std::path::Path;

use log::{debug, info};
use secrecy::{ExposeSecret, SecretString};

/// A username and secret pair.
///
/// The secret is wrapped in [`SecretString`] so it never shows up in
/// `Debug` output or logs.
#[derive(Clone)]
pub struct Credential {
    username: String,
    secret: SecretString,
}

impl Credential {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: SecretString::from(secret.into()),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// The secret in clear text. Only the engine should call this, right
    /// before writing it to the session.
    pub fn expose_secret(&self) -> &str {
        self.secret.expose_secret()
    }

    /// Read a stored secret from a `.pass` style file.
    ///
    /// Returns `Ok(None)` when the file does not exist. The first line of
    /// the file, trimmed, is the secret; the username is the current OS user.
    pub fn from_pass_file(path: &Path) -> std::io::Result<Option<Self>> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No pass file at {}", path.display());
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        info!("Using credentials from {}", path.display());
        let secret = text.lines().next().unwrap_or_default().trim().to_string();
        Ok(Some(Self::new(current_user(), secret)))
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Login name of the user running the process.
pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .or_else(|_| std::env::var("LOGNAME"))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_debug_hides_secret() {
        let credential = Credential::new("admin", "hunter2");
        let printed = format!("{:?}", credential);
        assert!(printed.contains("admin"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_pass_file_first_line() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "  s3cret \nignored").unwrap();

        let credential = Credential::from_pass_file(file.path()).unwrap().unwrap();
        assert_eq!(credential.expose_secret(), "s3cret");
        assert_eq!(credential.username(), current_user());
    }

    #[test]
    fn test_pass_file_missing() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join(".pass");
        assert!(Credential::from_pass_file(&missing).unwrap().is_none());
    }
}
