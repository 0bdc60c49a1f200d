//! Redacting wrapper for client secrets, store URLs and tokens

use std::fmt;
use std::path::Path;

use zeroize::Zeroize;

use crate::error::{Error, Result};

/// Sensitive value - redacted in Debug/Display/logs, zeroed on drop
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Read a secret from an environment variable. Unset and blank values
    /// both yield `None`.
    pub fn from_env(var: &str) -> Option<Self> {
        std::env::var(var)
            .ok()
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
            .map(Self::new)
    }

    /// Read a secret from a file, trimming the trailing newline most
    /// secret mounts carry. An empty file is an error.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read secret file {}: {e}", path.display()))
        })?;
        let value = raw.trim().to_owned();
        if value.is_empty() {
            return Err(Error::Config(format!(
                "secret file {} is empty",
                path.display()
            )));
        }
        Ok(Self::new(value))
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_redacts_debug_and_display() {
        let secret = Secret::new(String::from("spotify-client-secret"));
        assert_eq!(format!("{:?}", secret), "[REDACTED]");
        assert_eq!(format!("{}", secret), "[REDACTED]");
    }

    #[test]
    fn secret_exposes_value() {
        let secret = Secret::new(String::from("redis://:pw@localhost:6379"));
        assert_eq!(secret.expose(), "redis://:pw@localhost:6379");
    }

    #[test]
    fn from_file_trims_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client_secret");
        std::fs::write(&path, "abc123\n").unwrap();

        let secret = Secret::from_file(&path).unwrap();
        assert_eq!(secret.expose(), "abc123");
    }

    #[test]
    fn from_file_rejects_empty_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client_secret");
        std::fs::write(&path, "  \n").unwrap();

        let err = Secret::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("is empty"), "got: {err}");
    }

    #[test]
    fn from_file_missing_is_config_error() {
        let err = Secret::from_file(Path::new("/nonexistent/secret")).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
