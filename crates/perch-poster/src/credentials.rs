use std::fmt;
use std::path::Path;

use secrecy::{ExposeSecret, SecretString};

use crate::error::PostError;

/// Bearer token for the posting service.
///
/// The credentials file holds the token on its first non-empty line; any
/// further lines are ignored.
#[derive(Clone)]
pub struct Credentials {
    token: SecretString,
}

impl Credentials {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: SecretString::from(token.into()),
        }
    }

    pub fn load(path: &Path) -> Result<Self, PostError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| PostError::Credentials(format!("{}: {e}", path.display())))?;
        let token = content
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .ok_or_else(|| PostError::Credentials(format!("{} is empty", path.display())))?;
        Ok(Self::new(token))
    }

    pub(crate) fn token(&self) -> &str {
        self.token.expose_secret()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("token", &"[REDACTED]")
            .finish()
    }
}
