use crate::utils::error::{MonitError, Result};
use std::fmt;

/// Environment variable holding the MONIT bearer token.
pub const TOKEN_ENV: &str = "CERN_BEARER_TOKEN";

/// 不透明的 bearer token，Debug 輸出一律遮蔽
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    token: String,
}

impl Credential {
    pub const REDACTED: &'static str = "Bearer <HIDDEN>";

    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    /// Resolves the token through `lookup` (normally `std::env::var`). Unset
    /// and whitespace-only values are both treated as missing.
    pub fn from_lookup<F>(var: &str, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        match lookup(var) {
            Some(token) if !token.trim().is_empty() => Ok(Self::new(token.trim())),
            _ => Err(MonitError::MissingCredentialError {
                var: var.to_string(),
            }),
        }
    }

    pub fn bearer_header(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(Self::REDACTED)
    }
}
