use std::fmt;

use devkit_core::is_expired_unix;

/// Opaque bearer token. Formatting never reveals the value.
#[derive(Clone, PartialEq, Eq)]
pub struct BearerCredential(String);

impl BearerCredential {
    /// Returns `None` for blank tokens.
    pub fn new(token: impl Into<String>) -> Option<Self> {
        let token = token.into();
        let trimmed = token.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.len() == token.len() {
            Some(Self(token))
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    /// Plaintext for the explicit use sites that put the token on the wire or
    /// into the secret store.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for BearerCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl fmt::Display for BearerCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Credential produced by an [`crate::IdentityDelegate`].
pub struct DelegatedCredential {
    pub bearer: BearerCredential,
    pub expires_unix: Option<u64>,
}

impl DelegatedCredential {
    pub fn new(bearer: BearerCredential) -> Self {
        Self {
            bearer,
            expires_unix: None,
        }
    }

    pub fn expiring_at(mut self, expires_unix: u64) -> Self {
        self.expires_unix = Some(expires_unix);
        self
    }

    pub fn is_expired(&self, now_unix: u64) -> bool {
        is_expired_unix(self.expires_unix, now_unix)
    }
}
