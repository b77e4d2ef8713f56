use std::fmt;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
/// Failure reported by an [`crate::IdentityDelegate`]; the message is shown to the user verbatim.
pub struct DelegateError {
    pub message: String,
}

impl DelegateError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Failure reported by a [`crate::DirectoryService`], with the upstream HTTP
/// status when the failure came from a response.
pub struct DirectoryError {
    pub status: Option<u16>,
    pub message: String,
}

impl DirectoryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }
}

impl fmt::Display for DirectoryError {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(formatter, "status {status}: {}", self.message),
            None => formatter.write_str(&self.message),
        }
    }
}

impl std::error::Error for DirectoryError {}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
/// Enumerates the ways a session operation can fail. Every variant aborts the
/// whole operation; nothing is retried.
pub enum SessionError {
    #[error("{0}")]
    DelegationFailed(String),
    #[error("{0}")]
    SelectionRequired(String),
    #[error("failed to connect to organization \"{organization}\": {message}")]
    ValidationFailed {
        organization: String,
        status: Option<u16>,
        message: String,
    },
    #[error("directory {operation} failed: {message}")]
    DirectoryFailed {
        operation: &'static str,
        message: String,
    },
    #[error("failed to persist session: {0}")]
    PersistenceFailed(String),
    #[error("{operation} timed out after {timeout_ms}ms")]
    TimedOut {
        operation: &'static str,
        timeout_ms: u64,
    },
}

impl SessionError {
    /// True for outcomes the user chose (cancelling a prompt), which front ends
    /// report as "not completed" rather than as a failure.
    pub fn is_benign(&self) -> bool {
        matches!(self, SessionError::SelectionRequired(_))
    }
}

pub(crate) async fn with_timeout<F: Future>(
    operation: &'static str,
    timeout: Duration,
    future: F,
) -> Result<F::Output, SessionError> {
    tokio::time::timeout(timeout, future)
        .await
        .map_err(|_| SessionError::TimedOut {
            operation,
            timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
        })
}
