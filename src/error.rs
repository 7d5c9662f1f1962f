// File: ./src/error.rs
//! Typed errors shared by providers and the scheduler.
use thiserror::Error;

/// Failures a provider operation can report.
///
/// Only [`ProviderError::Unavailable`] is worth retrying: it means the remote
/// store could not be asked, not that the answer was negative.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("invalid input: {0}")]
    Validation(String),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }

    pub(crate) fn calendar_not_found(name: &str) -> Self {
        Self::NotFound(format!("calendar '{}'", name))
    }

    pub(crate) fn task_not_found(uid: &str, calendar_name: &str) -> Self {
        Self::NotFound(format!("task '{}' in calendar '{}'", uid, calendar_name))
    }

    pub(crate) fn event_not_found(uid: &str, calendar_name: &str) -> Self {
        Self::NotFound(format!("event '{}' in calendar '{}'", uid, calendar_name))
    }
}

impl From<anyhow::Error> for ProviderError {
    fn from(e: anyhow::Error) -> Self {
        Self::Unavailable(format!("{:#}", e))
    }
}

/// Why a check-in did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("check-in cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_retryable(),
            Self::Cancelled => false,
        }
    }
}
