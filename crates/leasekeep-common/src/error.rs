use thiserror::Error;

/// Failures talking to the backing key-value store.
///
/// These never mean "the lock is held by someone else"; contention is reported
/// through the boolean results of the backend operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("backend protocol error: {0}")]
    Protocol(String),
    #[error("backend state poisoned: {0}")]
    Poisoned(String),
}

impl BackendError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;
