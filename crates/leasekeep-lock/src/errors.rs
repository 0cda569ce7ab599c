use leasekeep_common::BackendError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LockError>;

#[derive(Debug, Error)]
pub enum LockError {
    /// The retry strategy ran out before the lock became free.
    #[error("lock not obtained: key={key}, attempts={attempts}")]
    NotObtained { key: String, attempts: u32 },
    #[error("lock operation cancelled")]
    Cancelled,
    #[error("lock operation deadline exceeded")]
    DeadlineExceeded,
    /// The stored token no longer matches this holder: the lease expired or
    /// was taken over. Work done in the critical section is unverified.
    #[error("lock lost: key={key}")]
    LockLost { key: String },
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("invalid lock key: key must not be empty")]
    InvalidKey,
    #[error("invalid lease duration: ttl must be greater than zero")]
    InvalidTtl,
    #[error("invalid lock configuration: {0}")]
    Config(String),
}

impl LockError {
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::DeadlineExceeded)
    }

    pub fn is_not_obtained(&self) -> bool {
        matches!(self, Self::NotObtained { .. })
    }

    pub fn is_lock_lost(&self) -> bool {
        matches!(self, Self::LockLost { .. })
    }

    pub fn is_backend(&self) -> bool {
        matches!(self, Self::Backend(_))
    }
}
