//! Cancellation and deadlines for lock operations.
//!
//! A [`Context`] is cheap to clone and carries an optional deadline plus a
//! shared cancellation flag. Lock operations race their suspension points
//! against [`Context::done`], so cancelling wakes a waiting `obtain` at once
//! instead of letting it finish its current backoff.

use std::{sync::Arc, time::Duration};

use tokio::{sync::watch, time::Instant};

use crate::errors::LockError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelCause {
    Cancelled,
    DeadlineExceeded,
}

impl From<CancelCause> for LockError {
    fn from(cause: CancelCause) -> Self {
        match cause {
            CancelCause::Cancelled => LockError::Cancelled,
            CancelCause::DeadlineExceeded => LockError::DeadlineExceeded,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Context {
    cancelled: Arc<watch::Sender<bool>>,
    deadline: Option<Instant>,
}

/// Cancels every context derived from the one it was created with.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancelled: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            cancelled: Arc::new(tx),
            deadline: None,
        }
    }

    pub fn with_cancel() -> (Self, CancelHandle) {
        let ctx = Self::background();
        let handle = CancelHandle {
            cancelled: Arc::clone(&ctx.cancelled),
        };
        (ctx, handle)
    }

    /// Derives a context sharing this one's cancellation, with the earlier of
    /// the two deadlines.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        };
        Self {
            cancelled: Arc::clone(&self.cancelled),
            deadline: Some(deadline),
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now()
            .checked_add(timeout)
            .unwrap_or_else(far_future);
        self.with_deadline(deadline)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns why the context is finished, or `None` while it is still live.
    pub fn is_done(&self) -> Option<CancelCause> {
        if *self.cancelled.borrow() {
            return Some(CancelCause::Cancelled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(CancelCause::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn check(&self) -> Result<(), LockError> {
        match self.is_done() {
            Some(cause) => Err(cause.into()),
            None => Ok(()),
        }
    }

    /// Resolves once the context is cancelled or its deadline passes. Never
    /// resolves for a background context.
    pub async fn done(&self) -> CancelCause {
        let mut rx = self.cancelled.subscribe();
        let cancelled = async move {
            // The sender lives in `self`, so `wait_for` only returns on cancel.
            let _ = rx.wait_for(|cancelled| *cancelled).await.map(|_| ());
        };

        match self.deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = cancelled => CancelCause::Cancelled,
                _ = tokio::time::sleep_until(deadline) => CancelCause::DeadlineExceeded,
            },
            None => {
                cancelled.await;
                CancelCause::Cancelled
            }
        }
    }

    /// Runs `fut` unless the context finishes first.
    pub async fn run<F, T>(&self, fut: F) -> Result<T, LockError>
    where
        F: std::future::Future<Output = T>,
    {
        self.check()?;
        tokio::select! {
            biased;
            cause = self.done() => Err(cause.into()),
            value = fut => Ok(value),
        }
    }
}

fn far_future() -> Instant {
    // Roughly 30 years, the same horizon tokio uses for "never".
    Instant::now() + Duration::from_secs(86_400 * 365 * 30)
}
