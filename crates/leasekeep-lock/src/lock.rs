use std::{fmt, time::Duration};

use chrono::{DateTime, Utc};
use leasekeep_common::{HolderToken, time::remaining};

use crate::{context::Context, errors::Result, locker::Locker};

/// A lease obtained through [`Locker::obtain`].
///
/// The handle caches what was true when the lease was last acquired or
/// refreshed; the backend stays the source of truth. It does not notice on
/// its own that the lease expired, so long critical sections should poll
/// [`Lock::ttl`] or call [`Lock::refresh`] well before [`Lock::expires_at`].
///
/// Dropping a handle does not release the lease; it lapses when its TTL runs
/// out. Calls on one handle from several tasks must be serialized by the
/// caller.
pub struct Lock {
    locker: Locker,
    key: String,
    token: HolderToken,
    lease: Duration,
    acquired_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl Lock {
    pub(crate) fn new(
        locker: Locker,
        key: String,
        token: HolderToken,
        lease: Duration,
        acquired_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            locker,
            key,
            token,
            lease,
            acquired_at,
            expires_at,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn token(&self) -> &HolderToken {
        &self.token
    }

    /// Lease duration requested by the last obtain or refresh.
    pub fn lease(&self) -> Duration {
        self.lease
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    /// Last-known expiry. A lower bound: it is computed from the instant the
    /// backend call started.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Local estimate of the remaining lease, without asking the backend.
    pub fn remaining_hint(&self) -> Option<Duration> {
        remaining(self.locker.clock().now(), self.expires_at)
    }

    /// Remaining lease according to the backend; `None` once it is gone.
    pub async fn ttl(&self, ctx: &Context) -> Result<Option<Duration>> {
        self.locker.ttl(self, ctx).await
    }

    /// Whether the backend still holds this handle's token under its key.
    pub async fn is_held(&self, ctx: &Context) -> Result<bool> {
        self.locker.is_held(self, ctx).await
    }

    /// Resets the lease to `ttl` from now. Fails with
    /// [`LockError::LockLost`](crate::LockError::LockLost) when the lease is no
    /// longer ours, after which the critical section must stop.
    pub async fn refresh(&mut self, ttl: Duration, ctx: &Context) -> Result<()> {
        let locker = self.locker.clone();
        locker.refresh(self, ttl, ctx).await
    }

    /// Deletes the lease if it is still ours. A lease that already expired or
    /// was taken over yields [`LockError::LockLost`](crate::LockError::LockLost)
    /// and leaves the other holder's record untouched.
    pub async fn release(&self, ctx: &Context) -> Result<()> {
        self.locker.release(self, ctx).await
    }

    pub(crate) fn renewed(&mut self, lease: Duration, expires_at: DateTime<Utc>) {
        self.lease = lease;
        self.expires_at = expires_at;
    }
}

impl fmt::Debug for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lock")
            .field("key", &self.key)
            .field("token", &self.token)
            .field("lease", &self.lease)
            .field("acquired_at", &self.acquired_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}
