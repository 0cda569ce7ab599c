//! Lease lock manager.
//!
//! [`Locker`] turns the backend's atomic primitives into a lock:
//!
//! 1. `obtain` generates a fresh holder token and calls `try_set` until it
//!    wins, the retry strategy gives up, or the context finishes.
//! 2. Between attempts it suspends on the clock, raced against the context.
//!    That wait is the only place `obtain` blocks. A backend call already in
//!    flight is allowed to finish; cancellation is observed before the next
//!    attempt. Without a caller deadline the wait is bounded by one lease
//!    duration, measured on the locker's clock.
//! 3. `release`, `refresh` and `ttl` route the handle's key and token back to
//!    the backend's conditional operations.
//!
//! The lease duration is a trade-off the caller owns: too short and the lease
//! can lapse while the critical section is still running (another holder may
//! then acquire it), too long and a crashed holder blocks everyone until
//! expiry. Short leases are accepted as given; keep them comfortably longer
//! than the guarded work, or refresh while working.

use std::{fmt, sync::Arc, time::Duration};

use leasekeep_common::{
    BackendError, Clock, HolderToken, SystemClock,
    time::{add_duration, remaining},
};
use tracing::{debug, info, warn};

use crate::{
    backend::LeaseBackend,
    config::LockConfig,
    context::Context,
    errors::{LockError, Result},
    lock::Lock,
    retry::RetryStrategy,
};

/// Lifecycle of one `obtain` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObtainState {
    Pending,
    Acquired,
    Exhausted,
    Cancelled,
}

/// Per-call overrides for [`Locker::obtain_with`]. Unset fields fall back to
/// the locker's [`LockConfig`].
#[derive(Clone, Default)]
pub struct ObtainOptions {
    retry: Option<Arc<dyn RetryStrategy>>,
    token: Option<HolderToken>,
    retry_on_backend_error: Option<bool>,
    bound_wait_by_ttl: Option<bool>,
}

impl ObtainOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retry(mut self, strategy: impl RetryStrategy + 'static) -> Self {
        self.retry = Some(Arc::new(strategy));
        self
    }

    pub fn retry_shared(mut self, strategy: Arc<dyn RetryStrategy>) -> Self {
        self.retry = Some(strategy);
        self
    }

    /// Obtain with a known token instead of a fresh one. If the key is
    /// already held under this token the lease is extended rather than
    /// refused.
    pub fn token(mut self, token: HolderToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn retry_on_backend_error(mut self, enabled: bool) -> Self {
        self.retry_on_backend_error = Some(enabled);
        self
    }

    pub fn bound_wait_by_ttl(mut self, enabled: bool) -> Self {
        self.bound_wait_by_ttl = Some(enabled);
        self
    }
}

impl fmt::Debug for ObtainOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObtainOptions")
            .field("retry", &self.retry)
            .field("token", &self.token)
            .field("retry_on_backend_error", &self.retry_on_backend_error)
            .field("bound_wait_by_ttl", &self.bound_wait_by_ttl)
            .finish()
    }
}

#[derive(Clone)]
pub struct Locker {
    backend: Arc<dyn LeaseBackend>,
    clock: Arc<dyn Clock>,
    config: Arc<LockConfig>,
    default_retry: Arc<dyn RetryStrategy>,
}

impl Locker {
    /// Locker with the default configuration and the system clock.
    pub fn new(backend: Arc<dyn LeaseBackend>) -> Self {
        let config = LockConfig::default();
        let default_retry = config
            .retry
            .build()
            .unwrap_or_else(|_| crate::retry::no_retry());
        Self {
            backend,
            clock: Arc::new(SystemClock),
            config: Arc::new(config),
            default_retry,
        }
    }

    pub fn with_config(backend: Arc<dyn LeaseBackend>, config: LockConfig) -> Result<Self> {
        config.validate()?;
        let default_retry = config.retry.build()?;
        Ok(Self {
            backend,
            clock: Arc::new(SystemClock),
            config: Arc::new(config),
            default_retry,
        })
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Obtains `key` for `ttl` using the configured retry strategy.
    ///
    /// Cancellation interrupts the backoff wait but not a backend call that is
    /// already in flight; a lease won by that call is returned.
    ///
    /// The lease may lapse before the caller is done if `ttl` is shorter than
    /// the guarded work; see the module docs.
    pub async fn obtain(&self, key: &str, ttl: Duration, ctx: &Context) -> Result<Lock> {
        self.obtain_with(key, ttl, &ObtainOptions::default(), ctx)
            .await
    }

    /// Obtains `key` for the configured default lease duration.
    pub async fn obtain_default(&self, key: &str, ctx: &Context) -> Result<Lock> {
        self.obtain(key, self.config.default_ttl(), ctx).await
    }

    pub async fn obtain_with(
        &self,
        key: &str,
        ttl: Duration,
        options: &ObtainOptions,
        ctx: &Context,
    ) -> Result<Lock> {
        validate_key(key)?;
        if ttl.is_zero() {
            return Err(LockError::InvalidTtl);
        }

        let retry = options
            .retry
            .clone()
            .unwrap_or_else(|| Arc::clone(&self.default_retry));
        let retry_on_backend_error = options
            .retry_on_backend_error
            .unwrap_or(self.config.retry_on_backend_error);
        let bound_wait_by_ttl = options
            .bound_wait_by_ttl
            .unwrap_or(self.config.bound_wait_by_ttl);
        let reentrant = options.token.is_some();
        let token = options.token.clone().unwrap_or_else(HolderToken::generate);

        // Without a caller deadline, waiting is bounded by one lease duration.
        let wait_bound = (bound_wait_by_ttl && ctx.deadline().is_none())
            .then(|| add_duration(self.clock.now(), ttl));

        debug!(
            key,
            ttl_ms = millis(ttl),
            state = ?ObtainState::Pending,
            "obtaining lock"
        );

        let mut attempts: u32 = 0;
        let mut waited = Duration::ZERO;

        loop {
            if let Some(bound) = wait_bound
                && self.clock.now() >= bound
            {
                debug!(
                    key,
                    attempts,
                    state = ?ObtainState::Exhausted,
                    "lock wait reached lease bound"
                );
                return Err(LockError::NotObtained {
                    key: key.to_string(),
                    attempts,
                });
            }

            if let Err(err) = ctx.check() {
                return Err(cancelled(key, attempts, err));
            }

            attempts = attempts.saturating_add(1);
            let started = self.clock.now();

            // Not raced against the context: a dropped SET that already
            // reached the store would leave a lease nobody holds the token for.
            let last_backend_error = match self.try_acquire(key, &token, ttl, reentrant).await {
                Ok(true) => {
                    info!(
                        key,
                        attempts,
                        ttl_ms = millis(ttl),
                        state = ?ObtainState::Acquired,
                        "lock obtained"
                    );
                    return Ok(Lock::new(
                        self.clone(),
                        key.to_string(),
                        token,
                        ttl,
                        started,
                        add_duration(started, ttl),
                    ));
                }
                Ok(false) => None,
                Err(err) if retry_on_backend_error => {
                    warn!(key, attempts, error = %err, "lock backend error; retrying");
                    Some(err)
                }
                Err(err) => {
                    warn!(key, attempts, error = %err, "lock backend error");
                    return Err(err.into());
                }
            };

            let Some(delay) = retry.next_delay(attempts - 1, waited) else {
                debug!(
                    key,
                    attempts,
                    state = ?ObtainState::Exhausted,
                    "lock retry strategy exhausted"
                );
                return Err(match last_backend_error {
                    Some(err) => err.into(),
                    None => LockError::NotObtained {
                        key: key.to_string(),
                        attempts,
                    },
                });
            };
            waited = waited.saturating_add(delay);

            let sleep = match wait_bound {
                Some(bound) => {
                    delay.min(remaining(self.clock.now(), bound).unwrap_or_default())
                }
                None => delay,
            };
            debug!(
                key,
                attempt = attempts,
                delay_ms = millis(sleep),
                "lock held elsewhere; backing off"
            );

            if let Err(err) = ctx.run(self.clock.sleep(sleep)).await {
                return Err(cancelled(key, attempts, err));
            }
        }
    }

    async fn try_acquire(
        &self,
        key: &str,
        token: &HolderToken,
        ttl: Duration,
        reentrant: bool,
    ) -> std::result::Result<bool, BackendError> {
        if self.backend.try_set(key, token.as_str(), ttl).await? {
            return Ok(true);
        }
        if reentrant {
            return self
                .backend
                .compare_and_extend(key, token.as_str(), ttl)
                .await;
        }
        Ok(false)
    }

    pub async fn release(&self, lock: &Lock, ctx: &Context) -> Result<()> {
        let deleted = ctx
            .run(
                self.backend
                    .compare_and_delete(lock.key(), lock.token().as_str()),
            )
            .await??;

        if !deleted {
            warn!(key = lock.key(), "lock already lost before release");
            return Err(LockError::LockLost {
                key: lock.key().to_string(),
            });
        }

        info!(key = lock.key(), "lock released");
        Ok(())
    }

    pub async fn refresh(&self, lock: &mut Lock, ttl: Duration, ctx: &Context) -> Result<()> {
        if ttl.is_zero() {
            return Err(LockError::InvalidTtl);
        }

        let started = self.clock.now();
        let extended = ctx
            .run(
                self.backend
                    .compare_and_extend(lock.key(), lock.token().as_str(), ttl),
            )
            .await??;

        if !extended {
            warn!(key = lock.key(), "lock lost; refresh refused");
            return Err(LockError::LockLost {
                key: lock.key().to_string(),
            });
        }

        lock.renewed(ttl, add_duration(started, ttl));
        debug!(key = lock.key(), ttl_ms = millis(ttl), "lock refreshed");
        Ok(())
    }

    /// Remaining lease of the lock's key; `None` once the record is gone.
    pub async fn ttl(&self, lock: &Lock, ctx: &Context) -> Result<Option<Duration>> {
        Ok(ctx.run(self.backend.get_ttl(lock.key())).await??)
    }

    pub async fn is_held(&self, lock: &Lock, ctx: &Context) -> Result<bool> {
        let current = ctx.run(self.backend.get_token(lock.key())).await??;
        Ok(current.as_deref() == Some(lock.token().as_str()))
    }
}

fn cancelled(key: &str, attempts: u32, err: LockError) -> LockError {
    debug!(key, attempts, state = ?ObtainState::Cancelled, error = %err, "lock obtain cancelled");
    err
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(LockError::InvalidKey);
    }
    Ok(())
}
