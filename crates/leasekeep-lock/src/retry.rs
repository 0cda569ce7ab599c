//! Retry strategies for lock acquisition.
//!
//! A strategy maps the zero-based index of the retry about to be scheduled to
//! a delay, or to `None` to stop. Index 0 is asked for after the first failed
//! backend attempt, so a strategy that stops at index `n` allows `n + 1`
//! backend attempts. The caller also passes the sum of the delays it was
//! handed so far, which lets wait budgets stay constant-time.
//!
//! Strategies are pure: the same inputs always yield the same answer. Jitter
//! is drawn from a generator seeded by `(seed, attempt)`, which keeps a whole
//! acquisition loop reproducible once the seed is fixed.

use std::{fmt, sync::Arc, time::Duration};

use rand::{Rng, SeedableRng, rngs::StdRng};

pub trait RetryStrategy: Send + Sync + fmt::Debug {
    /// `waited` is the total of the delays previously returned for this
    /// acquisition.
    fn next_delay(&self, attempt: u32, waited: Duration) -> Option<Duration>;
}

impl<S: RetryStrategy + ?Sized> RetryStrategy for Arc<S> {
    fn next_delay(&self, attempt: u32, waited: Duration) -> Option<Duration> {
        (**self).next_delay(attempt, waited)
    }
}

impl<S: RetryStrategy + ?Sized> RetryStrategy for Box<S> {
    fn next_delay(&self, attempt: u32, waited: Duration) -> Option<Duration> {
        (**self).next_delay(attempt, waited)
    }
}

/// Uniform jitter in `[0, max]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jitter {
    max: Duration,
    seed: u64,
}

impl Jitter {
    pub fn new(max: Duration) -> Self {
        Self {
            max,
            seed: rand::random(),
        }
    }

    pub fn with_seed(max: Duration, seed: u64) -> Self {
        Self { max, seed }
    }

    pub fn max(&self) -> Duration {
        self.max
    }

    fn sample(&self, attempt: u32) -> Duration {
        let max_nanos = u64::try_from(self.max.as_nanos()).unwrap_or(u64::MAX);
        if max_nanos == 0 {
            return Duration::ZERO;
        }

        let mut rng = StdRng::seed_from_u64(mix(self.seed, attempt));
        Duration::from_nanos(rng.random_range(0..=max_nanos))
    }
}

fn mix(seed: u64, attempt: u32) -> u64 {
    // splitmix64 finalizer so neighbouring attempts get unrelated streams
    let mut z = seed ^ u64::from(attempt).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

fn with_jitter(delay: Duration, jitter: Option<&Jitter>, attempt: u32) -> Duration {
    match jitter {
        Some(jitter) => delay.saturating_add(jitter.sample(attempt)),
        None => delay,
    }
}

/// Never retries: exactly one backend attempt.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetry;

impl RetryStrategy for NoRetry {
    fn next_delay(&self, _attempt: u32, _waited: Duration) -> Option<Duration> {
        None
    }
}

/// Waits the same interval between every attempt, retrying forever.
#[derive(Debug, Clone, Copy)]
pub struct FixedBackoff {
    interval: Duration,
    jitter: Option<Jitter>,
}

impl FixedBackoff {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            jitter: None,
        }
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = Some(jitter);
        self
    }
}

impl RetryStrategy for FixedBackoff {
    fn next_delay(&self, attempt: u32, _waited: Duration) -> Option<Duration> {
        Some(with_jitter(self.interval, self.jitter.as_ref(), attempt))
    }
}

/// `step * (attempt + 1)`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct LinearBackoff {
    step: Duration,
    max: Duration,
}

impl LinearBackoff {
    pub fn new(step: Duration, max: Duration) -> Self {
        Self { step, max }
    }
}

impl RetryStrategy for LinearBackoff {
    fn next_delay(&self, attempt: u32, _waited: Duration) -> Option<Duration> {
        let delay = self.step.saturating_mul(attempt.saturating_add(1));
        Some(delay.min(self.max))
    }
}

/// `min * factor^attempt`, capped at `max`, plus optional jitter.
#[derive(Debug, Clone, Copy)]
pub struct ExponentialBackoff {
    min: Duration,
    max: Duration,
    factor: f64,
    jitter: Option<Jitter>,
}

impl ExponentialBackoff {
    pub const DEFAULT_FACTOR: f64 = 2.0;

    pub fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            factor: Self::DEFAULT_FACTOR,
            jitter: None,
        }
    }

    /// Factors below 1.0 are clamped to 1.0 so delays never shrink.
    pub fn with_factor(mut self, factor: f64) -> Self {
        self.factor = if factor.is_finite() {
            factor.max(1.0)
        } else {
            Self::DEFAULT_FACTOR
        };
        self
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = Some(jitter);
        self
    }
}

impl RetryStrategy for ExponentialBackoff {
    fn next_delay(&self, attempt: u32, _waited: Duration) -> Option<Duration> {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let scaled_nanos = (self.min.as_nanos() as f64 * self.factor.powi(exponent)).round();
        let delay = if scaled_nanos.is_finite() && scaled_nanos < self.max.as_nanos() as f64 {
            Duration::from_nanos(scaled_nanos as u64)
        } else {
            self.max
        };
        Some(with_jitter(delay.min(self.max), self.jitter.as_ref(), attempt))
    }
}

/// Caps the total number of backend attempts at `max_attempts`, whatever the
/// wrapped strategy would do.
#[derive(Debug, Clone)]
pub struct LimitRetry<S> {
    inner: S,
    max_attempts: u32,
}

impl<S: RetryStrategy> LimitRetry<S> {
    pub fn new(inner: S, max_attempts: u32) -> Self {
        Self {
            inner,
            max_attempts,
        }
    }
}

impl<S: RetryStrategy> RetryStrategy for LimitRetry<S> {
    fn next_delay(&self, attempt: u32, waited: Duration) -> Option<Duration> {
        // `attempt + 1` backend calls have happened when retry `attempt` is asked for.
        if attempt.saturating_add(1) >= self.max_attempts {
            return None;
        }
        self.inner.next_delay(attempt, waited)
    }
}

/// Stops once the cumulative planned wait would exceed `budget`. The wait is
/// the sum of delays already handed out, not measured time, so the bound
/// stays deterministic.
#[derive(Debug, Clone)]
pub struct LimitElapsed<S> {
    inner: S,
    budget: Duration,
}

impl<S: RetryStrategy> LimitElapsed<S> {
    pub fn new(inner: S, budget: Duration) -> Self {
        Self { inner, budget }
    }
}

impl<S: RetryStrategy> RetryStrategy for LimitElapsed<S> {
    fn next_delay(&self, attempt: u32, waited: Duration) -> Option<Duration> {
        let delay = self.inner.next_delay(attempt, waited)?;
        (waited.saturating_add(delay) <= self.budget).then_some(delay)
    }
}

/// Convenience constructors mirroring the names callers usually reach for.
pub fn no_retry() -> Arc<dyn RetryStrategy> {
    Arc::new(NoRetry)
}

pub fn fixed(interval: Duration) -> Arc<dyn RetryStrategy> {
    Arc::new(FixedBackoff::new(interval))
}

pub fn limit<S: RetryStrategy + 'static>(inner: S, max_attempts: u32) -> Arc<dyn RetryStrategy> {
    Arc::new(LimitRetry::new(inner, max_attempts))
}
