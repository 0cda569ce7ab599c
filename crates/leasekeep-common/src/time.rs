use std::{
    fmt,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Source of "now" and the suspension primitive used between lock attempts.
///
/// Everything that reasons about lease expiry or waits between retries goes
/// through this trait so tests can substitute [`ManualClock`] and run without
/// real wall-clock waits.
#[async_trait]
pub trait Clock: Send + Sync + fmt::Debug {
    /// Returns the current instant.
    fn now(&self) -> DateTime<Utc>;

    /// Suspends the calling task for `duration`.
    async fn sleep(&self, duration: Duration);

    /// Suspends the calling task until `deadline`. Returns immediately when the
    /// deadline is already in the past.
    async fn sleep_until(&self, deadline: DateTime<Utc>) {
        let remaining = deadline - self.now();
        if let Ok(remaining) = remaining.to_std()
            && !remaining.is_zero()
        {
            self.sleep(remaining).await;
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock for deterministic tests.
///
/// `sleep` advances the clock by the requested duration and returns after a
/// single yield, recording every requested duration so tests can assert the
/// backoff sequence.
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

#[derive(Debug)]
struct ManualState {
    now: DateTime<Utc>,
    sleeps: Vec<Duration>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: start,
                sleeps: Vec::new(),
            }),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.now = add_duration(state.now, duration);
    }

    /// Durations passed to `sleep`, in call order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sleeps
            .clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps().iter().sum()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .now
    }

    async fn sleep(&self, duration: Duration) {
        {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            state.now = add_duration(state.now, duration);
            state.sleeps.push(duration);
        }
        tokio::task::yield_now().await;
    }
}

/// Adds a std duration to a timestamp, saturating at the maximum representable
/// instant instead of overflowing.
pub fn add_duration(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Time left until `deadline`, or `None` once it has passed.
pub fn remaining(now: DateTime<Utc>, deadline: DateTime<Utc>) -> Option<Duration> {
    (deadline - now)
        .to_std()
        .ok()
        .filter(|remaining| !remaining.is_zero())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_clock_sleep_advances_time() {
        let clock = ManualClock::default();
        let start = clock.now();

        clock.sleep(Duration::from_millis(250)).await;
        clock.sleep(Duration::from_millis(750)).await;

        assert_eq!((clock.now() - start).num_milliseconds(), 1000);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(250), Duration::from_millis(750)]
        );
        assert_eq!(clock.total_slept(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn sleep_until_past_deadline_returns_immediately() {
        let clock = ManualClock::default();
        let past = clock.now() - chrono::Duration::seconds(5);

        clock.sleep_until(past).await;

        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn sleep_until_future_deadline_sleeps_the_gap() {
        let clock = ManualClock::default();
        let deadline = add_duration(clock.now(), Duration::from_secs(3));

        clock.sleep_until(deadline).await;

        assert_eq!(clock.sleeps(), vec![Duration::from_secs(3)]);
        assert_eq!(clock.now(), deadline);
    }

    #[tokio::test(start_paused = true)]
    async fn system_clock_sleep_uses_tokio_timer() {
        let started = tokio::time::Instant::now();
        SystemClock.sleep(Duration::from_secs(2)).await;
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[test]
    fn remaining_is_none_once_deadline_passes() {
        let now = Utc::now();
        assert_eq!(
            remaining(now, add_duration(now, Duration::from_millis(40))),
            Some(Duration::from_millis(40))
        );
        assert_eq!(remaining(now, now), None);
        assert_eq!(remaining(now, now - chrono::Duration::seconds(1)), None);
    }
}
