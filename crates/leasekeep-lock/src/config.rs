use std::{sync::Arc, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
    errors::{LockError, Result},
    retry::{
        ExponentialBackoff, FixedBackoff, Jitter, LimitElapsed, LimitRetry, LinearBackoff,
        NoRetry, RetryStrategy,
    },
};

pub const DEFAULT_TTL: Duration = Duration::from_secs(30);
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_RETRY_MAX_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    None,
    Fixed,
    Linear,
    Exponential,
}

impl BackoffKind {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "none" | "no_retry" => Ok(Self::None),
            "fixed" => Ok(Self::Fixed),
            "linear" => Ok(Self::Linear),
            "exponential" | "exp" => Ok(Self::Exponential),
            other => Err(LockError::Config(format!("unknown retry strategy: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub strategy: BackoffKind,
    /// Fixed interval, linear step, or exponential minimum.
    pub interval_ms: u64,
    /// Cap for linear and exponential delays.
    pub max_interval_ms: u64,
    pub factor: f64,
    pub jitter_ms: u64,
    pub jitter_seed: Option<u64>,
    pub max_attempts: Option<u32>,
    /// Upper bound on the summed backoff delays of one obtain.
    pub max_wait_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            strategy: BackoffKind::Exponential,
            interval_ms: millis(DEFAULT_RETRY_INTERVAL),
            max_interval_ms: millis(DEFAULT_RETRY_MAX_INTERVAL),
            factor: ExponentialBackoff::DEFAULT_FACTOR,
            jitter_ms: 0,
            jitter_seed: None,
            max_attempts: None,
            max_wait_ms: None,
        }
    }
}

impl RetryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.strategy != BackoffKind::None && self.interval_ms == 0 {
            return Err(LockError::Config(
                "retry interval_ms must be greater than zero".to_string(),
            ));
        }
        if matches!(self.strategy, BackoffKind::Linear | BackoffKind::Exponential)
            && self.max_interval_ms < self.interval_ms
        {
            return Err(LockError::Config(format!(
                "retry max_interval_ms ({}) is below interval_ms ({})",
                self.max_interval_ms, self.interval_ms
            )));
        }
        if !self.factor.is_finite() || self.factor < 1.0 {
            return Err(LockError::Config(format!(
                "retry factor must be a finite value >= 1.0, got {}",
                self.factor
            )));
        }
        if self.max_attempts == Some(0) {
            return Err(LockError::Config(
                "retry max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn build(&self) -> Result<Arc<dyn RetryStrategy>> {
        self.validate()?;

        let interval = Duration::from_millis(self.interval_ms);
        let max_interval = Duration::from_millis(self.max_interval_ms);
        let jitter = (self.jitter_ms > 0).then(|| {
            let max = Duration::from_millis(self.jitter_ms);
            match self.jitter_seed {
                Some(seed) => Jitter::with_seed(max, seed),
                None => Jitter::new(max),
            }
        });

        let base: Box<dyn RetryStrategy> = match self.strategy {
            BackoffKind::None => Box::new(NoRetry),
            BackoffKind::Fixed => {
                let fixed = FixedBackoff::new(interval);
                Box::new(match jitter {
                    Some(jitter) => fixed.with_jitter(jitter),
                    None => fixed,
                })
            }
            BackoffKind::Linear => Box::new(LinearBackoff::new(interval, max_interval)),
            BackoffKind::Exponential => {
                let exponential =
                    ExponentialBackoff::new(interval, max_interval).with_factor(self.factor);
                Box::new(match jitter {
                    Some(jitter) => exponential.with_jitter(jitter),
                    None => exponential,
                })
            }
        };

        let bounded: Box<dyn RetryStrategy> = match self.max_wait_ms {
            Some(max_wait) => Box::new(LimitElapsed::new(base, Duration::from_millis(max_wait))),
            None => base,
        };

        let strategy: Arc<dyn RetryStrategy> = match self.max_attempts {
            Some(max_attempts) => Arc::new(LimitRetry::new(bounded, max_attempts)),
            None => Arc::from(bounded),
        };
        Ok(strategy)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    pub default_ttl_ms: u64,
    pub retry: RetryConfig,
    /// Treat backend failures during obtain as failed attempts and keep
    /// retrying instead of aborting.
    pub retry_on_backend_error: bool,
    /// When the caller's context has no deadline, stop retrying once the
    /// requested lease duration has elapsed.
    pub bound_wait_by_ttl: bool,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            default_ttl_ms: millis(DEFAULT_TTL),
            retry: RetryConfig::default(),
            retry_on_backend_error: false,
            bound_wait_by_ttl: true,
        }
    }
}

impl LockConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.default_ttl_ms == 0 {
            return Err(LockError::Config(
                "default_ttl_ms must be greater than zero".to_string(),
            ));
        }
        self.retry.validate()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| LockError::Config(format!("invalid lock config json: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overridden by any `LEASEKEEP_*` variables that are set.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            lookup(name)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let mut config = Self::default();
        if let Some(value) = var("LEASEKEEP_TTL_MS") {
            config.default_ttl_ms = parse_var("LEASEKEEP_TTL_MS", &value)?;
        }
        if let Some(value) = var("LEASEKEEP_RETRY_STRATEGY") {
            config.retry.strategy = BackoffKind::parse(&value)?;
        }
        if let Some(value) = var("LEASEKEEP_RETRY_INTERVAL_MS") {
            config.retry.interval_ms = parse_var("LEASEKEEP_RETRY_INTERVAL_MS", &value)?;
        }
        if let Some(value) = var("LEASEKEEP_RETRY_MAX_INTERVAL_MS") {
            config.retry.max_interval_ms = parse_var("LEASEKEEP_RETRY_MAX_INTERVAL_MS", &value)?;
        }
        if let Some(value) = var("LEASEKEEP_RETRY_FACTOR") {
            config.retry.factor = parse_var("LEASEKEEP_RETRY_FACTOR", &value)?;
        }
        if let Some(value) = var("LEASEKEEP_RETRY_JITTER_MS") {
            config.retry.jitter_ms = parse_var("LEASEKEEP_RETRY_JITTER_MS", &value)?;
        }
        if let Some(value) = var("LEASEKEEP_RETRY_MAX_ATTEMPTS") {
            config.retry.max_attempts = Some(parse_var("LEASEKEEP_RETRY_MAX_ATTEMPTS", &value)?);
        }
        if let Some(value) = var("LEASEKEEP_RETRY_MAX_WAIT_MS") {
            config.retry.max_wait_ms = Some(parse_var("LEASEKEEP_RETRY_MAX_WAIT_MS", &value)?);
        }
        if let Some(value) = var("LEASEKEEP_RETRY_ON_BACKEND_ERROR") {
            config.retry_on_backend_error = parse_var("LEASEKEEP_RETRY_ON_BACKEND_ERROR", &value)?;
        }
        if let Some(value) = var("LEASEKEEP_BOUND_WAIT_BY_TTL") {
            config.bound_wait_by_ttl = parse_var("LEASEKEEP_BOUND_WAIT_BY_TTL", &value)?;
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|err| LockError::Config(format!("{name}={value}: {err}")))
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let config = LockConfig::default();
        config.validate().expect("valid");
        assert_eq!(config.default_ttl(), DEFAULT_TTL);
        assert!(config.bound_wait_by_ttl);
        assert!(!config.retry_on_backend_error);
    }

    #[test]
    fn env_overrides_defaults() {
        let config = LockConfig::from_lookup(lookup(&[
            ("LEASEKEEP_TTL_MS", "8000"),
            ("LEASEKEEP_RETRY_STRATEGY", "fixed"),
            ("LEASEKEEP_RETRY_INTERVAL_MS", "1000"),
            ("LEASEKEEP_RETRY_MAX_ATTEMPTS", "10"),
            ("LEASEKEEP_RETRY_ON_BACKEND_ERROR", "true"),
            ("LEASEKEEP_BOUND_WAIT_BY_TTL", " "),
        ]))
        .expect("config");

        assert_eq!(config.default_ttl(), Duration::from_secs(8));
        assert_eq!(config.retry.strategy, BackoffKind::Fixed);
        assert_eq!(config.retry.interval_ms, 1000);
        assert_eq!(config.retry.max_attempts, Some(10));
        assert!(config.retry_on_backend_error);
        assert!(config.bound_wait_by_ttl);
    }

    #[test]
    fn env_rejects_garbage() {
        let err = LockConfig::from_lookup(lookup(&[("LEASEKEEP_TTL_MS", "soon")]))
            .expect_err("bad ttl");
        assert!(err.to_string().contains("LEASEKEEP_TTL_MS=soon"));

        let err = LockConfig::from_lookup(lookup(&[("LEASEKEEP_RETRY_STRATEGY", "random")]))
            .expect_err("bad strategy");
        assert!(matches!(err, LockError::Config(_)));
    }

    #[test]
    fn json_fills_missing_fields_with_defaults() {
        let config = LockConfig::from_json(
            r#"{"default_ttl_ms": 2000, "retry": {"strategy": "linear", "interval_ms": 50, "max_interval_ms": 200}}"#,
        )
        .expect("config");

        assert_eq!(config.default_ttl(), Duration::from_secs(2));
        assert_eq!(config.retry.strategy, BackoffKind::Linear);
        assert_eq!(config.retry.factor, ExponentialBackoff::DEFAULT_FACTOR);
        assert!(config.bound_wait_by_ttl);
    }

    #[test]
    fn validation_catches_inconsistent_retry_settings() {
        let mut retry = RetryConfig {
            strategy: BackoffKind::Linear,
            interval_ms: 500,
            max_interval_ms: 100,
            ..RetryConfig::default()
        };
        assert!(retry.validate().is_err());

        retry.max_interval_ms = 1000;
        retry.max_attempts = Some(0);
        assert!(retry.validate().is_err());

        retry.max_attempts = Some(1);
        retry.factor = 0.5;
        assert!(retry.validate().is_err());

        let zero_ttl = LockConfig {
            default_ttl_ms: 0,
            ..LockConfig::default()
        };
        assert!(zero_ttl.validate().is_err());
    }

    #[test]
    fn build_applies_decorators() {
        let strategy = RetryConfig {
            strategy: BackoffKind::Fixed,
            interval_ms: 100,
            max_attempts: Some(3),
            ..RetryConfig::default()
        }
        .build()
        .expect("strategy");

        let waited = Duration::from_millis(100);
        assert_eq!(strategy.next_delay(0, Duration::ZERO), Some(waited));
        assert_eq!(strategy.next_delay(1, waited), Some(waited));
        assert_eq!(strategy.next_delay(2, waited * 2), None);

        let bounded = RetryConfig {
            strategy: BackoffKind::Fixed,
            interval_ms: 100,
            max_wait_ms: Some(150),
            ..RetryConfig::default()
        }
        .build()
        .expect("strategy");
        assert_eq!(bounded.next_delay(0, Duration::ZERO), Some(Duration::from_millis(100)));
        assert_eq!(bounded.next_delay(1, Duration::from_millis(100)), None);
    }

    #[test]
    fn none_strategy_ignores_interval() {
        let strategy = RetryConfig {
            strategy: BackoffKind::None,
            interval_ms: 0,
            ..RetryConfig::default()
        }
        .build()
        .expect("strategy");
        assert_eq!(strategy.next_delay(0, Duration::ZERO), None);
    }
}
