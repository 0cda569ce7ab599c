//! Lease-based distributed mutual exclusion on top of a key-value store.
//!
//! The store only needs four atomic primitives (see [`LeaseBackend`]); a
//! [`Locker`] builds obtain-with-retry, release, refresh and TTL inspection on
//! top of them and hands out [`Lock`] handles.

pub mod backend;
pub mod config;
pub mod context;
pub mod errors;
pub mod lock;
pub mod locker;
pub mod retry;

pub use backend::{LeaseBackend, MemoryBackend, RedisBackend};
pub use config::{BackoffKind, LockConfig, RetryConfig};
pub use context::{CancelCause, CancelHandle, Context};
pub use errors::{LockError, Result};
pub use lock::Lock;
pub use locker::{Locker, ObtainOptions, ObtainState};
pub use retry::{
    ExponentialBackoff, FixedBackoff, Jitter, LimitElapsed, LimitRetry, LinearBackoff, NoRetry,
    RetryStrategy,
};
