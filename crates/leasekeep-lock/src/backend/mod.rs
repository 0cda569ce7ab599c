pub mod memory;
pub mod redis_store;
pub mod scripts;

use std::time::Duration;

use async_trait::async_trait;
use leasekeep_common::BackendResult;

pub use memory::MemoryBackend;
pub use redis_store::RedisBackend;

/// Atomic primitives a key-value store must expose to host lease records.
///
/// Each method must map onto a single atomic store operation (a native
/// conditional command or a scripted transaction). A `false` result means the
/// condition did not hold; an `Err` means the store could not be reached or
/// answered nonsense.
#[async_trait]
pub trait LeaseBackend: Send + Sync {
    /// Creates `key -> token` with expiry `ttl` only if no live record exists.
    async fn try_set(&self, key: &str, token: &str, ttl: Duration) -> BackendResult<bool>;

    /// Deletes the record only if its stored token equals `token`.
    async fn compare_and_delete(&self, key: &str, token: &str) -> BackendResult<bool>;

    /// Resets the record's expiry to `ttl` from now only if its stored token
    /// equals `token`.
    async fn compare_and_extend(&self, key: &str, token: &str, ttl: Duration)
    -> BackendResult<bool>;

    /// Remaining time-to-live, or `None` when no live record exists.
    async fn get_ttl(&self, key: &str) -> BackendResult<Option<Duration>>;

    /// Token of the current live record, if any.
    async fn get_token(&self, key: &str) -> BackendResult<Option<String>>;
}
