//! In-process lease store.
//!
//! Suitable for tests and single-process deployments. Expiry follows the
//! injected [`Clock`], so tests drive lease expiry with a
//! [`ManualClock`](leasekeep_common::ManualClock) instead of sleeping.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use leasekeep_common::{
    BackendError, BackendResult, Clock, SystemClock,
    time::{add_duration, remaining},
};

use super::LeaseBackend;

#[derive(Debug, Clone)]
struct LeaseRecord {
    token: String,
    expires_at: DateTime<Utc>,
}

impl LeaseRecord {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug)]
pub struct MemoryBackend {
    records: Mutex<HashMap<String, LeaseRecord>>,
    clock: Arc<dyn Clock>,
    unavailable: AtomicBool,
}

fn poison_err<T>(_: PoisonError<T>) -> BackendError {
    BackendError::Poisoned("memory lease table".to_string())
}

impl MemoryBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
            clock,
            unavailable: AtomicBool::new(false),
        }
    }

    /// Makes every subsequent call fail with [`BackendError::Unavailable`]
    /// until switched back, simulating a store that cannot be reached.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of records that have not yet expired.
    pub fn live_records(&self) -> BackendResult<usize> {
        let now = self.clock.now();
        let records = self.records.lock().map_err(poison_err)?;
        Ok(records.values().filter(|record| record.is_live(now)).count())
    }

    /// Drops every expired record and returns how many were removed. Single
    /// key operations only purge the key they touch, so long-lived tables with
    /// many abandoned keys should call this periodically.
    pub fn purge_expired(&self) -> BackendResult<usize> {
        let now = self.clock.now();
        let mut records = self.records.lock().map_err(poison_err)?;
        let before = records.len();
        records.retain(|_, record| record.is_live(now));
        Ok(before - records.len())
    }

    /// Locks the table with `key`'s expired record, if any, already removed.
    fn table(
        &self,
        key: &str,
    ) -> BackendResult<(MutexGuard<'_, HashMap<String, LeaseRecord>>, DateTime<Utc>)> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable(
                "memory backend switched offline".to_string(),
            ));
        }

        let now = self.clock.now();
        let mut records = self.records.lock().map_err(poison_err)?;
        if records.get(key).is_some_and(|record| !record.is_live(now)) {
            records.remove(key);
        }
        Ok((records, now))
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

#[async_trait]
impl LeaseBackend for MemoryBackend {
    async fn try_set(&self, key: &str, token: &str, ttl: Duration) -> BackendResult<bool> {
        let (mut records, now) = self.table(key)?;
        if records.contains_key(key) {
            return Ok(false);
        }

        records.insert(
            key.to_string(),
            LeaseRecord {
                token: token.to_string(),
                expires_at: add_duration(now, ttl),
            },
        );
        Ok(true)
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> BackendResult<bool> {
        let (mut records, _) = self.table(key)?;
        let owned = records
            .get(key)
            .is_some_and(|record| record.token == token);
        if owned {
            records.remove(key);
        }
        Ok(owned)
    }

    async fn compare_and_extend(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> BackendResult<bool> {
        let (mut records, now) = self.table(key)?;
        match records.get_mut(key) {
            Some(record) if record.token == token => {
                record.expires_at = add_duration(now, ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_ttl(&self, key: &str) -> BackendResult<Option<Duration>> {
        let (records, now) = self.table(key)?;
        Ok(records
            .get(key)
            .and_then(|record| remaining(now, record.expires_at)))
    }

    async fn get_token(&self, key: &str) -> BackendResult<Option<String>> {
        let (records, _) = self.table(key)?;
        Ok(records.get(key).map(|record| record.token.clone()))
    }
}
