#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use leasekeep_common::BackendResult;
use leasekeep_lock::LeaseBackend;

/// Wraps a shared backend and counts the calls made through this wrapper.
pub struct CountingBackend {
    inner: Arc<dyn LeaseBackend>,
    try_sets: AtomicUsize,
    deletes: AtomicUsize,
}

impl CountingBackend {
    pub fn new(inner: Arc<dyn LeaseBackend>) -> Self {
        Self {
            inner,
            try_sets: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        }
    }

    pub fn try_sets(&self) -> usize {
        self.try_sets.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LeaseBackend for CountingBackend {
    async fn try_set(&self, key: &str, token: &str, ttl: Duration) -> BackendResult<bool> {
        self.try_sets.fetch_add(1, Ordering::SeqCst);
        self.inner.try_set(key, token, ttl).await
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> BackendResult<bool> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        self.inner.compare_and_delete(key, token).await
    }

    async fn compare_and_extend(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> BackendResult<bool> {
        self.inner.compare_and_extend(key, token, ttl).await
    }

    async fn get_ttl(&self, key: &str) -> BackendResult<Option<Duration>> {
        self.inner.get_ttl(key).await
    }

    async fn get_token(&self, key: &str) -> BackendResult<Option<String>> {
        self.inner.get_token(key).await
    }
}
