use std::time::Duration;

use ::redis::{
    AsyncCommands, Client, ErrorKind, RedisError, Script, aio::MultiplexedConnection, cmd,
};
use async_trait::async_trait;
use leasekeep_common::{BackendError, BackendResult};
use tracing::debug;

use super::{
    LeaseBackend,
    scripts::{COMPARE_AND_DELETE, COMPARE_AND_EXTEND},
};

/// Lease records stored as plain Redis string keys holding the holder token,
/// with the lease enforced by the key's native expiry.
#[derive(Clone)]
pub struct RedisBackend {
    conn: MultiplexedConnection,
    compare_and_delete: Script,
    compare_and_extend: Script,
}

impl RedisBackend {
    pub async fn connect(url: &str) -> BackendResult<Self> {
        let client = Client::open(url).map_err(map_redis_err)?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(map_redis_err)?;
        debug!(url, "connected to redis lease backend");
        Ok(Self::from_connection(conn))
    }

    pub fn from_connection(conn: MultiplexedConnection) -> Self {
        Self {
            conn,
            compare_and_delete: Script::new(COMPARE_AND_DELETE),
            compare_and_extend: Script::new(COMPARE_AND_EXTEND),
        }
    }
}

#[async_trait]
impl LeaseBackend for RedisBackend {
    async fn try_set(&self, key: &str, token: &str, ttl: Duration) -> BackendResult<bool> {
        let mut conn = self.conn.clone();
        let reply: Option<String> = cmd("SET")
            .arg(key)
            .arg(token)
            .arg("NX")
            .arg("PX")
            .arg(ttl_millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(reply.is_some())
    }

    async fn compare_and_delete(&self, key: &str, token: &str) -> BackendResult<bool> {
        let mut conn = self.conn.clone();
        let deleted: i64 = self
            .compare_and_delete
            .key(key)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(deleted == 1)
    }

    async fn compare_and_extend(
        &self,
        key: &str,
        token: &str,
        ttl: Duration,
    ) -> BackendResult<bool> {
        let mut conn = self.conn.clone();
        let extended: i64 = self
            .compare_and_extend
            .key(key)
            .arg(token)
            .arg(ttl_millis(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(map_redis_err)?;
        Ok(extended == 1)
    }

    async fn get_ttl(&self, key: &str) -> BackendResult<Option<Duration>> {
        let mut conn = self.conn.clone();
        let millis: i64 = conn.pttl(key).await.map_err(map_redis_err)?;
        pttl_to_duration(millis)
    }

    async fn get_token(&self, key: &str) -> BackendResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(map_redis_err)
    }
}

/// Redis expiries have millisecond granularity; round up so a non-zero lease
/// never becomes an invalid `PX 0`.
fn ttl_millis(ttl: Duration) -> u64 {
    let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
    if Duration::from_millis(millis) < ttl {
        millis.saturating_add(1)
    } else {
        millis.max(1)
    }
}

fn pttl_to_duration(millis: i64) -> BackendResult<Option<Duration>> {
    match millis {
        // -2: no such key
        -2 => Ok(None),
        // -1: key exists without expiry, never written by this backend
        -1 => Err(BackendError::Protocol(
            "lease key has no expiry".to_string(),
        )),
        0 => Ok(None),
        millis if millis > 0 => Ok(Some(Duration::from_millis(millis.unsigned_abs()))),
        other => Err(BackendError::Protocol(format!(
            "unexpected PTTL reply {other}"
        ))),
    }
}

fn map_redis_err(err: RedisError) -> BackendError {
    let io_like = err.is_io_error()
        || err.is_connection_dropped()
        || err.is_connection_refusal()
        || err.is_timeout();
    if io_like || matches!(err.kind(), ErrorKind::IoError | ErrorKind::BusyLoadingError) {
        BackendError::Unavailable(err.to_string())
    } else {
        BackendError::Protocol(err.to_string())
    }
}
