//! Redis-backed lease store.
//!
//! Entries live in one Redis list. Appends use `MULTI` so `RPUSH` and
//! `EXPIRE` land together; removal is `LREM key 1 id`.

use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::time::Duration;
use tracing::instrument;

use super::LeaseStore;
use crate::config::AdmissionConfig;
use crate::errors::{BurstflowError, LeaseStoreError};

/// Lease store shared through a Redis list.
#[derive(Clone)]
pub struct RedisLeaseStore {
    conn: MultiplexedConnection,
    key: String,
}

impl RedisLeaseStore {
    /// Connects to Redis.
    ///
    /// # Arguments
    ///
    /// * `redis_url` - Redis connection URL (e.g., "redis://localhost:6379")
    /// * `key` - Name of the shared list
    pub async fn connect(redis_url: &str, key: impl Into<String>) -> Result<Self, LeaseStoreError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| LeaseStoreError::Connection(e.to_string()))?;
        let conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| LeaseStoreError::Connection(e.to_string()))?;

        Ok(Self {
            conn,
            key: key.into(),
        })
    }

    /// Connects to Redis using the list named by `config.lease_key`.
    pub async fn from_config(
        redis_url: &str,
        config: &AdmissionConfig,
    ) -> Result<Self, BurstflowError> {
        config.validate()?;
        Ok(Self::connect(redis_url, config.lease_key.clone()).await?)
    }

    /// Returns the list key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for RedisLeaseStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisLeaseStore")
            .field("key", &self.key)
            .finish_non_exhaustive()
    }
}

fn ttl_seconds(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs().max(1)).unwrap_or(i64::MAX)
}

fn command_error(e: &redis::RedisError) -> LeaseStoreError {
    LeaseStoreError::Command(e.to_string())
}

#[async_trait]
impl LeaseStore for RedisLeaseStore {
    #[instrument(skip(self), fields(key = %self.key))]
    async fn append(&self, entry_id: &str, ttl: Duration) -> Result<(), LeaseStoreError> {
        let mut conn = self.conn.clone();
        let _: () = redis::pipe()
            .atomic()
            .rpush(&self.key, entry_id)
            .ignore()
            .expire(&self.key, ttl_seconds(ttl))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error(&e))?;
        Ok(())
    }

    async fn count(&self) -> Result<usize, LeaseStoreError> {
        let mut conn = self.conn.clone();
        redis::cmd("LLEN")
            .arg(&self.key)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error(&e))
    }

    #[instrument(skip(self), fields(key = %self.key))]
    async fn remove(&self, entry_id: &str) -> Result<bool, LeaseStoreError> {
        let mut conn = self.conn.clone();
        let removed: usize = redis::cmd("LREM")
            .arg(&self.key)
            .arg(1)
            .arg(entry_id)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error(&e))?;
        Ok(removed > 0)
    }

    async fn set_ttl(&self, ttl: Duration) -> Result<(), LeaseStoreError> {
        let mut conn = self.conn.clone();
        let _: i64 = redis::cmd("EXPIRE")
            .arg(&self.key)
            .arg(ttl_seconds(ttl))
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error(&e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_seconds_rounds_up_to_one() {
        assert_eq!(ttl_seconds(Duration::from_millis(10)), 1);
        assert_eq!(ttl_seconds(Duration::from_secs(70)), 70);
    }

    #[tokio::test]
    async fn test_from_config_rejects_empty_lease_key() {
        let config = AdmissionConfig::default().with_lease_key("");
        let err = RedisLeaseStore::from_config("redis://127.0.0.1:6379", &config)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Config");
    }

    #[tokio::test]
    async fn test_from_config_reports_bad_url() {
        let config = AdmissionConfig::default().with_lease_key("sharedRequests");
        let err = RedisLeaseStore::from_config("not a redis url", &config)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "LeaseStore");
    }
}
