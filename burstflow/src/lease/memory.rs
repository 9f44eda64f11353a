//! In-process lease store.
//!
//! Share one instance behind an `Arc` between several controllers to model
//! independent processes pointing at the same store. Expiry is computed on
//! `tokio::time::Instant`, so tests with a paused clock can jump over the TTL.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::LeaseStore;
use crate::errors::LeaseStoreError;

#[derive(Debug, Default)]
struct LeaseList {
    entries: Vec<String>,
    expires_at: Option<Instant>,
}

impl LeaseList {
    fn purge_expired(&mut self, now: Instant) {
        if self.expires_at.is_some_and(|at| at <= now) {
            debug!(reclaimed = self.entries.len(), "Lease collection expired");
            self.entries.clear();
            self.expires_at = None;
        }
    }
}

/// Lease store kept in memory.
#[derive(Debug, Default)]
pub struct InMemoryLeaseStore {
    list: Mutex<LeaseList>,
}

impl InMemoryLeaseStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops every entry as if the collection TTL had lapsed.
    pub fn expire_now(&self) {
        let mut list = self.list.lock();
        list.entries.clear();
        list.expires_at = None;
    }

    /// Returns the remaining TTL, if the collection exists.
    #[must_use]
    pub fn ttl_remaining(&self) -> Option<Duration> {
        let now = Instant::now();
        let mut list = self.list.lock();
        list.purge_expired(now);
        list.expires_at.map(|at| at.saturating_duration_since(now))
    }

    /// Returns a snapshot of the live entry ids.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        let mut list = self.list.lock();
        list.purge_expired(Instant::now());
        list.entries.clone()
    }
}

#[async_trait]
impl LeaseStore for InMemoryLeaseStore {
    async fn append(&self, entry_id: &str, ttl: Duration) -> Result<(), LeaseStoreError> {
        let now = Instant::now();
        let mut list = self.list.lock();
        list.purge_expired(now);
        list.entries.push(entry_id.to_string());
        list.expires_at = Some(now + ttl);
        Ok(())
    }

    async fn count(&self) -> Result<usize, LeaseStoreError> {
        let mut list = self.list.lock();
        list.purge_expired(Instant::now());
        Ok(list.entries.len())
    }

    async fn remove(&self, entry_id: &str) -> Result<bool, LeaseStoreError> {
        let mut list = self.list.lock();
        list.purge_expired(Instant::now());

        let Some(position) = list.entries.iter().position(|e| e == entry_id) else {
            return Ok(false);
        };
        list.entries.remove(position);

        // An empty list no longer exists, so it carries no TTL either.
        if list.entries.is_empty() {
            list.expires_at = None;
        }
        Ok(true)
    }

    async fn set_ttl(&self, ttl: Duration) -> Result<(), LeaseStoreError> {
        let now = Instant::now();
        let mut list = self.list.lock();
        list.purge_expired(now);
        if !list.entries.is_empty() {
            list.expires_at = Some(now + ttl);
        }
        Ok(())
    }
}
