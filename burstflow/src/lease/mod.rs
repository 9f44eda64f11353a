//! Shared lease collections for cross-process admission.
//!
//! A lease store is a single list of entry ids with one TTL covering the
//! whole list. Appending refreshes the TTL; if every holder stops refreshing
//! (for instance because they crashed), the whole list expires and all slots
//! are reclaimed at once.

mod memory;
#[cfg(feature = "redis")]
mod redis_store;

pub use memory::InMemoryLeaseStore;
#[cfg(feature = "redis")]
pub use redis_store::RedisLeaseStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::errors::LeaseStoreError;

/// The externally visible record of one held admission slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    /// Random entry id written to the store.
    pub id: String,
    /// When the lease was taken.
    pub acquired_at: DateTime<Utc>,
}

impl Lease {
    /// Creates a lease with a fresh random id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            acquired_at: Utc::now(),
        }
    }
}

impl Default for Lease {
    fn default() -> Self {
        Self::new()
    }
}

/// Capability interface over a shared, self-expiring entry collection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LeaseStore: Send + Sync {
    /// Appends an entry and refreshes the collection TTL in one operation.
    async fn append(&self, entry_id: &str, ttl: Duration) -> Result<(), LeaseStoreError>;

    /// Returns the number of live entries.
    async fn count(&self) -> Result<usize, LeaseStoreError>;

    /// Removes one occurrence of an entry.
    ///
    /// Returns false if the entry was not present, which happens when the
    /// collection already expired.
    async fn remove(&self, entry_id: &str) -> Result<bool, LeaseStoreError>;

    /// Re-applies the TTL to the whole collection.
    async fn set_ttl(&self, ttl: Duration) -> Result<(), LeaseStoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_ids_are_unique() {
        let a = Lease::new();
        let b = Lease::new();
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 32);
    }
}
