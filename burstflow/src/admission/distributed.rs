//! Admission controller shared by independent processes.
//!
//! Slots are entries in a [`LeaseStore`]. The count check and the append are
//! two separate store calls, so two processes can both observe a free slot
//! and both append: the ceiling may be overshot briefly. Callers must treat
//! that as normal. A token dropped without release removes its lease on a
//! spawned task. A holder that dies outright is cleaned up when the
//! collection TTL lapses, which also frees every other live lease.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{AdmissionController, ConcurrencyToken, DropRelease};
use crate::config::AdmissionConfig;
use crate::errors::{AdmissionError, BurstflowError};
use crate::events::{default_sink, EventSink};
use crate::lease::{Lease, LeaseStore};

/// Caps in-flight operations across every process using the same store.
pub struct DistributedAdmissionController<S: LeaseStore + ?Sized = dyn LeaseStore> {
    id: Uuid,
    store: Arc<S>,
    max_concurrency: usize,
    poll_interval: Duration,
    lease_ttl: Duration,
    events: Arc<dyn EventSink>,
}

impl<S: LeaseStore + ?Sized> DistributedAdmissionController<S> {
    /// Creates a controller over `store` using the given admission settings.
    #[must_use]
    pub fn new(store: Arc<S>, config: &AdmissionConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            store,
            max_concurrency: config.max_concurrency,
            poll_interval: config.slot_poll_interval(),
            lease_ttl: config.lease_ttl(),
            events: default_sink(),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the underlying store.
    #[must_use]
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Re-applies the collection TTL so long-running holders keep their slots.
    pub async fn refresh(&self) -> Result<(), BurstflowError> {
        self.store.set_ttl(self.lease_ttl).await?;
        Ok(())
    }
}

impl<S: LeaseStore + ?Sized + 'static> DistributedAdmissionController<S> {
    fn drop_release(&self) -> DropRelease {
        let store = Arc::clone(&self.store);
        Box::new(move |lease_id: String| {
            let Ok(handle) = tokio::runtime::Handle::try_current() else {
                warn!(lease_id = %lease_id, "No runtime to remove dropped lease, leaving it to the TTL");
                return;
            };
            handle.spawn(async move {
                match store.remove(&lease_id).await {
                    Ok(removed) => debug!(lease_id = %lease_id, removed, "Dropped lease removed"),
                    Err(e) => warn!(lease_id = %lease_id, error = %e, "Failed to remove dropped lease"),
                }
            });
        })
    }
}

#[async_trait]
impl<S: LeaseStore + ?Sized + 'static> AdmissionController for DistributedAdmissionController<S> {
    async fn acquire(&self) -> Result<ConcurrencyToken, BurstflowError> {
        let lease = Lease::new();
        let mut checks: u32 = 0;

        loop {
            let held = self.store.count().await?;
            checks += 1;
            if held < self.max_concurrency {
                break;
            }
            if checks == 1 {
                debug!(
                    lease_id = %lease.id,
                    held,
                    max = self.max_concurrency,
                    "All shared slots busy, waiting"
                );
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        self.store.append(&lease.id, self.lease_ttl).await?;

        debug!(lease_id = %lease.id, checks, "Shared admission slot acquired");
        self.events.emit(
            "admission.acquired",
            Some(serde_json::json!({
                "token_id": lease.id,
                "checks": checks,
            })),
        );

        Ok(ConcurrencyToken::new(lease.id, self.id, None).with_drop_release(self.drop_release()))
    }

    async fn release(&self, mut token: ConcurrencyToken) -> Result<(), BurstflowError> {
        if token.owner() != self.id {
            return Err(AdmissionError::unknown_token(token.id()).into());
        }

        token.disarm();
        let removed = self.store.remove(token.id()).await?;
        if !removed {
            warn!(
                lease_id = %token.id(),
                "Lease already reclaimed by TTL before release"
            );
        }
        self.events.emit(
            "admission.released",
            Some(serde_json::json!({
                "token_id": token.id(),
                "reclaimed": !removed,
            })),
        );
        Ok(())
    }

    fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    async fn outstanding(&self) -> Result<usize, BurstflowError> {
        Ok(self.store.count().await?)
    }
}

impl<S: LeaseStore + ?Sized> std::fmt::Debug for DistributedAdmissionController<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedAdmissionController")
            .field("max_concurrency", &self.max_concurrency)
            .field("poll_interval", &self.poll_interval)
            .field("lease_ttl", &self.lease_ttl)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::with_slot;
    use crate::errors::LeaseStoreError;
    use crate::lease::{InMemoryLeaseStore, MockLeaseStore};
    use mockall::Sequence;

    fn config(max: usize) -> AdmissionConfig {
        AdmissionConfig::default().with_max_concurrency(max)
    }

    #[tokio::test(start_paused = true)]
    async fn test_two_processes_share_one_ceiling() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let a = DistributedAdmissionController::new(store.clone(), &config(2));
        let b = DistributedAdmissionController::new(store.clone(), &config(2));

        let t1 = a.acquire().await.unwrap();
        let t2 = b.acquire().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        let b = Arc::new(b);
        let waiter = {
            let b = b.clone();
            tokio::spawn(async move { b.acquire().await })
        };

        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert!(!waiter.is_finished());

        a.release(t1).await.unwrap();
        let t3 = waiter.await.unwrap().unwrap();
        assert_eq!(store.count().await.unwrap(), 2);

        b.release(t2).await.unwrap();
        b.release(t3).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_holder_reclaimed_after_ttl() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let controller = DistributedAdmissionController::new(store.clone(), &config(1));

        // Simulate a crash: the process is gone, nothing runs on its behalf.
        let token = controller.acquire().await.unwrap();
        std::mem::forget(token);
        assert_eq!(store.count().await.unwrap(), 1);

        let other = Arc::new(DistributedAdmissionController::new(store.clone(), &config(1)));
        let waiter = {
            let other = other.clone();
            tokio::spawn(async move { other.acquire().await })
        };

        tokio::time::sleep(Duration::from_secs(69)).await;
        assert!(!waiter.is_finished());

        tokio::time::sleep(Duration::from_secs(2)).await;
        let token = waiter.await.unwrap().unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
        other.release(token).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_release_after_reclaim_is_tolerated() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let controller = DistributedAdmissionController::new(store.clone(), &config(3));
        let token = controller.acquire().await.unwrap();

        tokio::time::advance(Duration::from_secs(71)).await;
        assert!(controller.release(token).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_keeps_lease_alive() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let controller = DistributedAdmissionController::new(store.clone(), &config(1));
        let token = controller.acquire().await.unwrap();

        tokio::time::advance(Duration::from_secs(60)).await;
        controller.refresh().await.unwrap();
        tokio::time::advance(Duration::from_secs(60)).await;

        assert_eq!(controller.outstanding().await.unwrap(), 1);
        controller.release(token).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_polls_count_then_appends_with_ttl() {
        let mut store = MockLeaseStore::new();
        let mut seq = Sequence::new();

        store
            .expect_count()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|| Ok(1));
        store
            .expect_count()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(0));
        store
            .expect_append()
            .withf(|entry_id, ttl| !entry_id.is_empty() && *ttl == Duration::from_secs(70))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        store
            .expect_remove()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(true));

        let controller = DistributedAdmissionController::new(Arc::new(store), &config(1));
        let token = controller.acquire().await.unwrap();
        controller.release(token).await.unwrap();
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let mut store = MockLeaseStore::new();
        store
            .expect_count()
            .returning(|| Err(LeaseStoreError::Connection("refused".to_string())));

        let controller = DistributedAdmissionController::new(Arc::new(store), &config(1));
        let err = controller.acquire().await.unwrap_err();
        assert!(matches!(err, BurstflowError::LeaseStore(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_token_removes_lease() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let controller = DistributedAdmissionController::new(store.clone(), &config(1));

        let token = controller.acquire().await.unwrap();
        assert_eq!(store.entries(), vec![token.id().to_string()]);
        drop(token);

        tokio::task::yield_now().await;
        assert!(store.entries().is_empty());
        let token = controller.acquire().await.unwrap();
        controller.release(token).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_holder_frees_lease() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let controller = Arc::new(DistributedAdmissionController::new(store.clone(), &config(1)));

        let holder = {
            let controller = controller.clone();
            tokio::spawn(async move {
                with_slot(controller.as_ref(), || tokio::time::sleep(Duration::from_secs(3600)))
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.entries().len(), 1);

        holder.abort();
        assert!(holder.await.unwrap_err().is_cancelled());
        tokio::task::yield_now().await;
        assert!(store.entries().is_empty());
    }

    #[tokio::test]
    async fn test_foreign_token_rejected() {
        let store = Arc::new(InMemoryLeaseStore::new());
        let a = DistributedAdmissionController::new(store.clone(), &config(2));
        let b = DistributedAdmissionController::new(store.clone(), &config(2));

        let token = a.acquire().await.unwrap();
        assert!(b.release(token).await.is_err());
    }
}
