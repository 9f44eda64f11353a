//! Admission control: bounding how many remote calls are in flight.
//!
//! This module provides:
//! - [`ConcurrencyToken`], the handle for one occupied slot
//! - [`AdmissionController`], the acquire/release contract
//! - [`LocalAdmissionController`] for a single process
//! - [`DistributedAdmissionController`] for processes sharing a [`crate::lease::LeaseStore`]
//! - [`with_slot`] for scoped acquisition

mod distributed;
mod local;

pub use distributed::DistributedAdmissionController;
pub use local::LocalAdmissionController;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use tokio::sync::OwnedSemaphorePermit;
use tracing::warn;
use uuid::Uuid;

use crate::errors::BurstflowError;

/// Hook run with the token id when a token is dropped without release.
pub(crate) type DropRelease = Box<dyn FnOnce(String) + Send + Sync>;

/// One occupied admission slot.
///
/// Tokens are not `Clone`: releasing consumes the token, so a slot can only
/// be handed back once. A token dropped without release still frees its
/// slot: local tokens return their permit, shared-store tokens schedule the
/// removal of their lease. Only a process that dies outright leaves its
/// lease to the TTL.
pub struct ConcurrencyToken {
    id: String,
    acquired_at: DateTime<Utc>,
    owner: Uuid,
    permit: Option<OwnedSemaphorePermit>,
    on_drop: Option<DropRelease>,
}

impl ConcurrencyToken {
    pub(crate) fn new(id: String, owner: Uuid, permit: Option<OwnedSemaphorePermit>) -> Self {
        Self {
            id,
            acquired_at: Utc::now(),
            owner,
            permit,
            on_drop: None,
        }
    }

    /// Sets the hook run if the token is dropped unreleased.
    pub(crate) fn with_drop_release(mut self, hook: DropRelease) -> Self {
        self.on_drop = Some(hook);
        self
    }

    /// Marks the token as released so dropping it does nothing further.
    pub(crate) fn disarm(&mut self) {
        self.on_drop = None;
        drop(self.permit.take());
    }

    /// Unique id of this acquisition.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// When the slot was granted.
    #[must_use]
    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    pub(crate) fn owner(&self) -> Uuid {
        self.owner
    }
}

impl Drop for ConcurrencyToken {
    fn drop(&mut self) {
        if let Some(hook) = self.on_drop.take() {
            warn!(token_id = %self.id, "Admission token dropped without release");
            hook(std::mem::take(&mut self.id));
        }
    }
}

impl std::fmt::Debug for ConcurrencyToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencyToken")
            .field("id", &self.id)
            .field("acquired_at", &self.acquired_at)
            .field("local", &self.permit.is_some())
            .finish_non_exhaustive()
    }
}

/// Enforces a ceiling on concurrently outstanding operations.
#[async_trait]
pub trait AdmissionController: Send + Sync {
    /// Waits until a slot is free and takes it.
    async fn acquire(&self) -> Result<ConcurrencyToken, BurstflowError>;

    /// Returns a slot.
    ///
    /// Fails with [`crate::errors::AdmissionError::UnknownToken`] if the token
    /// was issued by a different controller.
    async fn release(&self, token: ConcurrencyToken) -> Result<(), BurstflowError>;

    /// The configured ceiling.
    fn max_concurrency(&self) -> usize;

    /// Number of slots currently held.
    async fn outstanding(&self) -> Result<usize, BurstflowError>;
}

/// Runs `operation` while holding one slot.
///
/// The slot is released after the operation finishes, whatever its output.
/// A failed release is logged rather than returned: the operation already
/// ran. If the returned future is dropped mid-operation (an aborted task,
/// a caught panic) the token's drop hook frees the slot instead.
pub async fn with_slot<C, F, Fut, T>(controller: &C, operation: F) -> Result<T, BurstflowError>
where
    C: AdmissionController + ?Sized,
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let token = controller.acquire().await?;
    let token_id = token.id().to_string();

    let output = operation().await;

    if let Err(e) = controller.release(token).await {
        warn!(token_id = %token_id, error = %e, "Failed to release admission slot");
    }

    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_with_slot_releases_after_operation() {
        let controller = LocalAdmissionController::new(1);

        let value = with_slot(&controller, || async {
            assert_eq!(controller.outstanding().await.unwrap(), 1);
            7
        })
        .await
        .unwrap();

        assert_eq!(value, 7);
        assert_eq!(controller.outstanding().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_with_slot_releases_when_operation_fails() {
        let controller: Arc<dyn AdmissionController> = Arc::new(LocalAdmissionController::new(2));

        let result: Result<Result<(), String>, _> =
            with_slot(controller.as_ref(), || async { Err("boom".to_string()) }).await;

        assert_eq!(result.unwrap(), Err("boom".to_string()));
        assert_eq!(controller.outstanding().await.unwrap(), 0);
    }
}
