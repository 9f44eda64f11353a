//! In-process admission controller.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::debug;
use uuid::Uuid;

use super::{AdmissionController, ConcurrencyToken};
use crate::errors::{AdmissionError, BurstflowError};
use crate::events::{default_sink, EventSink};

/// Caps in-flight operations within one process.
///
/// Slots are semaphore permits owned by the controller instance. Waiters are
/// woken when a permit is returned instead of polling on an interval.
pub struct LocalAdmissionController {
    id: Uuid,
    max_concurrency: usize,
    semaphore: Arc<Semaphore>,
    events: Arc<dyn EventSink>,
}

impl LocalAdmissionController {
    /// Creates a controller allowing `max_concurrency` concurrent holders.
    #[must_use]
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            id: Uuid::new_v4(),
            max_concurrency,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            events: default_sink(),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Rejects all current and future waiters.
    pub fn close(&self) {
        self.semaphore.close();
    }

    /// Slots currently free.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[async_trait]
impl AdmissionController for LocalAdmissionController {
    async fn acquire(&self) -> Result<ConcurrencyToken, BurstflowError> {
        let started = Instant::now();
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| AdmissionError::Closed)?;

        let token = ConcurrencyToken::new(Uuid::new_v4().to_string(), self.id, Some(permit));
        let waited_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        debug!(token_id = %token.id(), waited_ms, "Admission slot acquired");
        self.events.emit(
            "admission.acquired",
            Some(serde_json::json!({
                "token_id": token.id(),
                "waited_ms": waited_ms,
            })),
        );
        Ok(token)
    }

    async fn release(&self, mut token: ConcurrencyToken) -> Result<(), BurstflowError> {
        if token.owner() != self.id {
            return Err(AdmissionError::unknown_token(token.id()).into());
        }

        token.disarm();
        debug!(token_id = %token.id(), "Admission slot released");
        self.events.emit(
            "admission.released",
            Some(serde_json::json!({ "token_id": token.id() })),
        );
        Ok(())
    }

    fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    async fn outstanding(&self) -> Result<usize, BurstflowError> {
        Ok(self
            .max_concurrency
            .saturating_sub(self.semaphore.available_permits()))
    }
}

impl std::fmt::Debug for LocalAdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalAdmissionController")
            .field("max_concurrency", &self.max_concurrency)
            .field("available", &self.available())
            .finish()
    }
}
