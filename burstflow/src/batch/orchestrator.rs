//! Batch fan-out/fan-in over independent item pipelines.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::group::TaskGroup;
use super::{BatchResult, FailureMode, FailureRecord, ItemOutcome};
use crate::errors::BurstflowError;
use crate::events::{default_sink, EventSink};

/// Runs one pipeline per item concurrently and aggregates the outcomes.
///
/// Concurrency is bounded by whatever admission controller the pipelines
/// use, not by the orchestrator: every item is scheduled at once.
#[derive(Clone)]
pub struct BatchOrchestrator {
    mode: FailureMode,
    events: Arc<dyn EventSink>,
}

impl Default for BatchOrchestrator {
    fn default() -> Self {
        Self::new(FailureMode::default())
    }
}

impl BatchOrchestrator {
    /// Creates an orchestrator with the given failure mode.
    #[must_use]
    pub fn new(mode: FailureMode) -> Self {
        Self {
            mode,
            events: default_sink(),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// The configured failure mode.
    #[must_use]
    pub fn mode(&self) -> FailureMode {
        self.mode
    }

    /// Runs `pipeline` for every item and waits for all of them.
    ///
    /// In [`FailureMode::FailFast`] the first item failure aborts the pipelines
    /// still running and is returned as [`BurstflowError::BatchAborted`]
    /// naming the item. In [`FailureMode::CollectAll`] failures are recorded
    /// in the result and the call itself only fails on a setup error.
    pub async fn run_batch<K, T, I, F, Fut>(
        &self,
        items: I,
        pipeline: F,
    ) -> Result<BatchResult<K, T>, BurstflowError>
    where
        I: IntoIterator<Item = K>,
        K: Clone + Display + PartialEq + Send + 'static,
        T: Send + 'static,
        F: Fn(K) -> Fut,
        Fut: Future<Output = Result<T, BurstflowError>> + Send + 'static,
    {
        let keys: Vec<K> = items.into_iter().collect();
        let started = Instant::now();
        info!(items = keys.len(), mode = ?self.mode, "Starting batch");

        let mut group = TaskGroup::new();
        for (index, key) in keys.iter().enumerate() {
            group.spawn(index, pipeline(key.clone()));
        }

        let mut outcomes: Vec<Option<ItemOutcome<T>>> = keys.iter().map(|_| None).collect();
        let mut completion_order = Vec::with_capacity(keys.len());

        while let Some((index, result)) = group.join_next().await {
            let key = &keys[index];
            completion_order.push(key.clone());

            match result {
                Ok(value) => {
                    debug!(item = %key, "Item completed");
                    self.events.emit(
                        "batch.item_completed",
                        Some(serde_json::json!({ "item": key.to_string() })),
                    );
                    outcomes[index] = Some(ItemOutcome::Succeeded(value));
                }
                Err(e) => {
                    let record = FailureRecord::from_error(key.to_string(), &e);
                    self.events.emit(
                        "batch.item_failed",
                        Some(serde_json::json!({
                            "item": record.item,
                            "error": e.to_dict(),
                        })),
                    );

                    if self.mode == FailureMode::FailFast {
                        error!(item = %key, error = %e, remaining = group.len(), "Item failed, aborting batch");
                        group.abort_all();
                        return Err(BurstflowError::batch_aborted(key.to_string(), e));
                    }

                    warn!(item = %key, error = %e, "Item failed");
                    outcomes[index] = Some(ItemOutcome::Failed(record));
                }
            }
        }

        let items: Vec<(K, ItemOutcome<T>)> = keys
            .into_iter()
            .zip(outcomes)
            .map(|(key, outcome)| {
                let outcome = outcome.unwrap_or_else(|| {
                    let e = BurstflowError::Join("item task did not complete".to_string());
                    ItemOutcome::Failed(FailureRecord::from_error(key.to_string(), &e))
                });
                (key, outcome)
            })
            .collect();
        let result = BatchResult::new(items, completion_order);

        // A task lost to a join error still fails a strict batch.
        if self.mode == FailureMode::FailFast {
            if let Some(record) = result.failures().next() {
                return Err(BurstflowError::batch_aborted(
                    record.item.clone(),
                    BurstflowError::Join(record.error.clone()),
                ));
            }
        }

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(
            succeeded = result.success_count(),
            failed = result.failure_count(),
            duration_ms,
            "Batch completed"
        );
        self.events.emit(
            "batch.completed",
            Some(serde_json::json!({
                "succeeded": result.success_count(),
                "failed": result.failure_count(),
                "duration_ms": duration_ms,
            })),
        );
        Ok(result)
    }
}

impl std::fmt::Debug for BatchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOrchestrator")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}
