//! Batch fan-out/fan-in.
//!
//! This module provides:
//! - [`BatchOrchestrator`], running one task per item and joining them
//! - [`ItemPipeline`], the admission + retry + polling chain for one item
//! - [`BatchResult`], per-item outcomes in input order
//! - [`FailureMode`], strict fail-fast or collect-all

mod group;
mod orchestrator;
mod pipeline;

pub use orchestrator::BatchOrchestrator;
pub use pipeline::ItemPipeline;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::BurstflowError;

/// How a batch reacts to an item failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FailureMode {
    /// Abort the batch on the first item failure (default).
    #[default]
    FailFast,
    /// Run every item and record failures next to successes.
    CollectAll,
}

/// Record of one failed item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    /// Item key.
    pub item: String,
    /// Error message.
    pub error: String,
    /// Error type name.
    pub error_type: String,
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
}

impl FailureRecord {
    /// Creates a record from an item failure.
    #[must_use]
    pub fn from_error(item: impl Into<String>, error: &BurstflowError) -> Self {
        Self {
            item: item.into(),
            error: error.to_string(),
            error_type: error.kind().to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Outcome of one item pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome<T> {
    /// The pipeline produced a value.
    Succeeded(T),
    /// The pipeline failed.
    Failed(FailureRecord),
}

/// Results of a batch, kept in item input order.
#[derive(Debug, Clone)]
pub struct BatchResult<K, T> {
    items: Vec<(K, ItemOutcome<T>)>,
    completion_order: Vec<K>,
}

impl<K: PartialEq, T> BatchResult<K, T> {
    pub(crate) fn new(items: Vec<(K, ItemOutcome<T>)>, completion_order: Vec<K>) -> Self {
        Self {
            items,
            completion_order,
        }
    }

    /// Outcome for one item.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<&ItemOutcome<T>> {
        self.items
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, outcome)| outcome)
    }

    /// Every item with its outcome, in input order.
    #[must_use]
    pub fn items(&self) -> &[(K, ItemOutcome<T>)] {
        &self.items
    }

    /// Successful items in input order.
    pub fn successes(&self) -> impl Iterator<Item = (&K, &T)> {
        self.items.iter().filter_map(|(k, outcome)| match outcome {
            ItemOutcome::Succeeded(value) => Some((k, value)),
            ItemOutcome::Failed(_) => None,
        })
    }

    /// Failure records in input order.
    pub fn failures(&self) -> impl Iterator<Item = &FailureRecord> {
        self.items.iter().filter_map(|(_, outcome)| match outcome {
            ItemOutcome::Succeeded(_) => None,
            ItemOutcome::Failed(record) => Some(record),
        })
    }

    /// Item keys in the order their pipelines finished.
    #[must_use]
    pub fn completion_order(&self) -> &[K] {
        &self.completion_order
    }

    /// Number of successful items.
    #[must_use]
    pub fn success_count(&self) -> usize {
        self.successes().count()
    }

    /// Number of failed items.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.failures().count()
    }

    /// Whether every item succeeded.
    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.failure_count() == 0
    }

    /// Consumes the result, returning successful values in input order.
    #[must_use]
    pub fn into_values(self) -> Vec<T> {
        self.items
            .into_iter()
            .filter_map(|(_, outcome)| match outcome {
                ItemOutcome::Succeeded(value) => Some(value),
                ItemOutcome::Failed(_) => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::RemoteError;

    #[test]
    fn test_batch_result_accessors() {
        let failure = FailureRecord::from_error(
            "b",
            &BurstflowError::ExhaustedRetries {
                attempts: 5,
                last_error: RemoteError::transient("reset"),
            },
        );
        let result = BatchResult::new(
            vec![
                ("a", ItemOutcome::Succeeded(1)),
                ("b", ItemOutcome::Failed(failure)),
                ("c", ItemOutcome::Succeeded(3)),
            ],
            vec!["c", "b", "a"],
        );

        assert_eq!(result.success_count(), 2);
        assert_eq!(result.failure_count(), 1);
        assert!(!result.all_succeeded());
        assert!(matches!(result.get(&"c"), Some(ItemOutcome::Succeeded(3))));
        assert_eq!(result.failures().next().unwrap().error_type, "ExhaustedRetries");
        assert_eq!(result.completion_order(), &["c", "b", "a"]);
        assert_eq!(result.into_values(), vec![1, 3]);
    }
}
