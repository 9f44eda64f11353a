//! The retry loop.

use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{backoff_delay, ErrorClassifier, FailureClass};
use crate::admission::{with_slot, AdmissionController};
use crate::config::RetryConfig;
use crate::errors::{BurstflowError, RemoteError};
use crate::events::{default_sink, EventSink};

/// Progress of one retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    /// Current attempt number (1-based, 0 before the first attempt).
    pub attempt: u32,
    /// Attempt ceiling.
    pub max_attempts: u32,
    /// Error from the most recent failed attempt.
    pub last_error: Option<RemoteError>,
}

impl RetryState {
    /// Creates a fresh state.
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
            last_error: None,
        }
    }

    /// Starts the next attempt and returns its number.
    pub fn begin_attempt(&mut self) -> u32 {
        self.attempt += 1;
        self.attempt
    }

    /// Records a failed attempt.
    pub fn record_failure(&mut self, error: RemoteError) {
        self.last_error = Some(error);
    }

    /// Returns true once every allowed attempt has been used.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Converts the final state into an exhaustion error.
    #[must_use]
    pub fn into_error(self) -> BurstflowError {
        BurstflowError::ExhaustedRetries {
            attempts: self.attempt,
            last_error: self
                .last_error
                .unwrap_or_else(|| RemoteError::transient("no attempt recorded")),
        }
    }
}

/// Successful end of a retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    /// The operation returned a value.
    Success {
        /// The value.
        value: T,
        /// Attempts used, including the successful one.
        attempts: u32,
    },
    /// The operation reported a legitimately empty resource.
    Empty {
        /// Attempts used.
        attempts: u32,
    },
}

impl<T> RetryOutcome<T> {
    /// Attempts used.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Success { attempts, .. } | Self::Empty { attempts } => *attempts,
        }
    }

    /// Returns the value, or `None` for an empty result.
    #[must_use]
    pub fn into_option(self) -> Option<T> {
        match self {
            Self::Success { value, .. } => Some(value),
            Self::Empty { .. } => None,
        }
    }

    /// Whether the loop ended with an empty result.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty { .. })
    }
}

/// Runs operations under a bounded-attempt policy.
///
/// Every attempt holds its own admission slot for exactly the duration of
/// the attempt; the slot is returned before any backoff delay.
#[derive(Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    admission: Arc<dyn AdmissionController>,
    events: Arc<dyn EventSink>,
}

impl RetryExecutor {
    /// Creates an executor gated by `admission`.
    #[must_use]
    pub fn new(config: RetryConfig, admission: Arc<dyn AdmissionController>) -> Self {
        Self {
            config,
            admission,
            events: default_sink(),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the admission controller.
    #[must_use]
    pub fn admission(&self) -> &Arc<dyn AdmissionController> {
        &self.admission
    }

    /// Returns the retry config.
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `operation` until it succeeds, reports an empty result, or
    /// exhausts its attempts.
    ///
    /// `operation` receives the 1-based attempt number. `key` only labels
    /// logs and events.
    pub async fn execute<T, F, Fut, C>(
        &self,
        key: &str,
        mut operation: F,
        classifier: &C,
    ) -> Result<RetryOutcome<T>, BurstflowError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
        C: ErrorClassifier + ?Sized,
    {
        let mut state = RetryState::new(self.config.max_attempts);

        loop {
            let attempt = state.begin_attempt();
            let result = with_slot(self.admission.as_ref(), || operation(attempt)).await?;

            let error = match result {
                Ok(value) => {
                    debug!(key, attempt, "Operation succeeded");
                    return Ok(RetryOutcome::Success {
                        value,
                        attempts: attempt,
                    });
                }
                Err(error) => error,
            };

            match classifier.classify(&error) {
                FailureClass::TerminalEmpty => {
                    debug!(key, attempt, error = %error, "Operation found no data");
                    self.events.emit(
                        "retry.empty",
                        Some(serde_json::json!({ "key": key, "attempt": attempt })),
                    );
                    return Ok(RetryOutcome::Empty { attempts: attempt });
                }
                class @ (FailureClass::Retryable | FailureClass::TerminalFatal) => {
                    warn!(
                        key,
                        attempt,
                        max_attempts = state.max_attempts,
                        class = ?class,
                        error = %error,
                        "Attempt failed"
                    );
                    self.events.emit(
                        "retry.attempt_failed",
                        Some(serde_json::json!({
                            "key": key,
                            "attempt": attempt,
                            "status": error.status,
                            "error": error.message,
                        })),
                    );
                    state.record_failure(error);
                }
            }

            if state.is_exhausted() {
                self.events.emit(
                    "retry.exhausted",
                    Some(serde_json::json!({ "key": key, "attempts": state.attempt })),
                );
                return Err(state.into_error());
            }

            let delay = backoff_delay(&self.config, attempt);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }
}

impl std::fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("config", &self.config)
            .field("max_concurrency", &self.admission.max_concurrency())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::LocalAdmissionController;
    use crate::events::CollectingEventSink;
    use crate::retry::{AlwaysRetry, BackoffStrategy, NotFoundIsEmpty};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn executor(max: usize) -> (RetryExecutor, Arc<LocalAdmissionController>) {
        let admission = Arc::new(LocalAdmissionController::new(max));
        (
            RetryExecutor::new(RetryConfig::default(), admission.clone()),
            admission,
        )
    }

    #[tokio::test]
    async fn test_success_on_fifth_attempt() {
        let (executor, admission) = executor(1);

        let outcome = executor
            .execute(
                "B0001",
                |attempt| async move {
                    if attempt < 5 {
                        Err(RemoteError::with_status(503, format!("attempt {attempt}")))
                    } else {
                        Ok("payload")
                    }
                },
                &NotFoundIsEmpty,
            )
            .await
            .unwrap();

        assert_eq!(
            outcome,
            RetryOutcome::Success {
                value: "payload",
                attempts: 5
            }
        );
        assert_eq!(admission.outstanding().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_not_found_stops_immediately() {
        let (executor, _) = executor(1);
        let calls = AtomicU32::new(0);

        let outcome: RetryOutcome<()> = executor
            .execute(
                "B0002",
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(RemoteError::not_found("no offers")) }
                },
                &NotFoundIsEmpty,
            )
            .await
            .unwrap();

        assert!(outcome.is_empty());
        assert_eq!(outcome.attempts(), 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_five_failures_exhaust() {
        let (executor, admission) = executor(2);

        let err = executor
            .execute(
                "B0003",
                |attempt| async move {
                    Err::<(), _>(RemoteError::with_status(500, format!("failure {attempt}")))
                },
                &NotFoundIsEmpty,
            )
            .await
            .unwrap_err();

        match err {
            BurstflowError::ExhaustedRetries {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 5);
                assert_eq!(last_error, RemoteError::with_status(500, "failure 5"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(admission.outstanding().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_still_retried() {
        let (executor, _) = executor(1);
        let calls = AtomicU32::new(0);
        let classifier = |_: &RemoteError| FailureClass::TerminalFatal;

        let result: Result<RetryOutcome<()>, _> = executor
            .execute(
                "B0004",
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(RemoteError::with_status(400, "malformed")) }
                },
                &classifier,
            )
            .await;

        assert!(matches!(
            result,
            Err(BurstflowError::ExhaustedRetries { attempts: 5, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_each_attempt_holds_its_own_slot() {
        let admission = Arc::new(LocalAdmissionController::new(1));
        let executor = RetryExecutor::new(RetryConfig::default(), admission.clone());

        let outcome = executor
            .execute(
                "B0005",
                |attempt| {
                    let admission = admission.clone();
                    async move {
                        assert_eq!(admission.outstanding().await.unwrap(), 1);
                        if attempt < 3 {
                            Err(RemoteError::transient("reset"))
                        } else {
                            Ok(attempt)
                        }
                    }
                },
                &AlwaysRetry,
            )
            .await
            .unwrap();

        assert_eq!(outcome.into_option(), Some(3));
        assert_eq!(admission.available(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_applied_between_attempts() {
        let admission = Arc::new(LocalAdmissionController::new(1));
        let config = RetryConfig::new()
            .with_max_attempts(3)
            .with_base_delay_ms(1000)
            .with_backoff(BackoffStrategy::Constant);
        let executor = RetryExecutor::new(config, admission);

        let started = tokio::time::Instant::now();
        let _ = executor
            .execute(
                "B0006",
                |_| async { Err::<(), _>(RemoteError::transient("reset")) },
                &AlwaysRetry,
            )
            .await;

        // Two delays: after attempts 1 and 2, none after the last.
        assert_eq!(started.elapsed(), Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_emits_attempt_events() {
        let sink = Arc::new(CollectingEventSink::new());
        let admission = Arc::new(LocalAdmissionController::new(1));
        let executor = RetryExecutor::new(RetryConfig::new().with_max_attempts(2), admission)
            .with_event_sink(sink.clone());

        let _ = executor
            .execute(
                "B0007",
                |_| async { Err::<(), _>(RemoteError::transient("reset")) },
                &AlwaysRetry,
            )
            .await;

        assert_eq!(
            sink.event_types(),
            vec!["retry.attempt_failed", "retry.attempt_failed", "retry.exhausted"]
        );
    }

    #[test]
    fn test_retry_state_transitions() {
        let mut state = RetryState::new(2);
        assert!(!state.is_exhausted());
        assert_eq!(state.begin_attempt(), 1);
        state.record_failure(RemoteError::transient("a"));
        assert!(!state.is_exhausted());
        assert_eq!(state.begin_attempt(), 2);
        state.record_failure(RemoteError::transient("b"));
        assert!(state.is_exhausted());

        let err = state.into_error();
        assert!(err.to_string().contains("after 2 attempts"));
    }
}
