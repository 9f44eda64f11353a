//! Per-item composition of admission, retries and job polling.

use std::sync::Arc;

use crate::admission::AdmissionController;
use crate::config::BurstflowConfig;
use crate::errors::{BurstflowError, ConfigError};
use crate::events::EventSink;
use crate::poller::{JobPoller, Resolution};
use crate::remote::{JobClient, RemoteCaller, RemoteRequest, RemoteResponse};
use crate::retry::{ErrorClassifier, NotFoundIsEmpty, RetryExecutor};

/// The work done for one batch item.
///
/// Every retry attempt holds one admission slot for the whole remote
/// exchange, including job polling, and gives it back before the next
/// attempt. `Ok(None)` means the remote reported no data for the item.
#[derive(Clone)]
pub struct ItemPipeline {
    executor: RetryExecutor,
    caller: Option<Arc<dyn RemoteCaller>>,
    poller: Option<JobPoller>,
    classifier: Arc<dyn ErrorClassifier>,
}

impl ItemPipeline {
    /// Creates a pipeline with no remote backends attached.
    #[must_use]
    pub fn new(executor: RetryExecutor) -> Self {
        Self {
            executor,
            caller: None,
            poller: None,
            classifier: Arc::new(NotFoundIsEmpty),
        }
    }

    /// Builds a pipeline whose client serves both call patterns.
    pub fn from_config<C>(
        config: &BurstflowConfig,
        admission: Arc<dyn AdmissionController>,
        client: Arc<C>,
    ) -> Result<Self, ConfigError>
    where
        C: RemoteCaller + JobClient + 'static,
    {
        config.validate()?;
        let executor = RetryExecutor::new(config.retry.clone(), admission);
        let poller = JobPoller::new(client.clone(), config.poll.clone());
        Ok(Self::new(executor).with_caller(client).with_poller(poller))
    }

    /// Attaches the synchronous caller.
    #[must_use]
    pub fn with_caller(mut self, caller: Arc<dyn RemoteCaller>) -> Self {
        self.caller = Some(caller);
        self
    }

    /// Attaches the job poller.
    #[must_use]
    pub fn with_poller(mut self, poller: JobPoller) -> Self {
        self.poller = Some(poller);
        self
    }

    /// Replaces the error classifier.
    #[must_use]
    pub fn with_classifier(mut self, classifier: Arc<dyn ErrorClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// Sends events from the executor and poller to `events`.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.executor = self.executor.with_event_sink(events.clone());
        self.poller = self.poller.map(|p| p.with_event_sink(events));
        self
    }

    /// Returns the retry executor.
    #[must_use]
    pub fn executor(&self) -> &RetryExecutor {
        &self.executor
    }

    /// Performs a synchronous remote call for item `key`.
    pub async fn call(
        &self,
        key: &str,
        request: &RemoteRequest,
    ) -> Result<Option<RemoteResponse>, BurstflowError> {
        let caller = self
            .caller
            .as_ref()
            .ok_or_else(|| ConfigError::new("caller", "no remote caller attached"))?;

        let outcome = self
            .executor
            .execute(key, |_| caller.call(request), self.classifier.as_ref())
            .await?;
        Ok(outcome.into_option())
    }

    /// Submits an async job for item `key` and resolves it.
    pub async fn submit_job(
        &self,
        key: &str,
        payload: &serde_json::Value,
    ) -> Result<Option<Resolution>, BurstflowError> {
        let poller = self
            .poller
            .as_ref()
            .ok_or_else(|| ConfigError::new("poller", "no job poller attached"))?;

        let outcome = self
            .executor
            .execute(
                key,
                |_| poller.submit_and_resolve(payload),
                self.classifier.as_ref(),
            )
            .await?;
        Ok(outcome.into_option())
    }
}

impl std::fmt::Debug for ItemPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemPipeline")
            .field("executor", &self.executor)
            .field("has_caller", &self.caller.is_some())
            .field("poller", &self.poller)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admission::LocalAdmissionController;
    use crate::config::{PollConfig, RetryConfig};
    use crate::errors::RemoteError;
    use crate::remote::{JobDescriptor, SubmissionResponse};
    use crate::testing::{ScriptedCaller, ScriptedJobClient};
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::time::Duration;

    fn executor(max: usize) -> RetryExecutor {
        RetryExecutor::new(
            RetryConfig::default(),
            Arc::new(LocalAdmissionController::new(max)),
        )
    }

    #[tokio::test]
    async fn test_call_retries_then_succeeds() {
        let caller = Arc::new(ScriptedCaller::new());
        caller.push(Err(RemoteError::transient("reset")));
        caller.push(Ok(RemoteResponse::ok("<html/>")));

        let pipeline = ItemPipeline::new(executor(2)).with_caller(caller.clone());
        let response = pipeline
            .call("B1", &RemoteRequest::new("https://api.example.com/"))
            .await
            .unwrap();

        assert_eq!(response, Some(RemoteResponse::ok("<html/>")));
        assert_eq!(caller.call_count(), 2);
    }

    #[tokio::test]
    async fn test_call_not_found_is_empty() {
        let caller = Arc::new(
            ScriptedCaller::new().with_failing_url("missing", RemoteError::not_found("gone")),
        );

        let pipeline = ItemPipeline::new(executor(2)).with_caller(caller.clone());
        let response = pipeline.call("B2", &RemoteRequest::new("missing")).await.unwrap();

        assert_eq!(response, None);
        assert_eq!(caller.call_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_caller_is_config_error() {
        let pipeline = ItemPipeline::new(executor(1));
        let err = pipeline
            .call("B3", &RemoteRequest::new("u"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "Config");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_held_through_polling() {
        let client = Arc::new(ScriptedJobClient::new());
        for n in 0..2 {
            let url = format!("jobs/{n}");
            client.script_submission(Ok(SubmissionResponse::Single(JobDescriptor::running(
                url.clone(),
            ))));
            client.script_status(url.clone(), Ok(JobDescriptor::succeeded(url, json!(n))));
        }

        let poller = JobPoller::new(client.clone(), PollConfig::default());
        let pipeline = ItemPipeline::new(executor(1)).with_poller(poller);

        let payload_a = json!({"item": "a"});
        let payload_b = json!({"item": "b"});
        let started = tokio::time::Instant::now();
        let (a, b) = tokio::join!(
            pipeline.submit_job("a", &payload_a),
            pipeline.submit_job("b", &payload_b),
        );

        assert!(a.unwrap().is_some());
        assert!(b.unwrap().is_some());
        // One slot: initial delay plus an immediate status check, twice over.
        assert_eq!(started.elapsed(), Duration::from_millis(4000));
        assert_eq!(client.submissions().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_polling_error_retries_whole_submission() {
        let client = Arc::new(ScriptedJobClient::new());
        client.script_submission(Ok(SubmissionResponse::Single(JobDescriptor::running("j1"))));
        client.script_status("j1", Err(RemoteError::with_status(502, "bad gateway")));
        client.script_submission(Ok(SubmissionResponse::Single(JobDescriptor::running("j2"))));
        client.script_status("j2", Ok(JobDescriptor::succeeded("j2", json!("ok"))));

        let poller = JobPoller::new(client.clone(), PollConfig::default());
        let pipeline = ItemPipeline::new(executor(1)).with_poller(poller);

        let resolution = pipeline
            .submit_job("B4", &json!({"asin": "B4"}))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(resolution.payloads(), vec![json!("ok")]);
        assert_eq!(client.submissions().len(), 2);
    }
}
