//! Scripted remote implementations for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use super::ConcurrencyProbe;
use crate::errors::RemoteError;
use crate::remote::{
    JobClient, RemoteCaller, RemoteRequest, RemoteResponse, StatusResponse, SubmissionResponse,
};

/// A remote caller that replays scripted results.
///
/// Scripted results are consumed first, in order. URLs registered with
/// [`ScriptedCaller::with_failing_url`] always fail. Anything else gets a
/// 200 response echoing the URL.
#[derive(Debug, Default)]
pub struct ScriptedCaller {
    script: Mutex<VecDeque<Result<RemoteResponse, RemoteError>>>,
    failing_urls: HashMap<String, RemoteError>,
    latency: Duration,
    probe: Option<Arc<ConcurrencyProbe>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedCaller {
    /// Creates a caller that succeeds for every URL.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every call to `url` fail with `error`.
    #[must_use]
    pub fn with_failing_url(mut self, url: impl Into<String>, error: RemoteError) -> Self {
        self.failing_urls.insert(url.into(), error);
        self
    }

    /// Sleeps this long inside every call.
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Records every call in `probe` while it runs.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<ConcurrencyProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Queues the result of the next unscripted call.
    pub fn push(&self, result: Result<RemoteResponse, RemoteError>) {
        self.script.lock().push_back(result);
    }

    /// Number of calls made.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of calls made to `url`.
    #[must_use]
    pub fn calls_to(&self, url: &str) -> usize {
        self.calls.lock().iter().filter(|u| *u == url).count()
    }
}

#[async_trait]
impl RemoteCaller for ScriptedCaller {
    async fn call(&self, request: &RemoteRequest) -> Result<RemoteResponse, RemoteError> {
        let _guard = self.probe.as_ref().map(ConcurrencyProbe::enter);
        self.calls.lock().push(request.url.clone());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        if let Some(error) = self.failing_urls.get(&request.url) {
            return Err(error.clone());
        }
        if let Some(result) = self.script.lock().pop_front() {
            return result;
        }
        Ok(RemoteResponse::ok(request.url.clone()))
    }
}

/// A job client that replays scripted submissions and status answers.
///
/// Status answers are queued per status URL. Asking for a status with an
/// empty queue yields a transient error.
#[derive(Debug, Default)]
pub struct ScriptedJobClient {
    submissions_script: Mutex<VecDeque<Result<SubmissionResponse, RemoteError>>>,
    statuses: Mutex<HashMap<String, VecDeque<Result<StatusResponse, RemoteError>>>>,
    submitted: Mutex<Vec<serde_json::Value>>,
    status_calls: Mutex<usize>,
}

impl ScriptedJobClient {
    /// Creates a client with empty scripts.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues the answer to the next submission.
    pub fn script_submission(&self, result: Result<SubmissionResponse, RemoteError>) {
        self.submissions_script.lock().push_back(result);
    }

    /// Queues the next status answer for `status_url`.
    pub fn script_status(
        &self,
        status_url: impl Into<String>,
        result: Result<StatusResponse, RemoteError>,
    ) {
        self.statuses
            .lock()
            .entry(status_url.into())
            .or_default()
            .push_back(result);
    }

    /// Total status checks made.
    #[must_use]
    pub fn status_calls(&self) -> usize {
        *self.status_calls.lock()
    }

    /// Payloads submitted so far.
    #[must_use]
    pub fn submissions(&self) -> Vec<serde_json::Value> {
        self.submitted.lock().clone()
    }
}

#[async_trait]
impl JobClient for ScriptedJobClient {
    async fn submit(&self, payload: &serde_json::Value) -> Result<SubmissionResponse, RemoteError> {
        self.submitted.lock().push(payload.clone());
        self.submissions_script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(RemoteError::transient("submission script exhausted")))
    }

    async fn check_status(&self, status_url: &str) -> Result<StatusResponse, RemoteError> {
        *self.status_calls.lock() += 1;
        self.statuses
            .lock()
            .get_mut(status_url)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Err(RemoteError::transient("status script exhausted")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::JobDescriptor;

    #[tokio::test]
    async fn test_scripted_caller_order() {
        let caller = ScriptedCaller::new()
            .with_failing_url("bad", RemoteError::with_status(503, "unavailable"));
        caller.push(Err(RemoteError::transient("first")));

        assert!(caller.call(&RemoteRequest::new("a")).await.is_err());
        assert_eq!(caller.call(&RemoteRequest::new("a")).await.unwrap().body, "a");
        assert_eq!(
            caller.call(&RemoteRequest::new("bad")).await.unwrap_err().status,
            Some(503)
        );
        assert_eq!(caller.call_count(), 3);
        assert_eq!(caller.calls_to("a"), 2);
    }

    #[tokio::test]
    async fn test_scripted_job_client_exhausts() {
        let client = ScriptedJobClient::new();
        client.script_status("u", Ok(JobDescriptor::running("u")));

        assert!(client.check_status("u").await.is_ok());
        assert!(client.check_status("u").await.is_err());
        assert!(client.submit(&serde_json::json!({})).await.is_err());
        assert_eq!(client.status_calls(), 2);
    }
}
