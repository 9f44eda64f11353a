//! Protocol traits and wire types for remote calls and async jobs.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::RemoteError;

/// A synchronous remote request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteRequest {
    /// Target URL.
    pub url: String,
    /// Query parameters appended to the URL.
    #[serde(default)]
    pub query: Vec<(String, String)>,
}

impl RemoteRequest {
    /// Creates a request for a URL.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            query: Vec::new(),
        }
    }

    /// Adds a query parameter.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// A successful remote response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body as text.
    pub body: String,
}

impl RemoteResponse {
    /// Creates a 200 response.
    #[must_use]
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }
}

/// Lifecycle state of an async job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Still being processed remotely.
    Running,
    /// Completed with a result.
    #[serde(alias = "finished")]
    Succeeded,
    /// Completed without a usable result.
    Failed,
}

impl JobStatus {
    /// Whether the job has left the running state.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// One job as described by the submission or status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobDescriptor {
    /// Remote job id, when provided.
    #[serde(default)]
    pub id: Option<String>,
    /// Current status.
    pub status: JobStatus,
    /// Endpoint to query for status updates.
    pub status_url: String,
    /// Result envelope, present once the job is terminal.
    #[serde(default)]
    pub response: Option<serde_json::Value>,
}

impl JobDescriptor {
    /// Creates a running job descriptor.
    #[must_use]
    pub fn running(status_url: impl Into<String>) -> Self {
        Self {
            id: None,
            status: JobStatus::Running,
            status_url: status_url.into(),
            response: None,
        }
    }

    /// Creates a succeeded job descriptor carrying `payload` as its body.
    #[must_use]
    pub fn succeeded(status_url: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: None,
            status: JobStatus::Succeeded,
            status_url: status_url.into(),
            response: Some(serde_json::json!({ "body": payload })),
        }
    }

    /// Creates a failed job descriptor.
    #[must_use]
    pub fn failed(status_url: impl Into<String>) -> Self {
        Self {
            id: None,
            status: JobStatus::Failed,
            status_url: status_url.into(),
            response: None,
        }
    }

    /// Sets the job id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// The job's result payload.
    ///
    /// The remote wraps results in an envelope; the `body` field is the
    /// payload when present, otherwise the whole envelope is.
    #[must_use]
    pub fn payload(&self) -> Option<serde_json::Value> {
        let response = self.response.as_ref()?;
        Some(response.get("body").unwrap_or(response).clone())
    }
}

/// Answer of the status endpoint. Same shape as a submitted descriptor.
pub type StatusResponse = JobDescriptor;

/// Answer of the submission endpoint: one job, or one job per batch member.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SubmissionResponse {
    /// A batch submission.
    Batch(Vec<JobDescriptor>),
    /// A single job.
    Single(JobDescriptor),
}

/// Performs a synchronous remote call.
#[async_trait]
pub trait RemoteCaller: Send + Sync {
    /// Calls the remote API.
    async fn call(&self, request: &RemoteRequest) -> Result<RemoteResponse, RemoteError>;
}

/// Submits async jobs and checks their status.
#[async_trait]
pub trait JobClient: Send + Sync {
    /// Submits a job payload.
    async fn submit(&self, payload: &serde_json::Value) -> Result<SubmissionResponse, RemoteError>;

    /// Fetches the current status of a job.
    async fn check_status(&self, status_url: &str) -> Result<StatusResponse, RemoteError>;
}
