//! Async job resolution: submit, then poll until terminal.
//!
//! A submission answer is either one job or a batch of jobs. Batch members
//! that are already terminal are taken as-is; running members are polled
//! concurrently and collected in the order they finish. Polling errors are
//! not retried here: they abort the whole resolution and surface to the
//! caller, who usually sits inside a [`crate::retry::RetryExecutor`].

use futures::stream::{FuturesUnordered, TryStreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::PollConfig;
use crate::errors::RemoteError;
use crate::events::{default_sink, EventSink};
use crate::remote::{JobClient, JobDescriptor, JobStatus, SubmissionResponse};

/// A remote job tracked by the poller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Remote job id, when provided.
    pub id: Option<String>,
    /// Endpoint queried for status.
    pub status_url: String,
    /// Last observed status.
    pub status: JobStatus,
    /// Result payload, set once terminal.
    pub result: Option<serde_json::Value>,
    /// Whether the job came from a batch submission.
    pub is_batch_member: bool,
    /// Number of status checks performed.
    pub polls: u32,
}

impl Job {
    fn from_descriptor(descriptor: JobDescriptor, is_batch_member: bool) -> Self {
        let mut job = Self {
            id: descriptor.id.clone(),
            status_url: descriptor.status_url.clone(),
            status: JobStatus::Running,
            result: None,
            is_batch_member,
            polls: 0,
        };
        job.observe(&descriptor);
        job
    }

    fn observe(&mut self, descriptor: &JobDescriptor) {
        self.status = descriptor.status;
        if !descriptor.status_url.is_empty() {
            self.status_url.clone_from(&descriptor.status_url);
        }
        if self.id.is_none() {
            self.id.clone_from(&descriptor.id);
        }
        if self.status.is_terminal() {
            self.result = descriptor.payload();
        }
    }

    /// Whether the job still needs polling.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.status == JobStatus::Running
    }
}

/// Result of resolving a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Resolution {
    /// The single submitted job.
    Single(Job),
    /// Every batch member, inline-terminal members first, then polled
    /// members in completion order.
    Batch(Vec<Job>),
}

impl Resolution {
    /// All jobs in the resolution.
    #[must_use]
    pub fn jobs(&self) -> Vec<&Job> {
        match self {
            Self::Single(job) => vec![job],
            Self::Batch(jobs) => jobs.iter().collect(),
        }
    }

    /// Result payloads of jobs that produced one.
    #[must_use]
    pub fn payloads(&self) -> Vec<serde_json::Value> {
        self.jobs()
            .into_iter()
            .filter_map(|job| job.result.clone())
            .collect()
    }

    /// Total status checks performed.
    #[must_use]
    pub fn total_polls(&self) -> u32 {
        self.jobs().iter().map(|job| job.polls).sum()
    }
}

/// Drives jobs to a terminal state at a fixed polling interval.
#[derive(Clone)]
pub struct JobPoller {
    client: Arc<dyn JobClient>,
    config: PollConfig,
    events: Arc<dyn EventSink>,
}

impl JobPoller {
    /// Creates a poller.
    #[must_use]
    pub fn new(client: Arc<dyn JobClient>, config: PollConfig) -> Self {
        Self {
            client,
            config,
            events: default_sink(),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Returns the job client.
    #[must_use]
    pub fn client(&self) -> &Arc<dyn JobClient> {
        &self.client
    }

    /// Submits `payload`, waits the initial delay and resolves the answer.
    ///
    /// Running jobs get their first status check right after the initial
    /// delay, then one every poll delay.
    pub async fn submit_and_resolve(
        &self,
        payload: &serde_json::Value,
    ) -> Result<Resolution, RemoteError> {
        let submission = self.client.submit(payload).await?;
        tokio::time::sleep(self.config.initial_delay()).await;
        self.resolve_after(submission, Duration::ZERO).await
    }

    /// Resolves a submission answer, waiting one poll delay before each
    /// status check.
    pub async fn resolve(&self, submission: SubmissionResponse) -> Result<Resolution, RemoteError> {
        self.resolve_after(submission, self.config.poll_delay()).await
    }

    async fn resolve_after(
        &self,
        submission: SubmissionResponse,
        first_delay: Duration,
    ) -> Result<Resolution, RemoteError> {
        match submission {
            SubmissionResponse::Single(descriptor) => {
                let job = self
                    .poll_job(Job::from_descriptor(descriptor, false), first_delay)
                    .await?;
                Ok(Resolution::Single(job))
            }
            SubmissionResponse::Batch(descriptors) => {
                let total = descriptors.len();
                let mut resolved = Vec::with_capacity(total);
                let pending = FuturesUnordered::new();

                for descriptor in descriptors {
                    let job = Job::from_descriptor(descriptor, true);
                    if job.is_running() {
                        pending.push(self.poll_job(job, first_delay));
                    } else {
                        resolved.push(job);
                    }
                }

                debug!(total, running = pending.len(), "Resolving batch submission");
                let polled: Vec<Job> = pending.try_collect().await?;
                resolved.extend(polled);
                Ok(Resolution::Batch(resolved))
            }
        }
    }

    async fn poll_job(&self, mut job: Job, first_delay: Duration) -> Result<Job, RemoteError> {
        let mut delay = first_delay;
        while job.is_running() {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            delay = self.config.poll_delay();

            let status = self
                .client
                .check_status(&job.status_url)
                .await
                .map_err(|e| {
                    warn!(status_url = %job.status_url, error = %e, "Status check failed");
                    e
                })?;
            job.polls += 1;
            job.observe(&status);

            debug!(status_url = %job.status_url, status = ?job.status, polls = job.polls, "Job polled");
            self.events.emit(
                "job.polled",
                Some(serde_json::json!({
                    "status_url": job.status_url,
                    "status": job.status,
                    "polls": job.polls,
                })),
            );
        }

        if job.status == JobStatus::Failed {
            warn!(status_url = %job.status_url, "Job finished in failed state");
        }
        Ok(job)
    }
}

impl std::fmt::Debug for JobPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobPoller")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
