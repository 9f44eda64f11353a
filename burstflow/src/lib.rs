//! # Burstflow
//!
//! Concurrency admission, bounded retries and async job polling for bursts
//! of calls against a rate-limited remote API.
//!
//! Burstflow provides:
//!
//! - **Admission control**: a per-process ceiling on in-flight calls, or an
//!   account-wide ceiling shared between processes through a lease store
//!   whose reservations expire on their own
//! - **Retries**: a bounded retry loop that tells transient failures apart
//!   from "no data" answers
//! - **Job polling**: submit, then poll single or batch jobs to a terminal state
//! - **Batches**: fan out one pipeline per item and fan the results back in
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use burstflow::prelude::*;
//!
//! let config = BurstflowConfig::default();
//! let admission = Arc::new(LocalAdmissionController::new(config.admission.max_concurrency));
//! let client = Arc::new(HttpJobClient::new("https://async.example.com/jobs", &config.http)?);
//! let pipeline = ItemPipeline::from_config(&config, admission, client)?;
//!
//! let result = BatchOrchestrator::new(config.failure_mode)
//!     .run_batch(asins, |asin| {
//!         let pipeline = pipeline.clone();
//!         async move { pipeline.submit_job(&asin, &json!({ "asin": asin })).await }
//!     })
//!     .await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod admission;
pub mod batch;
pub mod config;
pub mod errors;
pub mod events;
pub mod lease;
pub mod observability;
pub mod poller;
pub mod remote;
pub mod retry;
pub mod testing;


/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::admission::{
        with_slot, AdmissionController, ConcurrencyToken, DistributedAdmissionController,
        LocalAdmissionController,
    };
    pub use crate::batch::{
        BatchOrchestrator, BatchResult, FailureMode, FailureRecord, ItemOutcome, ItemPipeline,
    };
    pub use crate::config::{AdmissionConfig, BurstflowConfig, HttpConfig, PollConfig, RetryConfig};
    pub use crate::errors::{AdmissionError, BurstflowError, ConfigError, LeaseStoreError, RemoteError};
    pub use crate::events::{EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::lease::{InMemoryLeaseStore, LeaseStore};
    pub use crate::observability::{init_logging, LogFormat};
    pub use crate::poller::{Job, JobPoller, Resolution};
    #[cfg(feature = "http")]
    pub use crate::remote::HttpJobClient;
    pub use crate::remote::{
        JobClient, JobDescriptor, JobStatus, RemoteCaller, RemoteRequest, RemoteResponse,
        SubmissionResponse,
    };
    pub use crate::retry::{
        BackoffStrategy, ErrorClassifier, FailureClass, JitterStrategy, NotFoundIsEmpty,
        RetryExecutor, RetryOutcome,
    };
}
