//! Interfaces to the rate-limited remote API.
//!
//! The orchestration layer never builds URLs or parses documents itself; it
//! only calls these traits. [`HttpJobClient`] is a reqwest implementation of
//! both.

#[cfg(feature = "http")]
mod http;
mod protocols;

#[cfg(feature = "http")]
pub use http::HttpJobClient;
pub use protocols::{
    JobClient, JobDescriptor, JobStatus, RemoteCaller, RemoteRequest, RemoteResponse,
    StatusResponse, SubmissionResponse,
};
