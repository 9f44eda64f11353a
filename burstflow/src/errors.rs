//! Error types for the burstflow orchestration layer.
//!
//! Remote failures carry an optional status code so the retry executor can
//! classify them. Everything a caller can observe converges on
//! [`BurstflowError`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// HTTP status that signals a legitimately empty resource.
pub const NOT_FOUND_STATUS: u16 = 404;

/// The main error type for burstflow operations.
#[derive(Debug, Error)]
pub enum BurstflowError {
    /// A single remote call failed and was not retried.
    #[error("{0}")]
    Remote(#[from] RemoteError),

    /// Every attempt of a retried operation failed.
    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    ExhaustedRetries {
        /// Number of attempts made.
        attempts: u32,
        /// The error returned by the final attempt.
        last_error: RemoteError,
    },

    /// A batch was aborted because one of its items failed.
    #[error("Batch aborted by item '{item}': {source}")]
    BatchAborted {
        /// Key of the item whose pipeline failed first.
        item: String,
        /// The item's underlying failure.
        #[source]
        source: Box<BurstflowError>,
    },

    /// An admission slot could not be acquired or released.
    #[error("{0}")]
    Admission(#[from] AdmissionError),

    /// The shared lease store failed.
    #[error("{0}")]
    LeaseStore(#[from] LeaseStoreError),

    /// Invalid configuration.
    #[error("{0}")]
    Config(#[from] ConfigError),

    /// A spawned item pipeline panicked or was aborted.
    #[error("Task join error: {0}")]
    Join(String),

    /// An error raised by caller-supplied pipeline code.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl BurstflowError {
    /// Wraps an item failure into a batch abort.
    #[must_use]
    pub fn batch_aborted(item: impl Into<String>, source: Self) -> Self {
        Self::BatchAborted {
            item: item.into(),
            source: Box::new(source),
        }
    }

    /// Returns the short type name used in event payloads.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Remote(e) if e.is_not_found() => "NotFound",
            Self::Remote(_) => "Transient",
            Self::ExhaustedRetries { .. } => "ExhaustedRetries",
            Self::BatchAborted { .. } => "BatchAborted",
            Self::Admission(_) => "Admission",
            Self::LeaseStore(_) => "LeaseStore",
            Self::Config(_) => "Config",
            Self::Join(_) => "Join",
            Self::Other(_) => "Other",
        }
    }

    /// Returns the item key if this is a batch abort.
    #[must_use]
    pub fn failed_item(&self) -> Option<&str> {
        match self {
            Self::BatchAborted { item, .. } => Some(item),
            _ => None,
        }
    }

    /// Converts to a dictionary representation.
    #[must_use]
    pub fn to_dict(&self) -> HashMap<String, serde_json::Value> {
        let mut map = HashMap::new();
        map.insert("type".to_string(), serde_json::json!(self.kind()));
        map.insert("message".to_string(), serde_json::json!(self.to_string()));

        match self {
            Self::Remote(e) => {
                map.insert("status".to_string(), serde_json::json!(e.status));
            }
            Self::ExhaustedRetries {
                attempts,
                last_error,
            } => {
                map.insert("attempts".to_string(), serde_json::json!(attempts));
                map.insert("status".to_string(), serde_json::json!(last_error.status));
            }
            Self::BatchAborted { item, source } => {
                map.insert("item".to_string(), serde_json::json!(item));
                map.insert("cause".to_string(), serde_json::json!(source.to_dict()));
            }
            _ => {}
        }

        map
    }
}

/// A failed remote call, as reported by a [`crate::remote::RemoteCaller`] or
/// [`crate::remote::JobClient`].
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{}", display_remote(.status, .message))]
pub struct RemoteError {
    /// HTTP status code, if the remote answered at all.
    pub status: Option<u16>,
    /// Human readable description.
    pub message: String,
}

fn display_remote(status: &Option<u16>, message: &str) -> String {
    match status {
        Some(code) => format!("Remote call failed with status {code}: {message}"),
        None => format!("Remote call failed: {message}"),
    }
}

impl RemoteError {
    /// Creates an error without a status code (connection reset, timeout, ...).
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// Creates an error carrying a status code.
    #[must_use]
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Creates a "not found" error.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::with_status(NOT_FOUND_STATUS, message)
    }

    /// Whether the remote reported the resource as absent.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status == Some(NOT_FOUND_STATUS)
    }
}

/// Errors raised by admission controllers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// The token was never issued by this controller, or was already released.
    #[error("Unknown or already released token: {token_id}")]
    UnknownToken {
        /// The offending token id.
        token_id: String,
    },

    /// The controller was shut down while waiting for a slot.
    #[error("Admission controller closed")]
    Closed,
}

impl AdmissionError {
    /// Creates an unknown token error.
    #[must_use]
    pub fn unknown_token(token_id: impl Into<String>) -> Self {
        Self::UnknownToken {
            token_id: token_id.into(),
        }
    }
}

/// Errors raised by lease store backends.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LeaseStoreError {
    /// Could not reach the store.
    #[error("Lease store connection error: {0}")]
    Connection(String),

    /// The store rejected a command.
    #[error("Lease store command error: {0}")]
    Command(String),
}

/// Invalid configuration value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid configuration for '{field}': {reason}")]
pub struct ConfigError {
    /// The offending field.
    pub field: String,
    /// Why the value was rejected.
    pub reason: String,
}

impl ConfigError {
    /// Creates a new config error.
    #[must_use]
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}
