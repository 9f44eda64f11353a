//! Configuration types for admission, retries, polling and HTTP access.
//!
//! Every field has a serde default so partial JSON documents are accepted.
//! API keys and endpoint URLs are deliberately absent; they belong to the
//! caller's request payloads.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::batch::FailureMode;
use crate::errors::ConfigError;
use crate::retry::{BackoffStrategy, JitterStrategy};

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BurstflowConfig {
    /// Admission settings.
    #[serde(default)]
    pub admission: AdmissionConfig,
    /// Retry settings.
    #[serde(default)]
    pub retry: RetryConfig,
    /// Async job polling settings.
    #[serde(default)]
    pub poll: PollConfig,
    /// HTTP client settings.
    #[serde(default)]
    pub http: HttpConfig,
    /// How a batch reacts to item failures.
    #[serde(default)]
    pub failure_mode: FailureMode,
}

impl BurstflowConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON document and validates it.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ConfigError::new("<document>", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Sets the admission config.
    #[must_use]
    pub fn with_admission(mut self, admission: AdmissionConfig) -> Self {
        self.admission = admission;
        self
    }

    /// Sets the retry config.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the poll config.
    #[must_use]
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Sets the batch failure mode.
    #[must_use]
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Checks cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.admission.validate()?;
        self.retry.validate()?;
        self.http.validate()?;
        Ok(())
    }
}

/// Admission controller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// Account-wide ceiling on in-flight calls.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    /// Interval between lease count checks while waiting for a slot.
    #[serde(default = "default_slot_poll_interval")]
    pub slot_poll_interval_ms: u64,
    /// TTL applied to the whole lease collection on every acquisition.
    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_seconds: u64,
    /// Key of the shared lease collection.
    #[serde(default = "default_lease_key")]
    pub lease_key: String,
}

fn default_max_concurrency() -> usize {
    5
}

fn default_slot_poll_interval() -> u64 {
    200
}

fn default_lease_ttl() -> u64 {
    70
}

fn default_lease_key() -> String {
    "currentRequests".to_string()
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            slot_poll_interval_ms: default_slot_poll_interval(),
            lease_ttl_seconds: default_lease_ttl(),
            lease_key: default_lease_key(),
        }
    }
}

impl AdmissionConfig {
    /// Sets the concurrency ceiling.
    #[must_use]
    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max;
        self
    }

    /// Sets the slot poll interval.
    #[must_use]
    pub fn with_slot_poll_interval_ms(mut self, ms: u64) -> Self {
        self.slot_poll_interval_ms = ms;
        self
    }

    /// Sets the lease TTL.
    #[must_use]
    pub fn with_lease_ttl_seconds(mut self, seconds: u64) -> Self {
        self.lease_ttl_seconds = seconds;
        self
    }

    /// Sets the lease collection key.
    #[must_use]
    pub fn with_lease_key(mut self, key: impl Into<String>) -> Self {
        self.lease_key = key.into();
        self
    }

    /// Slot poll interval as a Duration.
    #[must_use]
    pub fn slot_poll_interval(&self) -> Duration {
        Duration::from_millis(self.slot_poll_interval_ms)
    }

    /// Lease TTL as a Duration.
    #[must_use]
    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_seconds)
    }

    /// Checks the admission settings on their own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::new("max_concurrency", "must be at least 1"));
        }
        if self.slot_poll_interval_ms == 0 {
            return Err(ConfigError::new("slot_poll_interval_ms", "must be positive"));
        }
        if self.lease_ttl() <= self.slot_poll_interval() {
            return Err(ConfigError::new(
                "lease_ttl_seconds",
                "must exceed the slot poll interval",
            ));
        }
        if self.lease_key.is_empty() {
            return Err(ConfigError::new("lease_key", "must not be empty"));
        }
        Ok(())
    }
}

/// Retry executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per operation, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base delay between attempts in milliseconds.
    #[serde(default)]
    pub base_delay_ms: u64,
    /// Maximum delay cap in milliseconds.
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
    /// Backoff strategy.
    #[serde(default)]
    pub backoff_strategy: BackoffStrategy,
    /// Jitter strategy.
    #[serde(default)]
    pub jitter_strategy: JitterStrategy,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_max_delay() -> u64 {
    30_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: 0,
            max_delay_ms: default_max_delay(),
            backoff_strategy: BackoffStrategy::default(),
            jitter_strategy: JitterStrategy::default(),
        }
    }
}

impl RetryConfig {
    /// Creates a new retry config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the maximum attempts.
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the base delay.
    #[must_use]
    pub fn with_base_delay_ms(mut self, delay: u64) -> Self {
        self.base_delay_ms = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay_ms(mut self, delay: u64) -> Self {
        self.max_delay_ms = delay;
        self
    }

    /// Sets the backoff strategy.
    #[must_use]
    pub fn with_backoff(mut self, strategy: BackoffStrategy) -> Self {
        self.backoff_strategy = strategy;
        self
    }

    /// Sets the jitter strategy.
    #[must_use]
    pub fn with_jitter(mut self, strategy: JitterStrategy) -> Self {
        self.jitter_strategy = strategy;
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::new("max_attempts", "must be at least 1"));
        }
        Ok(())
    }
}

/// Async job polling settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    /// Fixed delay before each status check.
    #[serde(default = "default_poll_delay")]
    pub poll_delay_ms: u64,
    /// Delay between a fresh submission and its resolution.
    #[serde(default = "default_poll_delay")]
    pub initial_delay_ms: u64,
}

fn default_poll_delay() -> u64 {
    2000
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            poll_delay_ms: default_poll_delay(),
            initial_delay_ms: default_poll_delay(),
        }
    }
}

impl PollConfig {
    /// Sets the poll delay.
    #[must_use]
    pub fn with_poll_delay_ms(mut self, ms: u64) -> Self {
        self.poll_delay_ms = ms;
        self
    }

    /// Sets the post-submission delay.
    #[must_use]
    pub fn with_initial_delay_ms(mut self, ms: u64) -> Self {
        self.initial_delay_ms = ms;
        self
    }

    /// Poll delay as a Duration.
    #[must_use]
    pub fn poll_delay(&self) -> Duration {
        Duration::from_millis(self.poll_delay_ms)
    }

    /// Post-submission delay as a Duration.
    #[must_use]
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }
}

/// Configuration for the HTTP-backed job client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: f64,
    /// User agent string.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Additional headers to include.
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

fn default_timeout() -> f64 {
    60.0
}

fn default_user_agent() -> String {
    "burstflow/0.1".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout(),
            user_agent: default_user_agent(),
            headers: HashMap::new(),
        }
    }
}

impl HttpConfig {
    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout(mut self, seconds: f64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Gets timeout as Duration.
    pub fn timeout(&self) -> Result<Duration, ConfigError> {
        if !(self.timeout_seconds.is_finite() && self.timeout_seconds > 0.0) {
            return Err(ConfigError::new(
                "http.timeout_seconds",
                "must be a positive number of seconds",
            ));
        }
        Duration::try_from_secs_f64(self.timeout_seconds)
            .map_err(|e| ConfigError::new("http.timeout_seconds", e.to_string()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.timeout()?;
        Ok(())
    }
}
