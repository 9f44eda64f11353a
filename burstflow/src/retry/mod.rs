//! Bounded retries with failure classification.
//!
//! Each failure is classified as retryable, terminal-empty or terminal-fatal.
//! Terminal-empty ends the loop with an explicit empty result. Fatal errors
//! are currently retried exactly like retryable ones until attempts run out.

mod executor;

pub use executor::{RetryExecutor, RetryOutcome, RetryState};

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::RetryConfig;
use crate::errors::RemoteError;

/// How a failed attempt should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureClass {
    /// Try again if attempts remain.
    Retryable,
    /// The resource legitimately has no data; stop with an empty result.
    TerminalEmpty,
    /// The request can never succeed. Handled like `Retryable` for now.
    TerminalFatal,
}

/// Decides how a remote failure is classified.
pub trait ErrorClassifier: Send + Sync {
    /// Classifies one failure.
    fn classify(&self, error: &RemoteError) -> FailureClass;
}

impl<F> ErrorClassifier for F
where
    F: Fn(&RemoteError) -> FailureClass + Send + Sync,
{
    fn classify(&self, error: &RemoteError) -> FailureClass {
        self(error)
    }
}

/// Treats "not found" as an empty result and everything else as retryable.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotFoundIsEmpty;

impl ErrorClassifier for NotFoundIsEmpty {
    fn classify(&self, error: &RemoteError) -> FailureClass {
        if error.is_not_found() {
            FailureClass::TerminalEmpty
        } else {
            FailureClass::Retryable
        }
    }
}

/// Every failure is retryable.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysRetry;

impl ErrorClassifier for AlwaysRetry {
    fn classify(&self, _error: &RemoteError) -> FailureClass {
        FailureClass::Retryable
    }
}

/// Backoff strategy for delays between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BackoffStrategy {
    /// Retry immediately.
    #[default]
    None,
    /// delay = base (constant)
    Constant,
    /// delay = base * attempt
    Linear,
    /// delay = base * 2^(attempt - 1)
    Exponential,
}

/// Jitter strategy to prevent thundering herd.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum JitterStrategy {
    /// No jitter
    #[default]
    None,
    /// Random from 0 to delay
    Full,
    /// Half fixed, half random
    Equal,
}

/// Delay to wait after the given failed attempt (1-based).
#[must_use]
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let base = config.base_delay_ms;
    let delay = match config.backoff_strategy {
        BackoffStrategy::None => 0,
        BackoffStrategy::Constant => base,
        BackoffStrategy::Linear => base.saturating_mul(u64::from(attempt)),
        BackoffStrategy::Exponential => {
            base.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
        }
    }
    .min(config.max_delay_ms);

    let jittered = match config.jitter_strategy {
        JitterStrategy::None => delay,
        JitterStrategy::Full => {
            if delay == 0 {
                0
            } else {
                rand::thread_rng().gen_range(0..=delay)
            }
        }
        JitterStrategy::Equal => {
            let half = delay / 2;
            if half == 0 {
                delay
            } else {
                half + rand::thread_rng().gen_range(0..=half)
            }
        }
    };

    Duration::from_millis(jittered)
}
