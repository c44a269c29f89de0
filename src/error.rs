//! # Error Taxonomy
//! Two layers, mirroring who may observe them:
//!
//! * [`ScoreError`] — call-level admission/validation failures. These abort
//!   the whole `score` call before any model traffic.
//! * [`ModelCallError`] — one failed sub-batch model call, tagged with an
//!   [`ErrorClass`] the orchestrator switches on. These never escape the
//!   orchestrator; they degrade into zero-score placeholders.

use thiserror::Error;

/// Call-level failures. Everything else is absorbed per sub-batch.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ScoreError {
    /// Caller contract violation: a prospect entry was not a JSON object.
    #[error("invalid prospect payload at index {index}: not an object")]
    Validation { index: usize },

    /// Self-imposed admission control: the caller key's sliding window is
    /// already full.
    #[error("rate limit exceeded")]
    RateLimited,

    /// The process-wide concurrency budget is exhausted.
    #[error("service temporarily overloaded")]
    Overloaded,
}

/// Classification of a failed model call, used to pick the retry policy
/// and the placeholder justification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Provider-side rate limiting (HTTP 429). Retried with exponential
    /// backoff plus jitter.
    RateLimited,
    /// Request exceeded its deadline. Retried with linear backoff.
    Timeout,
    /// The model's output failed JSON/shape/range validation. Never
    /// retried: malformed output is not expected to self-correct within
    /// the same call shape.
    InvalidResponse,
    /// Any other transport or provider error. Retried with linear backoff.
    ApiFailure,
}

impl ErrorClass {
    /// Stable key used for counters and `ScoringMeta::error_counts`.
    pub fn counter_key(self) -> &'static str {
        match self {
            ErrorClass::RateLimited => "api_ratelimit",
            ErrorClass::Timeout => "api_timeout",
            ErrorClass::InvalidResponse => "invalid_json",
            ErrorClass::ApiFailure => "api_failure",
        }
    }

    /// Justification written into every placeholder of a failed sub-batch.
    pub fn placeholder_justification(self) -> &'static str {
        match self {
            ErrorClass::RateLimited => "Rate limited by provider",
            ErrorClass::Timeout => "Model request timed out",
            ErrorClass::InvalidResponse => "Invalid JSON from model (batch)",
            ErrorClass::ApiFailure => "Model API failure",
        }
    }

    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorClass::InvalidResponse)
    }
}

/// One failed model call, after retries were exhausted (or skipped).
///
/// `attempts` is the number of attempts actually issued, so the
/// orchestrator can account for retry cost without re-deriving it.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("model call failed ({}) after {attempts} attempt(s): {message}", .kind.counter_key())]
pub struct ModelCallError {
    pub kind: ErrorClass,
    pub attempts: u32,
    pub message: String,
}

impl ModelCallError {
    pub fn new(kind: ErrorClass, attempts: u32, message: impl Into<String>) -> Self {
        Self {
            kind,
            attempts,
            message: message.into(),
        }
    }
}
