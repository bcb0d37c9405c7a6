//! Bounded retry policy for reply-stream attempts.
//!
//! Transient failures (disconnects, rate limits, inactivity timeouts, and
//! malformed responses, which a fresh attempt may well not reproduce) are
//! retried while budget remains. Provider refusals are fatal. Cancellation
//! is never retried regardless of remaining budget.

use crate::provider::StreamFailure;

/// Classification of a stream failure for retry purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// A fresh attempt may succeed.
    Transient,
    /// No further attempt is permitted.
    Fatal,
}

/// Outcome of the retry decision for one failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Open a new attempt with the same conversation context.
    Retry,
    /// Transition the session to `Failed` and report the failure.
    Stop,
}

/// Classify a stream failure.
#[must_use]
pub fn classify(failure: &StreamFailure) -> FailureClass {
    match failure {
        StreamFailure::Malformed(_)
        | StreamFailure::Disconnected(_)
        | StreamFailure::RateLimited(_)
        | StreamFailure::InactivityTimeout(_) => FailureClass::Transient,
        StreamFailure::Refused(_) | StreamFailure::Cancelled => FailureClass::Fatal,
    }
}

/// Decide whether the session may open another attempt.
///
/// `attempts_made` counts attempts that have already run, including the one
/// that just failed; a session failing on every attempt therefore reaches
/// `Stop` after exactly `retry_limit` attempts.
#[must_use]
pub fn decide(failure: &StreamFailure, attempts_made: u32, retry_limit: u32) -> RetryDecision {
    if *failure == StreamFailure::Cancelled {
        return RetryDecision::Stop;
    }
    match classify(failure) {
        FailureClass::Transient if attempts_made < retry_limit => RetryDecision::Retry,
        FailureClass::Transient | FailureClass::Fatal => RetryDecision::Stop,
    }
}
