//! Outcome model: what a handler reports and how a worker classifies it.
//!
//! Handlers return `Result<(), HandlerError>`. The worker folds that together
//! with timeouts and decode failures into an `Outcome`, which the decider
//! turns into the next state.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::SpindleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Worth another attempt after backoff.
    Retryable,
    /// Retrying cannot help; go straight to the dead-letter set.
    Permanent,
}

/// Failure reported by a handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerError {
    pub kind: FailureKind,
    pub message: String,
}

impl HandlerError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Retryable,
            message: message.into(),
        }
    }

    /// Skip the retry budget entirely.
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind == FailureKind::Retryable
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for HandlerError {}

impl From<SpindleError> for HandlerError {
    fn from(err: SpindleError) -> Self {
        if err.is_retryable() {
            Self::retryable(err.to_string())
        } else {
            Self::permanent(err.to_string())
        }
    }
}

/// Classified result of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Success,
    Failure(HandlerError),
    TimedOut(Duration),
}

impl Outcome {
    pub fn from_result(result: Result<(), HandlerError>) -> Self {
        match result {
            Ok(()) => Outcome::Success,
            Err(err) => Outcome::Failure(err),
        }
    }

    /// Could the retry budget still be spent on this outcome?
    pub fn is_retryable(&self) -> bool {
        match self {
            Outcome::Success => false,
            Outcome::Failure(err) => err.is_retryable(),
            Outcome::TimedOut(_) => true,
        }
    }

    /// Error text recorded on the task; `None` for success.
    pub fn error_message(&self) -> Option<String> {
        match self {
            Outcome::Success => None,
            Outcome::Failure(err) => Some(err.message.clone()),
            Outcome::TimedOut(limit) => Some(SpindleError::HandlerTimeout(*limit).to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_retryable_and_named() {
        let outcome = Outcome::TimedOut(Duration::from_secs(30));
        assert!(outcome.is_retryable());
        assert!(outcome.error_message().unwrap().contains("timed out"));
    }

    #[test]
    fn permanent_failure_skips_retry() {
        let outcome = Outcome::from_result(Err(HandlerError::permanent("json decode")));
        assert!(!outcome.is_retryable());
        assert_eq!(outcome.error_message().as_deref(), Some("json decode"));
    }

    #[test]
    fn spindle_errors_keep_their_retry_class() {
        let malformed = HandlerError::from(SpindleError::MalformedTask("short".into()));
        assert_eq!(malformed.kind, FailureKind::Permanent);

        let timeout = HandlerError::from(SpindleError::HandlerTimeout(Duration::from_secs(1)));
        assert_eq!(timeout.kind, FailureKind::Retryable);
    }

    #[test]
    fn failure_kind_serializes_as_screaming_case() {
        let s = serde_json::to_string(&FailureKind::Permanent).unwrap();
        assert_eq!(s, "\"PERMANENT\"");
    }
}
