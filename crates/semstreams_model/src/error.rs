//! Error taxonomy.
//!
//! Every error that crosses a component boundary is classified into one of
//! five classes. Upstream code dispatches on the class — retry policy, dead
//! lettering and caller-visible failure records all key off it — and never
//! sees a raw transport error.

use serde::{Deserialize, Serialize};

/// The five error classes recognised by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Malformed payload, bad entity ID, bad predicate shape. Never retried;
    /// routed to the dead-letter subject.
    InvalidInput,
    /// The operation requires a subsystem that is disabled. Surfaced to the
    /// caller with an explanation; never retried.
    Preconditions,
    /// Bus or KV I/O failure, remote embedder unreachable. Retried with
    /// exponential backoff.
    Transient,
    /// Programmer error. Never retried; the worker logs and continues.
    Fatal,
    /// Deadline exceeded. Partial results are returned where applicable.
    Timeout,
}

impl ErrorClass {
    /// Returns `true` if an operation failing with this class should be
    /// retried.
    #[must_use]
    pub fn retryable(self) -> bool {
        matches!(self, ErrorClass::Transient | ErrorClass::Timeout)
    }

    /// Stable lowercase name, used in logs and metrics labels.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::InvalidInput => "invalid_input",
            ErrorClass::Preconditions => "preconditions",
            ErrorClass::Transient => "transient",
            ErrorClass::Fatal => "fatal",
            ErrorClass::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error type that knows its class.
pub trait Classified {
    /// The taxonomy class of this error.
    fn class(&self) -> ErrorClass;
}

/// Structured error record returned to query callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// The taxonomy class.
    pub class: ErrorClass,
    /// Human-readable description.
    pub message: String,
}

impl ErrorRecord {
    /// Build a record from any classified error.
    pub fn from_error<E: Classified + std::fmt::Display>(err: &E) -> Self {
        Self {
            class: err.class(),
            message: err.to_string(),
        }
    }

    /// Build a record with an explicit class and message.
    pub fn new(class: ErrorClass, message: impl Into<String>) -> Self {
        Self {
            class,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classes() {
        assert!(ErrorClass::Transient.retryable());
        assert!(ErrorClass::Timeout.retryable());
        assert!(!ErrorClass::InvalidInput.retryable());
        assert!(!ErrorClass::Preconditions.retryable());
        assert!(!ErrorClass::Fatal.retryable());
    }

    #[test]
    fn test_class_serialises_snake_case() {
        let json = serde_json::to_string(&ErrorClass::InvalidInput).unwrap();
        assert_eq!(json, "\"invalid_input\"");
    }

    #[test]
    fn test_record_roundtrip() {
        let rec = ErrorRecord::new(ErrorClass::Timeout, "deadline exceeded");
        let json = serde_json::to_string(&rec).unwrap();
        let back: ErrorRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, rec);
    }
}
