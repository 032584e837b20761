//! Storage error types.

use semstreams_model::{Classified, ErrorClass};

/// Errors raised by bucket and store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backing store failed; retryable.
    #[error("bucket {bucket}: backend error: {message}")]
    Backend {
        /// The bucket involved.
        bucket: String,
        /// Backend-provided description.
        message: String,
    },

    /// A compare-and-swap write lost the race.
    #[error("bucket {bucket}: revision conflict on key {key:?}")]
    Conflict {
        /// The bucket involved.
        bucket: String,
        /// The contested key.
        key: String,
    },

    /// A stored record failed to decode.
    #[error("bucket {bucket}: corrupt record at key {key:?}: {source}")]
    Corrupt {
        /// The bucket involved.
        bucket: String,
        /// The key holding the bad record.
        key: String,
        /// The decode failure.
        #[source]
        source: serde_json::Error,
    },

    /// An upsert carried a version not newer than the stored one.
    #[error("stale write for {id}: incoming version {incoming} not newer than stored {stored}")]
    StaleWrite {
        /// The entity being written.
        id: String,
        /// The version the payload carried.
        incoming: u64,
        /// The version already stored.
        stored: u64,
    },

    /// A record failed to encode; indicates a programming error.
    #[error("failed to encode record: {0}")]
    Encode(#[source] serde_json::Error),
}

impl StoreError {
    /// Shorthand for a backend failure.
    #[must_use]
    pub fn backend(bucket: &str, err: impl std::fmt::Display) -> Self {
        StoreError::Backend {
            bucket: bucket.to_string(),
            message: err.to_string(),
        }
    }
}

impl Classified for StoreError {
    fn class(&self) -> ErrorClass {
        match self {
            StoreError::Backend { .. } | StoreError::Conflict { .. } => ErrorClass::Transient,
            StoreError::Corrupt { .. } | StoreError::Encode(_) => ErrorClass::Fatal,
            StoreError::StaleWrite { .. } => ErrorClass::InvalidInput,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert_eq!(
            StoreError::backend("ENTITY_STATES", "io").class(),
            ErrorClass::Transient
        );
        assert_eq!(
            StoreError::StaleWrite {
                id: "a.b.c.d.e.f".to_string(),
                incoming: 1,
                stored: 2
            }
            .class(),
            ErrorClass::InvalidInput
        );
    }
}
