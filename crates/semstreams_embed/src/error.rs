//! Embedder error types.

use semstreams_model::{Classified, ErrorClass};
use semstreams_store::StoreError;

/// Errors raised by the embedder tier.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// The embedding provider is disabled by configuration.
    #[error("embedding provider is disabled")]
    Disabled,

    /// The provider failed to produce a vector.
    #[error("embedding provider error: {0}")]
    Provider(String),

    /// The HTTP provider request failed.
    #[error("embedding request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The L2 cache bucket failed.
    #[error(transparent)]
    Cache(#[from] StoreError),
}

impl Classified for EmbedError {
    fn class(&self) -> ErrorClass {
        match self {
            EmbedError::Disabled => ErrorClass::Preconditions,
            EmbedError::Provider(_) | EmbedError::Http(_) => ErrorClass::Transient,
            EmbedError::Cache(e) => e.class(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_is_preconditions() {
        assert_eq!(EmbedError::Disabled.class(), ErrorClass::Preconditions);
        assert_eq!(
            EmbedError::Provider("down".into()).class(),
            ErrorClass::Transient
        );
    }
}
