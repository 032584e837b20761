//! Query error types.

use semstreams_embed::EmbedError;
use semstreams_model::{Classified, ErrorClass};
use semstreams_store::StoreError;

/// Errors raised by the query evaluators.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// A bucket read failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The embedder tier failed (or is disabled).
    #[error(transparent)]
    Embed(#[from] EmbedError),

    /// The request itself is malformed (bad entity ID, bad parameter).
    #[error("invalid query: {0}")]
    InvalidInput(String),
}

impl Classified for QueryError {
    fn class(&self) -> ErrorClass {
        match self {
            QueryError::Store(e) => e.class(),
            QueryError::Embed(e) => e.class(),
            QueryError::InvalidInput(_) => ErrorClass::InvalidInput,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_embedder_surfaces_preconditions() {
        let err = QueryError::Embed(EmbedError::Disabled);
        assert_eq!(err.class(), ErrorClass::Preconditions);
    }
}
