//! Community-detection error types.

use semstreams_model::{Classified, ErrorClass};
use semstreams_store::StoreError;

/// Errors raised by the detector and community store.
#[derive(Debug, thiserror::Error)]
pub enum CommunityError {
    /// A bucket operation failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The remote summariser failed; the statistical summary stands.
    #[error("summariser error: {0}")]
    Summarizer(String),

    /// The run was cancelled by shutdown.
    #[error("community detection cancelled")]
    Cancelled,
}

impl Classified for CommunityError {
    fn class(&self) -> ErrorClass {
        match self {
            CommunityError::Store(e) => e.class(),
            CommunityError::Summarizer(_) => ErrorClass::Transient,
            CommunityError::Cancelled => ErrorClass::Timeout,
        }
    }
}
