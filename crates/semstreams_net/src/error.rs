//! Network-layer error types.

use semstreams_model::{Classified, ErrorClass};

/// Errors that can occur during network operations.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Failed to encode a message to JSON.
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    /// Failed to decode a message from JSON.
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),

    /// The payload decoded but does not expose an entity ID and triple set.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// NATS connection error.
    #[error("NATS connection error: {0}")]
    Connect(#[from] async_nats::ConnectError),

    /// NATS subscription error.
    #[error("NATS subscribe error: {0}")]
    Subscribe(#[from] async_nats::SubscribeError),

    /// NATS publish error.
    #[error("NATS publish error: {0}")]
    Publish(#[from] async_nats::PublishError),

    /// NATS request/reply error.
    #[error("NATS request error: {0}")]
    Request(#[from] async_nats::RequestError),
}

impl Classified for NetError {
    fn class(&self) -> ErrorClass {
        match self {
            NetError::Encode(_) | NetError::Decode(_) | NetError::InvalidPayload(_) => {
                ErrorClass::InvalidInput
            }
            NetError::Connect(_)
            | NetError::Subscribe(_)
            | NetError::Publish(_)
            | NetError::Request(_) => ErrorClass::Transient,
        }
    }
}
