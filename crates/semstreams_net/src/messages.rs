//! Message envelope and dead-letter record.
//!
//! Every bus message is a JSON [`Envelope`]: a three-part message type, an
//! opaque payload, source, timestamp and unique id. Entity ingest payloads
//! decode into [`EntityPayload`]; payloads that do not expose an entity ID
//! and a triple set are invalid input.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use semstreams_model::{EntityPayload, ErrorClass};

use crate::error::NetError;

/// Three-part message type: domain, category, version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageType {
    /// Top-level domain, e.g. `graph`.
    pub domain: String,
    /// Category within the domain, e.g. `entity.upsert`.
    pub category: String,
    /// Schema version string.
    pub version: String,
}

impl MessageType {
    /// Build a message type at schema version `v1`.
    #[must_use]
    pub fn v1(domain: impl Into<String>, category: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            category: category.into(),
            version: "v1".to_string(),
        }
    }
}

/// The wire envelope carried by every bus message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// The typed message kind.
    #[serde(rename = "type")]
    pub msg_type: MessageType,
    /// Domain payload; shape depends on `msg_type`.
    pub payload: Value,
    /// Producing component or system.
    pub source: String,
    /// Producer timestamp.
    pub timestamp: DateTime<Utc>,
    /// Unique message id.
    pub id: String,
}

impl Envelope {
    /// Build an envelope around a serialisable payload.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Encode`] if the payload cannot be serialised.
    pub fn new<T: Serialize>(
        msg_type: MessageType,
        payload: &T,
        source: impl Into<String>,
    ) -> Result<Self, NetError> {
        Ok(Self {
            msg_type,
            payload: serde_json::to_value(payload).map_err(NetError::Encode)?,
            source: source.into(),
            timestamp: Utc::now(),
            id: Uuid::new_v4().to_string(),
        })
    }

    /// Decode the payload as a typed entity upsert.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::InvalidPayload`] when the payload does not expose
    /// a valid entity ID and triple set.
    pub fn entity_payload(&self) -> Result<EntityPayload, NetError> {
        serde_json::from_value(self.payload.clone())
            .map_err(|e| NetError::InvalidPayload(e.to_string()))
    }
}

/// Record published to the dead-letter subject for unprocessable messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    /// The subject the original message arrived on.
    pub subject: String,
    /// Why the message could not be processed.
    pub reason: String,
    /// The error class that routed it here.
    pub class: ErrorClass,
    /// The original envelope id, when one could be decoded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    /// The original payload, for operator inspection.
    pub payload: Value,
    /// When the message was dead-lettered.
    pub timestamp: DateTime<Utc>,
}

/// Event published on `graph.entity.updated` after a committed upsert.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityUpdated {
    /// The entity that changed.
    pub entity_id: String,
    /// Its new version.
    pub version: u64,
    /// The entity's dotted type.
    #[serde(rename = "type")]
    pub entity_type: String,
}

#[cfg(test)]
mod tests {
    use semstreams_model::EntityId;
    use serde_json::json;

    use super::*;

    #[test]
    fn test_envelope_roundtrip() {
        let payload = EntityPayload::new(
            EntityId::parse("acme.tele.robo.gcs1.drone.001").unwrap(),
            "robotics.drone",
        );
        let env = Envelope::new(MessageType::v1("graph", "entity.upsert"), &payload, "test").unwrap();
        let bytes = crate::codec::encode(&env).unwrap();
        let back: Envelope = crate::codec::decode(&bytes).unwrap();
        assert_eq!(back.msg_type.domain, "graph");
        assert_eq!(back.id, env.id);
        let decoded = back.entity_payload().unwrap();
        assert_eq!(decoded.entity_id().as_str(), "acme.tele.robo.gcs1.drone.001");
    }

    #[test]
    fn test_payload_without_entity_id_is_invalid() {
        let env = Envelope::new(
            MessageType::v1("graph", "entity.upsert"),
            &json!({"triples": []}),
            "test",
        )
        .unwrap();
        assert!(env.entity_payload().is_err());
    }

    #[test]
    fn test_envelope_wire_shape() {
        let env = Envelope::new(MessageType::v1("graph", "entity.upsert"), &json!({}), "udp-reader")
            .unwrap();
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["type"]["domain"], "graph");
        assert_eq!(value["type"]["category"], "entity.upsert");
        assert_eq!(value["type"]["version"], "v1");
        assert_eq!(value["source"], "udp-reader");
        assert!(value["id"].as_str().is_some());
    }
}
