//! Authoritative entity state and the ingest payload.
//!
//! [`EntityState`] is the record stored in the primary bucket, one per
//! entity ID. [`EntityPayload`] is what arrives on the bus: it exposes the
//! entity ID and the triple set, plus the property map merged into the node.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::id::EntityId;
use crate::triple::{Edge, Triple};

/// Geographic position attached to an entity node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Altitude in metres, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt: Option<f64>,
}

/// Entity lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityStatus {
    /// Live entity.
    #[default]
    Active,
    /// Present but not currently reporting.
    Inactive,
    /// Administratively removed; retained until purge.
    Deleted,
}

/// The typed node half of an entity: type, query-essential properties,
/// optional position and status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Dotted type string, e.g. `robotics.drone`.
    #[serde(rename = "type")]
    pub entity_type: String,
    /// Query-essential scalar or nested-object properties.
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Optional geographic position.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    /// Lifecycle status.
    #[serde(default)]
    pub status: EntityStatus,
}

/// The authoritative per-entity record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityState {
    /// The entity's globally unique ID.
    pub id: EntityId,
    /// Typed node data.
    pub node: Node,
    /// Outgoing computed edges, recomputed on every upsert.
    #[serde(default)]
    pub edges: Vec<Edge>,
    /// Full triple set from the latest accepted payload.
    #[serde(default)]
    pub triples: Vec<Triple>,
    /// Handle to an out-of-band blob store holding the raw message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_ref: Option<String>,
    /// Monotonically increasing version counter.
    pub version: u64,
    /// Server timestamp of the last accepted write.
    pub updated_at: DateTime<Utc>,
}

impl EntityState {
    /// An empty record for a first write.
    #[must_use]
    pub fn empty(id: EntityId) -> Self {
        Self {
            id,
            node: Node {
                entity_type: String::new(),
                properties: Map::new(),
                position: None,
                status: EntityStatus::Active,
            },
            edges: Vec::new(),
            triples: Vec::new(),
            object_ref: None,
            version: 0,
            updated_at: Utc::now(),
        }
    }
}

/// The typed payload carried by an entity upsert message.
///
/// A payload must expose an entity ID and a triple set; messages lacking
/// either are invalid input. Properties merge shallowly into the node — new
/// keys are added, existing keys overwritten, nested maps replaced wholesale
/// to preserve intra-group consistency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityPayload {
    /// The stable entity identifier.
    pub entity_id: EntityId,
    /// Dotted entity type, e.g. `robotics.drone`.
    #[serde(rename = "type", default)]
    pub entity_type: String,
    /// Properties to merge into the node.
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Position replacement, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    /// Status replacement, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<EntityStatus>,
    /// The complete triple set (replaces the stored set).
    #[serde(default)]
    pub triples: Vec<Triple>,
    /// Explicit version; must exceed the stored version if present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
    /// Handle to the raw message in an out-of-band blob store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object_ref: Option<String>,
}

impl EntityPayload {
    /// Minimal payload for an entity of the given type.
    #[must_use]
    pub fn new(entity_id: EntityId, entity_type: impl Into<String>) -> Self {
        Self {
            entity_id,
            entity_type: entity_type.into(),
            properties: Map::new(),
            position: None,
            status: None,
            triples: Vec::new(),
            version: None,
            object_ref: None,
        }
    }

    /// The stable entity identifier this payload addresses.
    #[must_use]
    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    /// The triple set carried by this payload.
    #[must_use]
    pub fn triples(&self) -> &[Triple] {
        &self.triples
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::triple::Triple;

    fn drone_id() -> EntityId {
        EntityId::parse("acme.tele.robo.gcs1.drone.001").unwrap()
    }

    #[test]
    fn test_state_json_shape() {
        let mut state = EntityState::empty(drone_id());
        state.node.entity_type = "robotics.drone".to_string();
        state.version = 3;
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["id"], "acme.tele.robo.gcs1.drone.001");
        assert_eq!(json["node"]["type"], "robotics.drone");
        assert_eq!(json["version"], 3);
        // updated_at serialises as an ISO-8601 string.
        assert!(json["updated_at"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_payload_exposes_id_and_triples() {
        let mut payload = EntityPayload::new(drone_id(), "robotics.drone");
        payload
            .triples
            .push(Triple::new(drone_id(), "robotics.battery.level", json!(85.2)));
        assert_eq!(payload.entity_id().as_str(), "acme.tele.robo.gcs1.drone.001");
        assert_eq!(payload.triples().len(), 1);
    }

    #[test]
    fn test_payload_deserialises_with_defaults() {
        let payload: EntityPayload = serde_json::from_value(json!({
            "entity_id": "acme.tele.robo.gcs1.drone.001",
            "type": "robotics.drone"
        }))
        .unwrap();
        assert!(payload.triples.is_empty());
        assert!(payload.version.is_none());
        assert!(payload.status.is_none());
    }

    #[test]
    fn test_payload_rejects_bad_id() {
        let result: Result<EntityPayload, _> = serde_json::from_value(json!({
            "entity_id": "not.an.id",
            "type": "robotics.drone"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn test_status_serialises_lowercase() {
        assert_eq!(
            serde_json::to_string(&EntityStatus::Inactive).unwrap(),
            "\"inactive\""
        );
    }
}
