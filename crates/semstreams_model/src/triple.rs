//! Triples and edges.
//!
//! A [`Triple`] is the unit of fact: subject, predicate, object plus
//! provenance. A triple whose object is a syntactically valid entity ID is a
//! **relationship**; anything else is a **property**. Relationship checks are
//! purely syntactic — the referenced entity may not exist, and readers must
//! tolerate dangling references.
//!
//! An [`Edge`] is a computed outgoing relationship stored on the entity
//! state. Edges are recomputed from relationship-triples on every upsert and
//! coexist with the triples they were derived from; both participate in
//! traversal.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::id::EntityId;

/// A single fact about an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Triple {
    /// The entity this fact is about.
    pub subject: EntityId,
    /// Three-part dotted predicate name (e.g. `robotics.battery.level`).
    pub predicate: String,
    /// The object: a scalar property value, or an entity ID string for
    /// relationships.
    pub object: Value,
    /// Where this fact came from.
    #[serde(default)]
    pub source: String,
    /// When the fact was asserted.
    pub timestamp: DateTime<Utc>,
    /// Confidence in [0, 1].
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    /// Optional free-form context.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    /// Optional datatype hint for the object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
}

fn default_confidence() -> f64 {
    1.0
}

impl Triple {
    /// Build a triple with defaults for provenance fields.
    #[must_use]
    pub fn new(subject: EntityId, predicate: impl Into<String>, object: Value) -> Self {
        Self {
            subject,
            predicate: predicate.into(),
            object,
            source: String::new(),
            timestamp: Utc::now(),
            confidence: 1.0,
            context: None,
            datatype: None,
        }
    }

    /// Set the source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Set the confidence, clamped to [0, 1].
    #[must_use]
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// The object as an entity ID, if this triple is a relationship.
    #[must_use]
    pub fn object_entity(&self) -> Option<EntityId> {
        match &self.object {
            Value::String(s) => EntityId::parse(s).ok(),
            _ => None,
        }
    }

    /// `true` iff the object is a syntactically valid entity ID.
    #[must_use]
    pub fn is_relationship(&self) -> bool {
        self.object_entity().is_some()
    }
}

/// A computed outgoing relationship.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// The relationship predicate.
    pub predicate: String,
    /// The target entity.
    pub target: EntityId,
    /// Traversal weight.
    pub weight: f64,
    /// Confidence in [0, 1].
    pub confidence: f64,
    /// Optional expiry; expired edges are skipped by traversal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    /// Extra edge properties.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub properties: HashMap<String, Value>,
}

impl Edge {
    /// Returns `true` if the edge has expired as of `now`.
    #[must_use]
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Recompute the outgoing edge set from a triple list.
///
/// One edge per distinct (predicate, target) pair; on duplicates the highest
/// confidence wins. Weight mirrors confidence. A triple's context, when
/// present, is carried into the edge property map.
#[must_use]
pub fn edges_from_triples(triples: &[Triple]) -> Vec<Edge> {
    let mut by_key: HashMap<(String, EntityId), Edge> = HashMap::new();
    for triple in triples {
        let Some(target) = triple.object_entity() else {
            continue;
        };
        let mut properties = HashMap::new();
        if let Some(ctx) = &triple.context {
            properties.insert("context".to_string(), Value::String(ctx.clone()));
        }
        let edge = Edge {
            predicate: triple.predicate.clone(),
            target: target.clone(),
            weight: triple.confidence,
            confidence: triple.confidence,
            expires_at: None,
            properties,
        };
        by_key
            .entry((triple.predicate.clone(), target))
            .and_modify(|existing| {
                if edge.confidence > existing.confidence {
                    *existing = edge.clone();
                }
            })
            .or_insert(edge);
    }
    let mut edges: Vec<Edge> = by_key.into_values().collect();
    edges.sort_by(|a, b| (&a.predicate, &a.target).cmp(&(&b.predicate, &b.target)));
    edges
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn drone() -> EntityId {
        EntityId::parse("acme.tele.robo.gcs1.drone.001").unwrap()
    }

    #[test]
    fn test_property_triple_is_not_relationship() {
        let t = Triple::new(drone(), "robotics.battery.level", json!(85.2));
        assert!(!t.is_relationship());
        assert!(t.object_entity().is_none());
    }

    #[test]
    fn test_relationship_triple() {
        let t = Triple::new(
            drone(),
            "ops.fleet.member_of",
            json!("acme.ops.log.hq.fleet.rescue"),
        );
        assert!(t.is_relationship());
        assert_eq!(
            t.object_entity().unwrap().as_str(),
            "acme.ops.log.hq.fleet.rescue"
        );
    }

    #[test]
    fn test_string_that_is_not_an_id_is_property() {
        let t = Triple::new(drone(), "robotics.communication.callsign", json!("rescue-alpha"));
        assert!(!t.is_relationship());
    }

    #[test]
    fn test_edges_from_triples_dedups_by_predicate_target() {
        let fleet = json!("acme.ops.log.hq.fleet.rescue");
        let triples = vec![
            Triple::new(drone(), "ops.fleet.member_of", fleet.clone()).with_confidence(0.4),
            Triple::new(drone(), "ops.fleet.member_of", fleet).with_confidence(0.9),
            Triple::new(drone(), "robotics.battery.level", json!(85.2)),
        ];
        let edges = edges_from_triples(&triples);
        assert_eq!(edges.len(), 1);
        assert!((edges[0].confidence - 0.9).abs() < f64::EPSILON);
        assert_eq!(edges[0].predicate, "ops.fleet.member_of");
    }

    #[test]
    fn test_edge_expiry() {
        let edge = Edge {
            predicate: "ops.fleet.member_of".to_string(),
            target: drone(),
            weight: 1.0,
            confidence: 1.0,
            expires_at: Some(Utc::now() - chrono::Duration::seconds(10)),
            properties: HashMap::new(),
        };
        assert!(edge.expired(Utc::now()));
    }

    #[test]
    fn test_confidence_clamped() {
        let t = Triple::new(drone(), "robotics.battery.level", json!(1)).with_confidence(3.5);
        assert!((t.confidence - 1.0).abs() < f64::EPSILON);
    }
}
