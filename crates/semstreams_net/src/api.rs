//! Request/reply types for the query surface.
//!
//! Queries are structured requests with enumerated parameters — there is no
//! query language. Every reply is either an `ok` value or a structured
//! error record carrying the error class and a human description.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use semstreams_model::{Classified, EntityState, ErrorRecord};

/// Generic reply wrapper: exactly one of `ok` or `error` is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: serde::de::DeserializeOwned"))]
pub struct Reply<T> {
    /// The successful result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<T>,
    /// The structured failure record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
}

impl<T> Reply<T> {
    /// A successful reply.
    #[must_use]
    pub fn ok(value: T) -> Self {
        Self {
            ok: Some(value),
            error: None,
        }
    }

    /// A failure reply from a classified error.
    pub fn error<E: Classified + std::fmt::Display>(err: &E) -> Self {
        Self {
            ok: None,
            error: Some(ErrorRecord::from_error(err)),
        }
    }

    /// A failure reply from an explicit record.
    #[must_use]
    pub fn error_record(record: ErrorRecord) -> Self {
        Self {
            ok: None,
            error: Some(record),
        }
    }
}

// ── Entity operations ───────────────────────────────────────────────────────

/// `graph.entity.get` — by ID, or by alias via the alias index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityGetRequest {
    /// Exact entity ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Alias value, resolved through the alias index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
}

/// `graph.entity.get` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityGetResponse {
    /// The entity, when found.
    pub entity: Option<EntityState>,
}

/// A property filter applied during entity scans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PropertyFilter {
    /// Dotted property path within the node properties.
    pub field: String,
    /// Comparison operator.
    pub op: FilterOp,
    /// Comparison operand.
    pub value: Value,
}

/// Comparison operators for property filters and rule conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterOp {
    /// Equal (with numeric coercion).
    Eq,
    /// Not equal.
    Ne,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
    /// String or array containment.
    Contains,
    /// Field presence.
    Exists,
}

/// `graph.entity.query` — type-scoped scan with property filters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityQueryRequest {
    /// Dotted type pattern (`*` wildcards allowed); `None` scans all types.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
    /// Property filters, all of which must hold.
    #[serde(default)]
    pub filters: Vec<PropertyFilter>,
    /// Maximum entities returned.
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

/// `graph.entity.query` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityQueryResponse {
    /// Matching entities, up to the requested limit.
    pub entities: Vec<EntityState>,
}

/// `graph.entity.delete` — administrative delete.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDeleteRequest {
    /// The entity to remove.
    pub id: String,
}

/// `graph.entity.delete` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityDeleteResponse {
    /// `true` if the entity existed.
    pub deleted: bool,
}

/// `graph.predicate.query` — subjects of a (predicate, object) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredicateQueryRequest {
    /// The predicate name.
    pub predicate: String,
    /// The object value (entity ID string or scalar).
    pub object: Value,
}

/// `graph.predicate.query` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredicateQueryResponse {
    /// Entity IDs asserting the pair, sorted.
    pub entities: Vec<String>,
}

// ── Graph queries ───────────────────────────────────────────────────────────

/// Traversal direction for path queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Follow outgoing edges and relationship-triples only.
    Outgoing,
    /// Follow incoming references only.
    Incoming,
    /// Follow both directions.
    #[default]
    Both,
}

/// `graph.query.path` — bounded best-first traversal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathQueryRequest {
    /// Seed entity.
    pub start: String,
    /// Maximum hop depth.
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Maximum visited nodes.
    #[serde(default = "default_max_nodes")]
    pub max_nodes: usize,
    /// Wall-clock budget in milliseconds.
    #[serde(default = "default_max_time_ms")]
    pub max_time_ms: u64,
    /// Restrict expansion to these predicates; `None` follows all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_filter: Option<Vec<String>>,
    /// Per-hop score decay in (0, 1].
    #[serde(default = "default_decay")]
    pub decay_factor: f64,
    /// Maximum tracked paths.
    #[serde(default = "default_max_paths")]
    pub max_paths: usize,
    /// Traversal direction.
    #[serde(default)]
    pub direction: Direction,
}

fn default_max_depth() -> usize {
    3
}
fn default_max_nodes() -> usize {
    100
}
fn default_max_time_ms() -> u64 {
    1_000
}
fn default_decay() -> f64 {
    0.85
}
fn default_max_paths() -> usize {
    20
}

/// `graph.query.path` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathQueryResponse {
    /// Visited entities (full state), best score first.
    pub entities: Vec<EntityState>,
    /// Discovered paths as entity ID sequences, best terminal score first.
    pub paths: Vec<Vec<String>>,
    /// Per-entity traversal scores.
    pub scores: HashMap<String, f64>,
    /// `true` iff a bound (depth, nodes, time, paths) tripped.
    pub truncated: bool,
}

/// A scored entity in a semantic result list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredEntity {
    /// The entity ID.
    pub id: String,
    /// Combined relevance score.
    pub score: f64,
    /// Full state, when requested and available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<EntityState>,
}

/// `graph.query.semantic` — pure similarity over embedded entities.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticQueryRequest {
    /// Natural-language query text.
    pub query: String,
    /// Maximum results.
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Optional dotted type pattern restriction.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub entity_type: Option<String>,
}

/// `graph.query.local` — GraphRAG local search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalQueryRequest {
    /// Seed entity whose community scopes the search.
    pub start: String,
    /// Natural-language query text.
    pub query: String,
    /// Community hierarchy level.
    #[serde(default)]
    pub level: usize,
    /// Maximum results.
    #[serde(default = "default_limit")]
    pub limit: usize,
}

/// `graph.query.global` — GraphRAG global search.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalQueryRequest {
    /// Natural-language query text.
    pub query: String,
    /// Community hierarchy level.
    #[serde(default)]
    pub level: usize,
    /// How many top-ranked communities to expand.
    #[serde(default = "default_max_communities")]
    pub max_communities: usize,
    /// Maximum results.
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_max_communities() -> usize {
    5
}

/// Reply for semantic, local and global queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticQueryResponse {
    /// Ranked results, best first.
    pub results: Vec<ScoredEntity>,
    /// `true` when the engine fell back to a degraded mode (e.g. no
    /// communities at the requested level).
    #[serde(default)]
    pub degraded: bool,
}

// ── Community & admin ───────────────────────────────────────────────────────

/// `graph.community.get` — by community ID, or by member entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityGetRequest {
    /// Community ID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Member entity whose community to fetch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<String>,
    /// Hierarchy level.
    #[serde(default)]
    pub level: usize,
}

/// `graph.index.rebuild` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebuildResponse {
    /// Entities scanned from the primary bucket.
    pub entities_scanned: usize,
    /// Index entries written across all buckets.
    pub entries_written: usize,
}

/// `graph.stats` reply.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsResponse {
    /// Entities in the primary bucket.
    pub entities: usize,
    /// Communities per hierarchy level.
    pub communities: HashMap<usize, usize>,
    /// Vectors currently held in the L1 cache.
    pub l1_vectors: usize,
    /// Messages processed since startup.
    pub messages_processed: u64,
}

/// `graph.health` reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Overall status: `ok` or `degraded`.
    pub status: String,
    /// Active embedding provider name.
    pub embedder: String,
    /// Seconds since startup.
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_shapes() {
        let ok: Reply<EntityDeleteResponse> = Reply::ok(EntityDeleteResponse { deleted: true });
        let value = serde_json::to_value(&ok).unwrap();
        assert_eq!(value["ok"]["deleted"], true);
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_path_request_defaults() {
        let req: PathQueryRequest =
            serde_json::from_str(r#"{"start": "acme.tele.robo.gcs1.drone.001"}"#).unwrap();
        assert_eq!(req.max_depth, 3);
        assert_eq!(req.max_nodes, 100);
        assert_eq!(req.direction, Direction::Both);
        assert!(req.edge_filter.is_none());
        assert!((req.decay_factor - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn test_filter_op_wire_names() {
        assert_eq!(serde_json::to_string(&FilterOp::Ge).unwrap(), "\"ge\"");
        let op: FilterOp = serde_json::from_str("\"contains\"").unwrap();
        assert_eq!(op, FilterOp::Contains);
    }
}
