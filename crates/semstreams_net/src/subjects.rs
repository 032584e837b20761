//! Bus subject hierarchy.
//!
//! Subjects are dotted, with `*` matching a single token and `>` matching
//! one or more trailing tokens. Entity ingest arrives on the `events.graph`
//! tree; the query surface is request/reply under `graph.`.

/// Default ingest subscription: entity upsert events of any category.
pub const ENTITY_EVENTS: &str = "events.graph.entity.*";

// ── Query surface (request/reply) ───────────────────────────────────────────

/// Fetch one entity by ID or alias.
pub const ENTITY_GET: &str = "graph.entity.get";

/// Scan entities by type pattern with property filters.
pub const ENTITY_QUERY: &str = "graph.entity.query";

/// Administrative delete: clears an entity and its derived index entries.
pub const ENTITY_DELETE: &str = "graph.entity.delete";

/// Look up the subjects of a (predicate, object) pair.
pub const PREDICATE_QUERY: &str = "graph.predicate.query";

/// Bounded graph traversal (PathRAG).
pub const QUERY_PATH: &str = "graph.query.path";

/// Pure vector-similarity search over embedded entities.
pub const QUERY_SEMANTIC: &str = "graph.query.semantic";

/// Community-scoped semantic search (GraphRAG local).
pub const QUERY_LOCAL: &str = "graph.query.local";

/// Cross-community semantic search (GraphRAG global).
pub const QUERY_GLOBAL: &str = "graph.query.global";

/// Fetch a community record, or an entity's community at a level.
pub const COMMUNITY_GET: &str = "graph.community.get";

/// Drop and rebuild all derived index buckets from the entity store.
pub const INDEX_REBUILD: &str = "graph.index.rebuild";

/// Operational statistics snapshot.
pub const STATS: &str = "graph.stats";

/// Prometheus text exposition of all engine metrics.
pub const METRICS: &str = "graph.metrics";

/// Liveness/readiness record.
pub const HEALTH: &str = "graph.health";

// ── Outputs (published) ─────────────────────────────────────────────────────

/// Broadcast after every committed entity upsert.
pub const ENTITY_UPDATED: &str = "graph.entity.updated";

/// Broadcast when a rule fires.
pub const RULE_TRIGGERED: &str = "events.rule.triggered";

/// Unprocessable messages, with a reason record.
pub const DEAD_LETTER: &str = "graph.dlq";

// ── Dynamic subject builders ────────────────────────────────────────────────

/// Build an entity event subject for a category.
///
/// `events.graph.entity.<category>`
#[must_use]
pub fn entity_event(category: &str) -> String {
    format!("events.graph.entity.{category}")
}

/// Build the event subject a rule publishes on when it fires.
///
/// `events.rule.<rule_id>`
#[must_use]
pub fn rule_event(rule_id: &str) -> String {
    format!("events.rule.{rule_id}")
}
