//! Stable KV bucket names.
//!
//! These names are part of the external interface: operators and sibling
//! services address the buckets by these exact strings.

/// Authoritative per-entity state, keyed by entity ID.
pub const ENTITY_STATES: &str = "ENTITY_STATES";

/// `{predicate}::{canonical(object)}` → set of entity IDs.
pub const PREDICATE_INDEX: &str = "PREDICATE_INDEX";

/// `{target}::{predicate}` → set of source entity IDs.
pub const INCOMING_INDEX: &str = "INCOMING_INDEX";

/// `normalize(alias)` → single entity ID record.
pub const ALIAS_INDEX: &str = "ALIAS_INDEX";

/// `geohash(position)` → set of entity IDs.
pub const SPATIAL_INDEX: &str = "SPATIAL_INDEX";

/// `bucket(timestamp)` → set of entity IDs.
pub const TEMPORAL_INDEX: &str = "TEMPORAL_INDEX";

/// Community records and entity→community mappings, owned by the detector.
pub const COMMUNITY_INDEX: &str = "COMMUNITY_INDEX";

/// Optional content-addressed embedding cache: `sha256(text)` → vector.
pub const EMBEDDINGS_CACHE: &str = "EMBEDDINGS_CACHE";

/// All bucket names created at startup, in creation order.
#[must_use]
pub fn all() -> [&'static str; 8] {
    [
        ENTITY_STATES,
        PREDICATE_INDEX,
        INCOMING_INDEX,
        ALIAS_INDEX,
        SPATIAL_INDEX,
        TEMPORAL_INDEX,
        COMMUNITY_INDEX,
        EMBEDDINGS_CACHE,
    ]
}
