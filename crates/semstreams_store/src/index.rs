//! Secondary index maintenance.
//!
//! Five derived buckets, each a pure function of the entity store:
//!
//! - `PREDICATE_INDEX` — `{predicate}::{canonical(object)}` → set of subjects.
//! - `INCOMING_INDEX` — `{target}::{predicate}` → set of sources.
//! - `ALIAS_INDEX` — `normalize(alias)` → single claiming entity.
//! - `SPATIAL_INDEX` — `geohash(position)` → set of entities.
//! - `TEMPORAL_INDEX` — `bucket(timestamp)` → set of entities.
//!
//! On every committed upsert the maintainer receives `{prior, current}`,
//! derives both entry sets and applies the difference. Index writes are
//! idempotent under replay; readers must tolerate transiently stale entries.
//! All five buckets can be rebuilt from the entity store at any time.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use semstreams_model::value::canonical_scalar;
use semstreams_model::{EntityId, EntityState, Position, VocabularyRegistry};

use crate::entity::EntityStore;
use crate::error::StoreError;
use crate::geohash;
use crate::kv::{modify_set, read_set, KeyValue};

/// Which indexes are maintained, and their tuning knobs.
#[derive(Debug, Clone)]
pub struct IndexSettings {
    /// Maintain `PREDICATE_INDEX`.
    pub predicate: bool,
    /// Maintain `INCOMING_INDEX`.
    pub incoming: bool,
    /// Maintain `ALIAS_INDEX`.
    pub alias: bool,
    /// Maintain `SPATIAL_INDEX`.
    pub spatial: bool,
    /// Maintain `TEMPORAL_INDEX`.
    pub temporal: bool,
    /// Geohash cell precision for the spatial index.
    pub geohash_precision: usize,
    /// Width of one temporal bucket.
    pub temporal_bucket: Duration,
    /// Predicates whose objects carry positions (`{lat, lon}` objects or
    /// `"lat,lon"` strings).
    pub geo_predicates: Vec<String>,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            predicate: true,
            incoming: true,
            alias: true,
            spatial: true,
            temporal: true,
            geohash_precision: geohash::DEFAULT_PRECISION,
            temporal_bucket: Duration::from_secs(60),
            geo_predicates: Vec::new(),
        }
    }
}

/// The record stored per alias key. Collisions resolve by priority (lower
/// wins), then by lexicographically smaller entity ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasRecord {
    /// The claiming entity.
    pub entity_id: String,
    /// The predicate that asserted the alias.
    pub predicate: String,
    /// The vocabulary priority of that predicate.
    pub priority: i32,
}

impl AliasRecord {
    /// `true` when this record beats `other` under the collision policy.
    #[must_use]
    fn beats(&self, other: &AliasRecord) -> bool {
        self.priority < other.priority
            || (self.priority == other.priority && self.entity_id < other.entity_id)
    }
}

/// Index entries derived from one entity state.
#[derive(Debug, Default, PartialEq, Eq)]
struct Derived {
    predicate: BTreeSet<String>,
    incoming: BTreeSet<String>,
    alias: BTreeMap<String, AliasRecord>,
    spatial: BTreeSet<String>,
    temporal: BTreeSet<String>,
}

/// Counts of applied index mutations, for metrics.
#[derive(Debug, Default, Clone, Copy)]
pub struct IndexDiffStats {
    /// Entries added across all buckets.
    pub added: usize,
    /// Entries removed across all buckets.
    pub removed: usize,
}

/// Maintains the five secondary index buckets.
pub struct IndexMaintainer {
    settings: IndexSettings,
    vocabulary: Arc<VocabularyRegistry>,
    predicate: Arc<dyn KeyValue>,
    incoming: Arc<dyn KeyValue>,
    alias: Arc<dyn KeyValue>,
    spatial: Arc<dyn KeyValue>,
    temporal: Arc<dyn KeyValue>,
}

/// Case-fold an alias value: lowercase, trimmed.
#[must_use]
pub fn normalize_alias(value: &str) -> String {
    value.trim().to_lowercase()
}

fn parse_geo(value: &Value) -> Option<Position> {
    match value {
        Value::Object(map) => {
            let lat = map.get("lat")?.as_f64()?;
            let lon = map.get("lon")?.as_f64()?;
            Some(Position {
                lat,
                lon,
                alt: map.get("alt").and_then(Value::as_f64),
            })
        }
        Value::String(s) => {
            let (lat, lon) = s.split_once(',')?;
            Some(Position {
                lat: lat.trim().parse().ok()?,
                lon: lon.trim().parse().ok()?,
                alt: None,
            })
        }
        _ => None,
    }
}

impl IndexMaintainer {
    /// Wire the maintainer to its five buckets.
    #[must_use]
    pub fn new(
        settings: IndexSettings,
        vocabulary: Arc<VocabularyRegistry>,
        predicate: Arc<dyn KeyValue>,
        incoming: Arc<dyn KeyValue>,
        alias: Arc<dyn KeyValue>,
        spatial: Arc<dyn KeyValue>,
        temporal: Arc<dyn KeyValue>,
    ) -> Self {
        Self {
            settings,
            vocabulary,
            predicate,
            incoming,
            alias,
            spatial,
            temporal,
        }
    }

    fn temporal_key(&self, ts: DateTime<Utc>) -> String {
        let width = self.settings.temporal_bucket.as_secs().max(1) as i64;
        let start = ts.timestamp().div_euclid(width) * width;
        start.to_string()
    }

    fn derive(&self, state: &EntityState) -> Derived {
        let mut out = Derived::default();
        let id = state.id.as_str();
        let aliases = self.vocabulary.alias_predicates();

        for triple in &state.triples {
            if let Some(target) = triple.object_entity() {
                if self.settings.predicate {
                    out.predicate
                        .insert(format!("{}::{}", triple.predicate, target.as_str()));
                }
                if self.settings.incoming {
                    out.incoming
                        .insert(format!("{}::{}", target.as_str(), triple.predicate));
                }
            } else if self.settings.predicate
                && VocabularyRegistry::valid_predicate(&triple.predicate)
            {
                if let Some(canonical) = canonical_scalar(&triple.object) {
                    out.predicate
                        .insert(format!("{}::{}", triple.predicate, canonical));
                }
            }

            if self.settings.alias {
                if let Some(&priority) = aliases.get(&triple.predicate) {
                    if let Some(raw) = canonical_scalar(&triple.object) {
                        let key = normalize_alias(&raw);
                        if !key.is_empty() {
                            let record = AliasRecord {
                                entity_id: id.to_string(),
                                predicate: triple.predicate.clone(),
                                priority,
                            };
                            // Within one entity the highest-priority
                            // predicate claims the alias value.
                            out.alias
                                .entry(key)
                                .and_modify(|existing| {
                                    if record.beats(existing) {
                                        *existing = record.clone();
                                    }
                                })
                                .or_insert(record);
                        }
                    }
                }
            }

            if self.settings.spatial && self.settings.geo_predicates.contains(&triple.predicate) {
                if let Some(position) = parse_geo(&triple.object) {
                    out.spatial.insert(geohash::encode(
                        position.lat,
                        position.lon,
                        self.settings.geohash_precision,
                    ));
                }
            }

            if self.settings.temporal {
                out.temporal.insert(self.temporal_key(triple.timestamp));
            }
        }

        if self.settings.spatial {
            if let Some(position) = state.node.position {
                out.spatial.insert(geohash::encode(
                    position.lat,
                    position.lon,
                    self.settings.geohash_precision,
                ));
            }
        }
        if self.settings.temporal {
            out.temporal.insert(self.temporal_key(state.updated_at));
        }

        out
    }

    /// Apply the index diff for a committed upsert.
    ///
    /// # Errors
    ///
    /// Returns the first backend failure; the entity write is already
    /// durable, so the caller retries or schedules a repair.
    pub async fn apply(
        &self,
        prior: Option<&EntityState>,
        current: &EntityState,
    ) -> Result<IndexDiffStats, StoreError> {
        let id = current.id.as_str().to_string();
        let old = prior.map(|p| self.derive(p)).unwrap_or_default();
        let new = self.derive(current);
        let mut stats = IndexDiffStats::default();

        self.apply_set_diff(&self.predicate, &old.predicate, &new.predicate, &id, &mut stats)
            .await?;
        self.apply_set_diff(&self.incoming, &old.incoming, &new.incoming, &id, &mut stats)
            .await?;
        self.apply_set_diff(&self.spatial, &old.spatial, &new.spatial, &id, &mut stats)
            .await?;
        self.apply_set_diff(&self.temporal, &old.temporal, &new.temporal, &id, &mut stats)
            .await?;
        self.apply_alias_diff(&old.alias, &new.alias, &id, &mut stats)
            .await?;

        debug!(
            entity_id = %current.id,
            added = stats.added,
            removed = stats.removed,
            "index diff applied"
        );
        Ok(stats)
    }

    /// Remove every index entry derived from a deleted entity.
    ///
    /// # Errors
    ///
    /// Returns the first backend failure.
    pub async fn remove(&self, prior: &EntityState) -> Result<IndexDiffStats, StoreError> {
        let id = prior.id.as_str().to_string();
        let old = self.derive(prior);
        let new = Derived::default();
        let mut stats = IndexDiffStats::default();

        self.apply_set_diff(&self.predicate, &old.predicate, &new.predicate, &id, &mut stats)
            .await?;
        self.apply_set_diff(&self.incoming, &old.incoming, &new.incoming, &id, &mut stats)
            .await?;
        self.apply_set_diff(&self.spatial, &old.spatial, &new.spatial, &id, &mut stats)
            .await?;
        self.apply_set_diff(&self.temporal, &old.temporal, &new.temporal, &id, &mut stats)
            .await?;
        self.apply_alias_diff(&old.alias, &new.alias, &id, &mut stats)
            .await?;
        Ok(stats)
    }

    async fn apply_set_diff(
        &self,
        bucket: &Arc<dyn KeyValue>,
        old: &BTreeSet<String>,
        new: &BTreeSet<String>,
        member: &str,
        stats: &mut IndexDiffStats,
    ) -> Result<(), StoreError> {
        for key in old.difference(new) {
            modify_set(bucket.as_ref(), key, &[], std::slice::from_ref(&member.to_string()))
                .await?;
            stats.removed += 1;
        }
        for key in new.difference(old) {
            modify_set(bucket.as_ref(), key, std::slice::from_ref(&member.to_string()), &[])
                .await?;
            stats.added += 1;
        }
        Ok(())
    }

    async fn apply_alias_diff(
        &self,
        old: &BTreeMap<String, AliasRecord>,
        new: &BTreeMap<String, AliasRecord>,
        id: &str,
        stats: &mut IndexDiffStats,
    ) -> Result<(), StoreError> {
        for key in old.keys() {
            if !new.contains_key(key) && self.release_alias(key, id).await? {
                stats.removed += 1;
            }
        }
        for (key, record) in new {
            if old.get(key) != Some(record) && self.claim_alias(key, record).await? {
                stats.added += 1;
            }
        }
        Ok(())
    }

    /// Claim an alias key under the collision policy. Returns `true` if the
    /// record was written.
    async fn claim_alias(&self, key: &str, record: &AliasRecord) -> Result<bool, StoreError> {
        let value = serde_json::to_vec(record).map_err(StoreError::Encode)?;
        loop {
            match self.alias.entry(key).await? {
                None => match self.alias.create(key, value.clone()).await {
                    Ok(_) => return Ok(true),
                    Err(StoreError::Conflict { .. }) => continue,
                    Err(e) => return Err(e),
                },
                Some((bytes, revision)) => {
                    let existing: AliasRecord =
                        serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                            bucket: self.alias.bucket().to_string(),
                            key: key.to_string(),
                            source,
                        })?;
                    if existing == *record {
                        return Ok(false);
                    }
                    let ours = existing.entity_id == record.entity_id;
                    if !ours && !record.beats(&existing) {
                        // Collision lost: the alias stays with the
                        // higher-priority claimant and we are not indexed.
                        warn!(alias = key, winner = %existing.entity_id, loser = %record.entity_id,
                              "alias collision, keeping higher-priority entry");
                        return Ok(false);
                    }
                    match self.alias.update(key, value.clone(), revision).await {
                        Ok(_) => return Ok(true),
                        Err(StoreError::Conflict { .. }) => continue,
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }

    /// Release an alias key if this entity holds it. Returns `true` if the
    /// entry was deleted.
    async fn release_alias(&self, key: &str, id: &str) -> Result<bool, StoreError> {
        match self.alias.get(key).await? {
            None => Ok(false),
            Some(bytes) => {
                let existing: AliasRecord =
                    serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                        bucket: self.alias.bucket().to_string(),
                        key: key.to_string(),
                        source,
                    })?;
                if existing.entity_id == id {
                    self.alias.delete(key).await?;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    // ── Lookups ─────────────────────────────────────────────────────────────

    /// Entities asserting `(predicate, object)`.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn predicate_lookup(
        &self,
        predicate: &str,
        object: &Value,
    ) -> Result<Vec<String>, StoreError> {
        let Some(canonical) = canonical_scalar(object) else {
            return Ok(Vec::new());
        };
        read_set(self.predicate.as_ref(), &format!("{predicate}::{canonical}")).await
    }

    /// Sources referencing `target` through `predicate`.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn incoming_lookup(
        &self,
        target: &EntityId,
        predicate: &str,
    ) -> Result<Vec<String>, StoreError> {
        read_set(
            self.incoming.as_ref(),
            &format!("{}::{}", target.as_str(), predicate),
        )
        .await
    }

    /// All predicates through which anything references `target`.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn incoming_predicates(&self, target: &EntityId) -> Result<Vec<String>, StoreError> {
        let prefix = format!("{}::", target.as_str());
        Ok(self
            .incoming
            .keys_with_prefix(&prefix)
            .await?
            .into_iter()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    /// Resolve an alias value to its claiming entity.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn resolve_alias(&self, alias: &str) -> Result<Option<String>, StoreError> {
        let key = normalize_alias(alias);
        match self.alias.get(&key).await? {
            None => Ok(None),
            Some(bytes) => {
                let record: AliasRecord =
                    serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                        bucket: self.alias.bucket().to_string(),
                        key,
                        source,
                    })?;
                Ok(Some(record.entity_id))
            }
        }
    }

    /// Entities in the geohash cell covering the given position.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn spatial_lookup(&self, lat: f64, lon: f64) -> Result<Vec<String>, StoreError> {
        let cell = geohash::encode(lat, lon, self.settings.geohash_precision);
        read_set(self.spatial.as_ref(), &cell).await
    }

    /// Entities with activity in `[from, to]`.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn temporal_range(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<String>, StoreError> {
        let width = self.settings.temporal_bucket.as_secs().max(1) as i64;
        let mut start = from.timestamp().div_euclid(width) * width;
        let end = to.timestamp();
        let mut out = BTreeSet::new();
        while start <= end {
            for id in read_set(self.temporal.as_ref(), &start.to_string()).await? {
                out.insert(id);
            }
            start += width;
        }
        Ok(out.into_iter().collect())
    }

    /// Drop every derived entry and rebuild all five buckets by scanning
    /// the entity store.
    ///
    /// # Errors
    ///
    /// Returns the first backend failure.
    pub async fn rebuild(&self, store: &EntityStore) -> Result<(usize, usize), StoreError> {
        for bucket in [
            &self.predicate,
            &self.incoming,
            &self.alias,
            &self.spatial,
            &self.temporal,
        ] {
            bucket.purge_all().await?;
        }
        let states = store.scan_all().await?;
        let scanned = states.len();
        let mut written = 0;
        for state in &states {
            let stats = self.apply(None, state).await?;
            written += stats.added;
        }
        Ok((scanned, written))
    }

    /// The configured settings.
    #[must_use]
    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }
}
