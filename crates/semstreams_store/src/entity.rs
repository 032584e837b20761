//! Authoritative entity store.
//!
//! One JSON record per entity ID in the primary bucket. Writes to the same
//! ID serialise through a per-ID async mutex plus a revision-checked update,
//! so the store is safe even with multiple writer processes. Writes to
//! distinct IDs proceed in parallel.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use semstreams_model::triple::edges_from_triples;
use semstreams_model::{DottedPattern, EntityId, EntityPayload, EntityState};

use crate::error::StoreError;
use crate::kv::KeyValue;

/// The outcome of an upsert: the prior record (if any) and the committed
/// record. The index maintainer diffs the two.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    /// State before the write; `None` on first sight of the ID.
    pub prior: Option<EntityState>,
    /// State after the write.
    pub current: EntityState,
}

/// The authoritative per-entity store over the primary bucket.
pub struct EntityStore {
    bucket: Arc<dyn KeyValue>,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl EntityStore {
    /// Wrap the primary bucket.
    #[must_use]
    pub fn new(bucket: Arc<dyn KeyValue>) -> Self {
        Self {
            bucket,
            locks: DashMap::new(),
        }
    }

    fn id_lock(&self, id: &EntityId) -> Arc<Mutex<()>> {
        self.locks
            .entry(id.as_str().to_string())
            .or_default()
            .clone()
    }

    /// Fetch one entity by ID.
    ///
    /// # Errors
    ///
    /// Returns a backend error, or [`StoreError::Corrupt`] on an undecodable
    /// record.
    pub async fn get(&self, id: &EntityId) -> Result<Option<EntityState>, StoreError> {
        match self.bucket.get(id.as_str()).await? {
            Some(bytes) => {
                let state = serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                    bucket: self.bucket.bucket().to_string(),
                    key: id.as_str().to_string(),
                    source,
                })?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    /// Merge a payload into the stored record.
    ///
    /// Version handling: a payload carrying an explicit version must exceed
    /// the stored version or the write is rejected as a stale write;
    /// otherwise the server assigns `stored + 1`. Properties merge shallowly
    /// (nested maps replaced wholesale), triples are replaced, and outgoing
    /// edges are recomputed from the new relationship-triples.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::StaleWrite`] on a version that is not newer,
    /// or a backend error.
    pub async fn upsert(&self, payload: EntityPayload) -> Result<UpsertOutcome, StoreError> {
        let id = payload.entity_id().clone();
        let lock = self.id_lock(&id);
        let _guard = lock.lock().await;

        let stored = self.bucket.entry(id.as_str()).await?;
        let (prior, revision) = match stored {
            Some((bytes, revision)) => {
                let state: EntityState =
                    serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                        bucket: self.bucket.bucket().to_string(),
                        key: id.as_str().to_string(),
                        source,
                    })?;
                (Some(state), Some(revision))
            }
            None => (None, None),
        };

        let stored_version = prior.as_ref().map_or(0, |s| s.version);
        let version = match payload.version {
            Some(v) if v > stored_version => v,
            Some(v) => {
                return Err(StoreError::StaleWrite {
                    id: id.as_str().to_string(),
                    incoming: v,
                    stored: stored_version,
                });
            }
            None => stored_version + 1,
        };

        let mut current = prior.clone().unwrap_or_else(|| EntityState::empty(id.clone()));
        if !payload.entity_type.is_empty() {
            current.node.entity_type = payload.entity_type.clone();
        }
        for (key, value) in &payload.properties {
            current.node.properties.insert(key.clone(), value.clone());
        }
        if let Some(position) = payload.position {
            current.node.position = Some(position);
        }
        if let Some(status) = payload.status {
            current.node.status = status;
        }
        if let Some(object_ref) = &payload.object_ref {
            current.object_ref = Some(object_ref.clone());
        }
        current.triples = payload.triples.clone();
        current.edges = edges_from_triples(&current.triples);
        current.version = version;
        current.updated_at = Utc::now();

        let bytes = serde_json::to_vec(&current).map_err(StoreError::Encode)?;
        match revision {
            Some(revision) => {
                self.bucket.update(id.as_str(), bytes, revision).await?;
            }
            None => {
                self.bucket.create(id.as_str(), bytes).await?;
            }
        }

        debug!(entity_id = %id, version, "entity committed");
        Ok(UpsertOutcome { prior, current })
    }

    /// Administrative delete. Returns the prior state so the caller can
    /// clean up derived index entries.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn delete(&self, id: &EntityId) -> Result<Option<EntityState>, StoreError> {
        let lock = self.id_lock(id);
        let _guard = lock.lock().await;

        let prior = self.get(id).await?;
        if prior.is_some() {
            self.bucket.delete(id.as_str()).await?;
        }
        self.locks.remove(id.as_str());
        Ok(prior)
    }

    /// Scan entities whose type matches the dotted pattern (`None` matches
    /// all). O(N) over the bucket; bounded by `limit`.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn scan_by_type(
        &self,
        type_pattern: Option<&str>,
        limit: usize,
    ) -> Result<Vec<EntityState>, StoreError> {
        let pattern = type_pattern.map(DottedPattern::new);
        let mut out = Vec::new();
        for key in self.bucket.keys().await? {
            if out.len() >= limit {
                break;
            }
            let Ok(id) = EntityId::parse(&key) else {
                continue;
            };
            let Some(state) = self.get(&id).await? else {
                continue;
            };
            let matches = pattern
                .as_ref()
                .is_none_or(|p| p.matches(&state.node.entity_type));
            if matches {
                out.push(state);
            }
        }
        Ok(out)
    }

    /// Load every entity. Used by index rebuild and community detection.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn scan_all(&self) -> Result<Vec<EntityState>, StoreError> {
        self.scan_by_type(None, usize::MAX).await
    }

    /// Number of stored entities.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.bucket.keys().await?.len())
    }

    /// Check a stored property against a dotted field path.
    #[must_use]
    pub fn property_at<'a>(state: &'a EntityState, field: &str) -> Option<&'a Value> {
        let mut parts = field.split('.');
        let first = parts.next()?;
        let mut value = state.node.properties.get(first)?;
        for part in parts {
            value = value.as_object()?.get(part)?;
        }
        Some(value)
    }
}
