//! Vector caches.
//!
//! **L1** is in-memory and TTL-bounded: entity ID → vector plus metadata.
//! Loss across restart is tolerated. **L2** is optional and
//! content-addressed in a KV bucket: `sha256(text)` → vector, which
//! deduplicates identical texts across entities and survives restarts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use semstreams_store::kv::KeyValue;
use semstreams_store::StoreError;

/// Hex SHA-256 of an extracted text, the L2 key.
#[must_use]
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// One L1 entry: the vector plus the metadata queries need.
#[derive(Debug, Clone)]
pub struct CachedVector {
    /// The embedding.
    pub vector: Arc<Vec<f32>>,
    /// Entity type at embed time, used by type-filtered scans.
    pub entity_type: String,
    /// Content hash of the embedded text.
    pub text_hash: String,
    /// Entity update time at embed time.
    pub updated_at: DateTime<Utc>,
    inserted: Instant,
}

/// The in-memory TTL-bounded vector cache.
#[derive(Debug)]
pub struct L1Cache {
    entries: DashMap<String, CachedVector>,
    ttl: Duration,
}

impl L1Cache {
    /// A cache with the given retention window.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    /// Fetch a live vector; expired entries are evicted on access.
    #[must_use]
    pub fn get(&self, entity_id: &str) -> Option<Arc<Vec<f32>>> {
        let expired = match self.entries.get(entity_id) {
            Some(entry) if entry.inserted.elapsed() < self.ttl => {
                return Some(entry.vector.clone());
            }
            Some(_) => true,
            None => false,
        };
        if expired {
            self.entries.remove(entity_id);
        }
        None
    }

    /// Fetch the full entry, if live.
    #[must_use]
    pub fn entry(&self, entity_id: &str) -> Option<CachedVector> {
        self.entries
            .get(entity_id)
            .filter(|e| e.inserted.elapsed() < self.ttl)
            .map(|e| e.value().clone())
    }

    /// Insert or replace a vector.
    pub fn insert(
        &self,
        entity_id: &str,
        entity_type: &str,
        text_hash: &str,
        updated_at: DateTime<Utc>,
        vector: Arc<Vec<f32>>,
    ) {
        self.entries.insert(
            entity_id.to_string(),
            CachedVector {
                vector,
                entity_type: entity_type.to_string(),
                text_hash: text_hash.to_string(),
                updated_at,
                inserted: Instant::now(),
            },
        );
    }

    /// Drop a vector (entity deleted).
    pub fn remove(&self, entity_id: &str) {
        self.entries.remove(entity_id);
    }

    /// Live entry count.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.inserted.elapsed() < self.ttl)
            .count()
    }

    /// Evict expired entries. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.inserted.elapsed() < self.ttl);
        before - self.entries.len()
    }

    /// Snapshot of live entries for similarity scans:
    /// `(entity_id, entity_type, vector)`.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, String, Arc<Vec<f32>>)> {
        self.entries
            .iter()
            .filter(|e| e.inserted.elapsed() < self.ttl)
            .map(|e| (e.key().clone(), e.entity_type.clone(), e.vector.clone()))
            .collect()
    }
}

/// Persisted L2 record.
#[derive(Debug, Serialize, Deserialize)]
struct VectorRecord {
    vector: Vec<f32>,
}

/// The content-addressed persistent vector cache.
pub struct L2Cache {
    bucket: Arc<dyn KeyValue>,
}

impl L2Cache {
    /// Wrap the cache bucket.
    #[must_use]
    pub fn new(bucket: Arc<dyn KeyValue>) -> Self {
        Self { bucket }
    }

    /// Look up a vector by content hash.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn get(&self, hash: &str) -> Result<Option<Vec<f32>>, StoreError> {
        match self.bucket.get(hash).await? {
            Some(bytes) => {
                let record: VectorRecord =
                    serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                        bucket: self.bucket.bucket().to_string(),
                        key: hash.to_string(),
                        source,
                    })?;
                Ok(Some(record.vector))
            }
            None => Ok(None),
        }
    }

    /// Store a vector under its content hash.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn put(&self, hash: &str, vector: &[f32]) -> Result<(), StoreError> {
        let record = VectorRecord {
            vector: vector.to_vec(),
        };
        let bytes = serde_json::to_vec(&record).map_err(StoreError::Encode)?;
        self.bucket.put(hash, bytes).await?;
        Ok(())
    }
}
