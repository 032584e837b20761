//! Community records in the `COMMUNITY_INDEX` bucket.
//!
//! Two key families:
//!
//! - `graph.community.{level}.{communityID}` → full community record.
//! - `graph.community.entity.{level}.{entityID}` → community ID string.
//!
//! The detector replaces the whole bucket on every run; readers tolerate the
//! brief window where levels are being rewritten.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use semstreams_store::kv::KeyValue;
use semstreams_store::StoreError;

/// A stored community.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommunityRecord {
    /// Deterministic community ID (smallest member entity ID).
    pub id: String,
    /// Hierarchy level (0 = finest).
    pub level: usize,
    /// Sorted member entity IDs.
    pub members: Vec<String>,
    /// Top keywords, strongest first.
    pub keywords: Vec<String>,
    /// Always-available statistical summary.
    pub statistical_summary: String,
    /// Optional prose summary from the remote summariser.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_summary: Option<String>,
    /// Representative members, highest PageRank first.
    pub rep_entities: Vec<String>,
    /// PageRank per member.
    #[serde(default)]
    pub rank: BTreeMap<String, f64>,
    /// When the detector produced this record.
    pub detected_at: DateTime<Utc>,
}

impl CommunityRecord {
    /// The summary text used for semantic ranking: the LLM prose when
    /// present, otherwise the statistical baseline.
    #[must_use]
    pub fn summary_text(&self) -> &str {
        self.llm_summary
            .as_deref()
            .unwrap_or(&self.statistical_summary)
    }
}

fn community_key(level: usize, id: &str) -> String {
    format!("graph.community.{level}.{id}")
}

fn entity_key(level: usize, entity_id: &str) -> String {
    format!("graph.community.entity.{level}.{entity_id}")
}

/// Read/write access to the community bucket.
pub struct CommunityStore {
    bucket: Arc<dyn KeyValue>,
}

impl CommunityStore {
    /// Wrap the community bucket.
    #[must_use]
    pub fn new(bucket: Arc<dyn KeyValue>) -> Self {
        Self { bucket }
    }

    /// Store one community record plus its member mappings.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn put(&self, record: &CommunityRecord) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(record).map_err(StoreError::Encode)?;
        self.bucket
            .put(&community_key(record.level, &record.id), bytes)
            .await?;
        for member in &record.members {
            let value = serde_json::to_vec(&record.id).map_err(StoreError::Encode)?;
            self.bucket
                .put(&entity_key(record.level, member), value)
                .await?;
        }
        Ok(())
    }

    /// Fetch a community record.
    ///
    /// # Errors
    ///
    /// Returns a backend error or a corrupt-record error.
    pub async fn get(&self, level: usize, id: &str) -> Result<Option<CommunityRecord>, StoreError> {
        let key = community_key(level, id);
        match self.bucket.get(&key).await? {
            Some(bytes) => {
                let record =
                    serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                        bucket: self.bucket.bucket().to_string(),
                        key,
                        source,
                    })?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// The community an entity belongs to at a level, if any.
    ///
    /// # Errors
    ///
    /// Returns a backend error or a corrupt-record error.
    pub async fn community_of(
        &self,
        level: usize,
        entity_id: &str,
    ) -> Result<Option<String>, StoreError> {
        let key = entity_key(level, entity_id);
        match self.bucket.get(&key).await? {
            Some(bytes) => {
                let id = serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                    bucket: self.bucket.bucket().to_string(),
                    key,
                    source,
                })?;
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// All community records at a level, sorted by ID.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn communities_at(&self, level: usize) -> Result<Vec<CommunityRecord>, StoreError> {
        let prefix = format!("graph.community.{level}.");
        let mut out = Vec::new();
        for key in self.bucket.keys_with_prefix(&prefix).await? {
            if let Some(bytes) = self.bucket.get(&key).await? {
                let record: CommunityRecord =
                    serde_json::from_slice(&bytes).map_err(|source| StoreError::Corrupt {
                        bucket: self.bucket.bucket().to_string(),
                        key: key.clone(),
                        source,
                    })?;
                out.push(record);
            }
        }
        out.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(out)
    }

    /// Community counts per level.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn counts_per_level(&self) -> Result<HashMap<usize, usize>, StoreError> {
        let mut counts = HashMap::new();
        for key in self.bucket.keys_with_prefix("graph.community.").await? {
            let rest = &key["graph.community.".len()..];
            if rest.starts_with("entity.") {
                continue;
            }
            if let Some((level, _)) = rest.split_once('.') {
                if let Ok(level) = level.parse::<usize>() {
                    *counts.entry(level).or_insert(0) += 1;
                }
            }
        }
        Ok(counts)
    }

    /// Drop every community record and mapping.
    ///
    /// # Errors
    ///
    /// Returns a backend error.
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.bucket.purge_all().await
    }
}

#[cfg(test)]
mod tests {
    use semstreams_store::MemoryBucket;

    use super::*;

    fn record(level: usize, id: &str, members: &[&str]) -> CommunityRecord {
        CommunityRecord {
            id: id.to_string(),
            level,
            members: members.iter().map(|s| s.to_string()).collect(),
            keywords: vec!["rescue".to_string()],
            statistical_summary: "a community".to_string(),
            llm_summary: None,
            rep_entities: vec![members[0].to_string()],
            rank: BTreeMap::new(),
            detected_at: Utc::now(),
        }
    }

    fn store() -> CommunityStore {
        CommunityStore::new(Arc::new(MemoryBucket::new("COMMUNITY_INDEX")))
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let store = store();
        let rec = record(0, "a.a.a.a.a.1", &["a.a.a.a.a.1", "a.a.a.a.a.2"]);
        store.put(&rec).await.unwrap();

        let back = store.get(0, "a.a.a.a.a.1").await.unwrap().unwrap();
        assert_eq!(back.members.len(), 2);
        assert_eq!(
            store.community_of(0, "a.a.a.a.a.2").await.unwrap().as_deref(),
            Some("a.a.a.a.a.1")
        );
    }

    #[tokio::test]
    async fn test_membership_is_per_level_not_on_entity() {
        let store = store();
        store
            .put(&record(0, "a.a.a.a.a.1", &["a.a.a.a.a.1"]))
            .await
            .unwrap();
        store
            .put(&record(1, "a.a.a.a.a.1", &["a.a.a.a.a.1", "a.a.a.a.a.9"]))
            .await
            .unwrap();

        assert!(store.community_of(0, "a.a.a.a.a.9").await.unwrap().is_none());
        assert!(store.community_of(1, "a.a.a.a.a.9").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_communities_at_level_excludes_entity_mappings() {
        let store = store();
        store
            .put(&record(0, "a.a.a.a.a.1", &["a.a.a.a.a.1", "a.a.a.a.a.2"]))
            .await
            .unwrap();
        store
            .put(&record(0, "b.b.b.b.b.1", &["b.b.b.b.b.1"]))
            .await
            .unwrap();
        let all = store.communities_at(0).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].id, "a.a.a.a.a.1");
    }

    #[tokio::test]
    async fn test_counts_per_level() {
        let store = store();
        store
            .put(&record(0, "a.a.a.a.a.1", &["a.a.a.a.a.1"]))
            .await
            .unwrap();
        store
            .put(&record(0, "b.b.b.b.b.1", &["b.b.b.b.b.1"]))
            .await
            .unwrap();
        store
            .put(&record(1, "a.a.a.a.a.1", &["a.a.a.a.a.1"]))
            .await
            .unwrap();
        let counts = store.counts_per_level().await.unwrap();
        assert_eq!(counts[&0], 2);
        assert_eq!(counts[&1], 1);
    }

    #[test]
    fn test_summary_text_prefers_llm() {
        let mut rec = record(0, "a.a.a.a.a.1", &["a.a.a.a.a.1"]);
        assert_eq!(rec.summary_text(), "a community");
        rec.llm_summary = Some("prose".to_string());
        assert_eq!(rec.summary_text(), "prose");
    }
}
