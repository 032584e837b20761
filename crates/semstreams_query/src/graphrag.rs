//! Community-based semantic search.
//!
//! **Local** search scopes similarity ranking to the seed entity's community
//! at a level, blending cosine similarity with normalised PageRank
//! centrality. **Global** search ranks communities by query-to-summary
//! similarity, then re-ranks the top communities' representative members by
//! query-to-member similarity.
//!
//! Degraded modes: with no communities at the requested level, both modes
//! fall back to a pure similarity scan over the L1 vector cache (flagged
//! `degraded`); with the embedder disabled, callers receive a
//! *Preconditions* error.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use semstreams_community::CommunityStore;
use semstreams_embed::{cosine, EmbedderTier};
use semstreams_model::{DottedPattern, EntityId};
use semstreams_net::api::{
    GlobalQueryRequest, LocalQueryRequest, ScoredEntity, SemanticQueryRequest,
    SemanticQueryResponse,
};
use semstreams_store::EntityStore;

use crate::error::QueryError;

/// Score blending weights for local search.
#[derive(Debug, Clone, Copy)]
pub struct GraphRagSettings {
    /// Weight of query-member cosine similarity.
    pub similarity_weight: f64,
    /// Weight of normalised PageRank centrality.
    pub centrality_weight: f64,
}

impl Default for GraphRagSettings {
    fn default() -> Self {
        Self {
            similarity_weight: 0.7,
            centrality_weight: 0.3,
        }
    }
}

/// The GraphRAG evaluator.
pub struct GraphRag {
    entities: Arc<EntityStore>,
    embedder: Arc<EmbedderTier>,
    communities: Arc<CommunityStore>,
    settings: GraphRagSettings,
}

impl GraphRag {
    /// Wire the evaluator to its collaborators.
    #[must_use]
    pub fn new(
        entities: Arc<EntityStore>,
        embedder: Arc<EmbedderTier>,
        communities: Arc<CommunityStore>,
        settings: GraphRagSettings,
    ) -> Self {
        Self {
            entities,
            embedder,
            communities,
            settings,
        }
    }

    fn rank_and_trim(mut results: Vec<ScoredEntity>, limit: usize) -> Vec<ScoredEntity> {
        results.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        results.truncate(limit);
        results
    }

    async fn attach_states(&self, results: &mut [ScoredEntity]) -> Result<(), QueryError> {
        for result in results.iter_mut() {
            if let Ok(id) = EntityId::parse(&result.id) {
                result.entity = self.entities.get(&id).await?;
            }
        }
        Ok(())
    }

    async fn member_similarity(
        &self,
        member: &str,
        query: &[f32],
    ) -> Result<Option<f64>, QueryError> {
        let Ok(id) = EntityId::parse(member) else {
            return Ok(None);
        };
        let Some(state) = self.entities.get(&id).await? else {
            return Ok(None);
        };
        let Some(vector) = self.embedder.entity_vector(&state).await? else {
            return Ok(None);
        };
        Ok(Some(f64::from(cosine(query, &vector))))
    }

    /// Pure similarity scan over the L1 vector cache.
    ///
    /// # Errors
    ///
    /// Returns a *Preconditions* error when the embedder is disabled.
    pub async fn semantic(
        &self,
        request: &SemanticQueryRequest,
    ) -> Result<SemanticQueryResponse, QueryError> {
        let Some(query) = self.embedder.query_vector(&request.query).await? else {
            return Ok(SemanticQueryResponse {
                results: Vec::new(),
                degraded: false,
            });
        };
        let pattern = request.entity_type.as_deref().map(DottedPattern::new);
        let results: Vec<ScoredEntity> = self
            .embedder
            .l1()
            .snapshot()
            .into_iter()
            .filter(|(_, entity_type, _)| {
                pattern.as_ref().is_none_or(|p| p.matches(entity_type))
            })
            .map(|(id, _, vector)| ScoredEntity {
                id,
                score: f64::from(cosine(&query, &vector)),
                entity: None,
            })
            .collect();
        let mut results = Self::rank_and_trim(results, request.limit);
        self.attach_states(&mut results).await?;
        Ok(SemanticQueryResponse {
            results,
            degraded: false,
        })
    }

    /// Community-scoped local search.
    ///
    /// # Errors
    ///
    /// Returns a *Preconditions* error when the embedder is disabled, or a
    /// store error.
    pub async fn local(
        &self,
        request: &LocalQueryRequest,
    ) -> Result<SemanticQueryResponse, QueryError> {
        let start = EntityId::parse(&request.start)
            .map_err(|e| QueryError::InvalidInput(e.to_string()))?;
        let Some(query) = self.embedder.query_vector(&request.query).await? else {
            return Ok(SemanticQueryResponse {
                results: Vec::new(),
                degraded: false,
            });
        };

        let community_id = self
            .communities
            .community_of(request.level, start.as_str())
            .await?;
        let Some(community_id) = community_id else {
            // No community at this level: degrade to a flat similarity scan.
            debug!(start = %start, level = request.level, "no community, degrading to scan");
            let mut response = self
                .semantic(&SemanticQueryRequest {
                    query: request.query.clone(),
                    limit: request.limit,
                    entity_type: None,
                })
                .await?;
            response.degraded = true;
            return Ok(response);
        };
        let Some(record) = self.communities.get(request.level, &community_id).await? else {
            return Ok(SemanticQueryResponse {
                results: Vec::new(),
                degraded: true,
            });
        };

        let max_rank = record
            .rank
            .values()
            .fold(0.0f64, |acc, &r| acc.max(r))
            .max(f64::MIN_POSITIVE);
        let mut results = Vec::new();
        for member in &record.members {
            let Some(similarity) = self.member_similarity(member, &query).await? else {
                continue;
            };
            let centrality = record.rank.get(member).copied().unwrap_or(0.0) / max_rank;
            results.push(ScoredEntity {
                id: member.clone(),
                score: self.settings.similarity_weight * similarity
                    + self.settings.centrality_weight * centrality,
                entity: None,
            });
        }
        let mut results = Self::rank_and_trim(results, request.limit);
        self.attach_states(&mut results).await?;
        Ok(SemanticQueryResponse {
            results,
            degraded: false,
        })
    }

    /// Cross-community global search.
    ///
    /// # Errors
    ///
    /// Returns a *Preconditions* error when the embedder is disabled, or a
    /// store error.
    pub async fn global(
        &self,
        request: &GlobalQueryRequest,
    ) -> Result<SemanticQueryResponse, QueryError> {
        let Some(query) = self.embedder.query_vector(&request.query).await? else {
            return Ok(SemanticQueryResponse {
                results: Vec::new(),
                degraded: false,
            });
        };

        let communities = self.communities.communities_at(request.level).await?;
        if communities.is_empty() {
            debug!(level = request.level, "no communities, degrading to scan");
            let mut response = self
                .semantic(&SemanticQueryRequest {
                    query: request.query.clone(),
                    limit: request.limit,
                    entity_type: None,
                })
                .await?;
            response.degraded = true;
            return Ok(response);
        }

        // Rank communities by query-to-summary similarity.
        let mut ranked: Vec<(f64, &semstreams_community::CommunityRecord)> = Vec::new();
        for record in &communities {
            let Some(summary_vector) = self.embedder.query_vector(record.summary_text()).await?
            else {
                continue;
            };
            ranked.push((f64::from(cosine(&query, &summary_vector)), record));
        }
        ranked.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.id.cmp(&b.1.id))
        });
        ranked.truncate(request.max_communities);

        // Re-rank the top communities' representative members jointly.
        let mut best: HashMap<String, f64> = HashMap::new();
        for (_, record) in &ranked {
            for member in &record.rep_entities {
                let Some(similarity) = self.member_similarity(member, &query).await? else {
                    continue;
                };
                let entry = best.entry(member.clone()).or_insert(f64::MIN);
                *entry = entry.max(similarity);
            }
        }
        let results: Vec<ScoredEntity> = best
            .into_iter()
            .map(|(id, score)| ScoredEntity {
                id,
                score,
                entity: None,
            })
            .collect();
        let mut results = Self::rank_and_trim(results, request.limit);
        self.attach_states(&mut results).await?;
        Ok(SemanticQueryResponse {
            results,
            degraded: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use semstreams_community::{
        CommunityDetector, CommunityMetrics, CommunityStore, DetectorSettings,
    };
    use semstreams_embed::{EmbedMetrics, EmbedderSettings, EmbedderTier, TextExtractor};
    use semstreams_model::{EntityPayload, Triple};
    use semstreams_store::MemoryBucket;
    use tokio_util::sync::CancellationToken;

    use super::*;

    async fn fixture() -> GraphRag {
        let entities = Arc::new(EntityStore::new(Arc::new(MemoryBucket::new(
            "ENTITY_STATES",
        ))));
        let embedder = Arc::new(
            EmbedderTier::new(
                EmbedderSettings::default(),
                Some(Arc::new(MemoryBucket::new("EMBEDDINGS_CACHE"))),
                EmbedMetrics::new().unwrap(),
            )
            .unwrap(),
        );
        let community_bucket: Arc<dyn semstreams_store::KeyValue> =
            Arc::new(MemoryBucket::new("COMMUNITY_INDEX"));
        let communities = Arc::new(CommunityStore::new(community_bucket.clone()));

        let groups = [
            (
                "acme.ops.log.hq.fleet.rescue",
                ["001", "002"],
                "search and rescue drone operations",
            ),
            (
                "acme.ops.log.hq.fleet.survey",
                ["101", "102"],
                "terrain survey rover mapping",
            ),
        ];
        for (fleet, members, text) in groups {
            let fleet_id = EntityId::parse(fleet).unwrap();
            let mut payload = EntityPayload::new(fleet_id.clone(), "ops.fleet");
            payload
                .properties
                .insert("description".to_string(), json!(text));
            let outcome = entities.upsert(payload).await.unwrap();
            embedder.embed_entity(&outcome.current).await.unwrap();
            for member in members {
                let id =
                    EntityId::parse(&format!("acme.tele.robo.gcs1.unit.{member}")).unwrap();
                let mut payload = EntityPayload::new(id.clone(), "robotics.unit");
                payload
                    .properties
                    .insert("description".to_string(), json!(text));
                payload.triples = vec![Triple::new(
                    id,
                    "ops.fleet.member_of",
                    json!(fleet_id.as_str()),
                )];
                let outcome = entities.upsert(payload).await.unwrap();
                embedder.embed_entity(&outcome.current).await.unwrap();
            }
        }

        // Detect communities into the shared bucket.
        let detector = CommunityDetector::new(
            DetectorSettings::default(),
            entities.clone(),
            CommunityStore::new(community_bucket),
            TextExtractor::default(),
            CommunityMetrics::new().unwrap(),
        )
        .unwrap();
        detector.run_once(&CancellationToken::new()).await.unwrap();

        GraphRag::new(entities, embedder, communities, GraphRagSettings::default())
    }

    #[tokio::test]
    async fn test_local_search_scoped_to_community() {
        let graphrag = fixture().await;
        let response = graphrag
            .local(&LocalQueryRequest {
                start: "acme.tele.robo.gcs1.unit.001".to_string(),
                query: "rescue operations".to_string(),
                level: 0,
                limit: 10,
            })
            .await
            .unwrap();
        assert!(!response.degraded);
        assert!(!response.results.is_empty());
        // Only rescue-community members appear.
        for result in &response.results {
            assert!(
                result.id.contains("unit.0") || result.id.ends_with("fleet.rescue"),
                "unexpected member {}",
                result.id
            );
        }
    }

    #[tokio::test]
    async fn test_global_search_prefers_matching_community() {
        let graphrag = fixture().await;
        let response = graphrag
            .global(&GlobalQueryRequest {
                query: "terrain survey mapping".to_string(),
                level: 0,
                max_communities: 1,
                limit: 10,
            })
            .await
            .unwrap();
        assert!(!response.degraded);
        assert!(!response.results.is_empty());
        for result in &response.results {
            assert!(
                result.id.contains("unit.1") || result.id.ends_with("fleet.survey"),
                "unexpected member {}",
                result.id
            );
        }
    }

    #[tokio::test]
    async fn test_local_degrades_without_communities() {
        let graphrag = fixture().await;
        let response = graphrag
            .local(&LocalQueryRequest {
                start: "acme.tele.robo.gcs1.unit.001".to_string(),
                query: "rescue".to_string(),
                level: 7,
                limit: 10,
            })
            .await
            .unwrap();
        assert!(response.degraded);
        assert!(!response.results.is_empty());
    }

    #[tokio::test]
    async fn test_semantic_type_filter() {
        let graphrag = fixture().await;
        let response = graphrag
            .semantic(&SemanticQueryRequest {
                query: "rescue drone".to_string(),
                limit: 10,
                entity_type: Some("ops.*".to_string()),
            })
            .await
            .unwrap();
        assert!(!response.results.is_empty());
        for result in &response.results {
            assert!(result.entity.as_ref().unwrap().node.entity_type.starts_with("ops."));
        }
    }

    #[tokio::test]
    async fn test_results_carry_entity_state() {
        let graphrag = fixture().await;
        let response = graphrag
            .semantic(&SemanticQueryRequest {
                query: "rescue".to_string(),
                limit: 3,
                entity_type: None,
            })
            .await
            .unwrap();
        assert!(response.results.iter().all(|r| r.entity.is_some()));
    }
}
