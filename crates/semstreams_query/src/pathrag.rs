//! Bounded best-first graph traversal.
//!
//! Expansion starts from a seed entity at score 1.0; every hop multiplies by
//! the decay factor. Forward neighbours come from the entity's edges and
//! relationship-triples, reverse neighbours from the incoming index; the
//! default follows both directions. Traversal stops on depth, node-count,
//! wall-time or path-count bounds (reported via `truncated`), or when the
//! reachable subgraph under the filter is exhausted.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::debug;

use semstreams_model::{EntityId, EntityState};
use semstreams_net::api::{Direction, PathQueryRequest, PathQueryResponse};
use semstreams_store::{EntityStore, IndexMaintainer};

use crate::error::QueryError;

struct Candidate {
    score: f64,
    depth: usize,
    id: String,
    path: Vec<String>,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.score == other.score && self.id == other.id
    }
}
impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: highest score first; on ties the lexicographically
        // smaller ID pops first, keeping traversal deterministic.
        self.score
            .partial_cmp(&other.score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// The PathRAG evaluator.
pub struct PathRag {
    entities: Arc<EntityStore>,
    index: Arc<IndexMaintainer>,
}

impl PathRag {
    /// Wire the evaluator to the entity store and index maintainer.
    #[must_use]
    pub fn new(entities: Arc<EntityStore>, index: Arc<IndexMaintainer>) -> Self {
        Self { entities, index }
    }

    async fn neighbors(
        &self,
        id: &str,
        state: Option<&EntityState>,
        filter: Option<&HashSet<String>>,
        direction: Direction,
    ) -> Result<Vec<String>, QueryError> {
        let mut out: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let allowed = |predicate: &str| filter.is_none_or(|f| f.contains(predicate));

        if direction != Direction::Incoming {
            if let Some(state) = state {
                let now = Utc::now();
                for edge in &state.edges {
                    if !edge.expired(now) && allowed(&edge.predicate) {
                        let target = edge.target.as_str().to_string();
                        if seen.insert(target.clone()) {
                            out.push(target);
                        }
                    }
                }
                for triple in &state.triples {
                    if let Some(target) = triple.object_entity() {
                        if allowed(&triple.predicate) {
                            let target = target.as_str().to_string();
                            if seen.insert(target.clone()) {
                                out.push(target);
                            }
                        }
                    }
                }
            }
        }

        if direction != Direction::Outgoing {
            if let Ok(target) = EntityId::parse(id) {
                let predicates: Vec<String> = match filter {
                    Some(filter) => filter.iter().cloned().collect(),
                    None => self.index.incoming_predicates(&target).await?,
                };
                for predicate in predicates {
                    for source in self.index.incoming_lookup(&target, &predicate).await? {
                        if seen.insert(source.clone()) {
                            out.push(source);
                        }
                    }
                }
            }
        }

        Ok(out)
    }

    /// Evaluate a path query.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidInput`] on a malformed start ID, or a
    /// store error.
    pub async fn query(&self, request: &PathQueryRequest) -> Result<PathQueryResponse, QueryError> {
        let start = EntityId::parse(&request.start)
            .map_err(|e| QueryError::InvalidInput(e.to_string()))?;
        if request.decay_factor <= 0.0 || request.decay_factor > 1.0 {
            return Err(QueryError::InvalidInput(format!(
                "decay_factor {} outside (0, 1]",
                request.decay_factor
            )));
        }
        let filter: Option<HashSet<String>> = request
            .edge_filter
            .as_ref()
            .map(|predicates| predicates.iter().cloned().collect());
        let deadline = Instant::now() + Duration::from_millis(request.max_time_ms);

        let mut scores: HashMap<String, f64> = HashMap::new();
        let mut paths: Vec<(f64, Vec<String>)> = Vec::new();
        let mut truncated = false;

        let mut heap = BinaryHeap::new();
        heap.push(Candidate {
            score: 1.0,
            depth: 0,
            id: start.as_str().to_string(),
            path: vec![start.as_str().to_string()],
        });

        while let Some(candidate) = heap.pop() {
            if Instant::now() >= deadline {
                truncated = true;
                break;
            }
            // Best-first order guarantees the first visit carries the best
            // score; later candidates for the same node are dropped.
            if scores.contains_key(&candidate.id) {
                continue;
            }
            scores.insert(candidate.id.clone(), candidate.score);
            paths.push((candidate.score, candidate.path.clone()));

            if scores.len() >= request.max_nodes {
                truncated = true;
                break;
            }

            let state = match EntityId::parse(&candidate.id) {
                Ok(id) => self.entities.get(&id).await?,
                Err(_) => None,
            };
            let neighbors = self
                .neighbors(&candidate.id, state.as_ref(), filter.as_ref(), request.direction)
                .await?;

            if candidate.depth >= request.max_depth {
                // The depth bound only counts as truncation when it actually
                // cut off unexplored graph.
                if neighbors.iter().any(|n| !scores.contains_key(n)) {
                    truncated = true;
                }
                continue;
            }

            let score = candidate.score * request.decay_factor;
            for neighbor in neighbors {
                if scores.contains_key(&neighbor) {
                    continue;
                }
                let mut path = candidate.path.clone();
                path.push(neighbor.clone());
                heap.push(Candidate {
                    score,
                    depth: candidate.depth + 1,
                    id: neighbor,
                    path,
                });
            }
        }

        paths.sort_by(|a, b| {
            b.0.partial_cmp(&a.0)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.1.cmp(&b.1))
        });
        if paths.len() > request.max_paths {
            paths.truncate(request.max_paths);
            truncated = true;
        }

        let mut ranked: Vec<(&String, f64)> = scores.iter().map(|(id, &s)| (id, s)).collect();
        ranked.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(b.0))
        });
        let mut entities = Vec::new();
        for (id, _) in &ranked {
            if let Ok(id) = EntityId::parse(id) {
                if let Some(state) = self.entities.get(&id).await? {
                    entities.push(state);
                }
            }
        }

        debug!(
            start = %start,
            visited = scores.len(),
            truncated,
            "path query complete"
        );
        Ok(PathQueryResponse {
            entities,
            paths: paths.into_iter().map(|(_, p)| p).collect(),
            scores,
            truncated,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use semstreams_model::{EntityPayload, Triple, VocabularyRegistry};
    use semstreams_store::index::IndexSettings;
    use semstreams_store::MemoryBucket;

    use super::*;

    const DRONE1: &str = "acme.tele.robo.gcs1.drone.001";
    const DRONE2: &str = "acme.tele.robo.gcs1.drone.002";
    const FLEET: &str = "acme.ops.log.hq.fleet.rescue";
    const SENSOR: &str = "acme.tele.robo.gcs1.sensor.042";

    fn id(s: &str) -> EntityId {
        EntityId::parse(s).unwrap()
    }

    async fn scenario() -> PathRag {
        let entities = Arc::new(EntityStore::new(Arc::new(MemoryBucket::new(
            "ENTITY_STATES",
        ))));
        let index = Arc::new(IndexMaintainer::new(
            IndexSettings::default(),
            Arc::new(VocabularyRegistry::new()),
            Arc::new(MemoryBucket::new("PREDICATE_INDEX")),
            Arc::new(MemoryBucket::new("INCOMING_INDEX")),
            Arc::new(MemoryBucket::new("ALIAS_INDEX")),
            Arc::new(MemoryBucket::new("SPATIAL_INDEX")),
            Arc::new(MemoryBucket::new("TEMPORAL_INDEX")),
        ));

        // drone.001 →member_of→ fleet ←member_of← drone.002
        // drone.001 →has_sensor→ sensor.42
        let mut p1 = EntityPayload::new(id(DRONE1), "robotics.drone");
        p1.triples = vec![
            Triple::new(id(DRONE1), "ops.fleet.member_of", json!(FLEET)),
            Triple::new(id(DRONE1), "robotics.sensor.has_sensor", json!(SENSOR)),
        ];
        let mut p2 = EntityPayload::new(id(DRONE2), "robotics.drone");
        p2.triples = vec![Triple::new(id(DRONE2), "ops.fleet.member_of", json!(FLEET))];

        for payload in [
            p1,
            p2,
            EntityPayload::new(id(FLEET), "ops.fleet"),
            EntityPayload::new(id(SENSOR), "robotics.sensor"),
        ] {
            let outcome = entities.upsert(payload).await.unwrap();
            index
                .apply(outcome.prior.as_ref(), &outcome.current)
                .await
                .unwrap();
        }
        PathRag::new(entities, index)
    }

    fn request(start: &str) -> PathQueryRequest {
        PathQueryRequest {
            start: start.to_string(),
            max_depth: 2,
            max_nodes: 10,
            max_time_ms: 1_000,
            edge_filter: Some(vec![
                "ops.fleet.member_of".to_string(),
                "robotics.sensor.has_sensor".to_string(),
            ]),
            decay_factor: 0.8,
            max_paths: 20,
            direction: Direction::Both,
        }
    }

    #[tokio::test]
    async fn test_decay_scores_and_exhaustion() {
        let pathrag = scenario().await;
        let response = pathrag.query(&request(DRONE1)).await.unwrap();

        assert!(!response.truncated);
        assert_eq!(response.scores.len(), 4);
        assert!((response.scores[DRONE1] - 1.0).abs() < 1e-9);
        assert!((response.scores[FLEET] - 0.8).abs() < 1e-9);
        assert!((response.scores[SENSOR] - 0.8).abs() < 1e-9);
        assert!((response.scores[DRONE2] - 0.64).abs() < 1e-9);
        // Entities ranked best-first.
        assert_eq!(response.entities[0].id.as_str(), DRONE1);
    }

    #[tokio::test]
    async fn test_max_nodes_truncates() {
        let pathrag = scenario().await;
        let mut req = request(DRONE1);
        req.max_nodes = 2;
        let response = pathrag.query(&req).await.unwrap();
        assert!(response.truncated);
        assert_eq!(response.scores.len(), 2);
        assert!(response.scores.contains_key(DRONE1));
        assert!(response.scores.contains_key(FLEET));
    }

    #[tokio::test]
    async fn test_edge_filter_restricts_expansion() {
        let pathrag = scenario().await;
        let mut req = request(DRONE1);
        req.edge_filter = Some(vec!["ops.fleet.member_of".to_string()]);
        let response = pathrag.query(&req).await.unwrap();
        assert!(!response.scores.contains_key(SENSOR));
        assert!(response.scores.contains_key(DRONE2));
    }

    #[tokio::test]
    async fn test_outgoing_only_misses_reverse_edges() {
        let pathrag = scenario().await;
        let mut req = request(DRONE1);
        req.direction = Direction::Outgoing;
        let response = pathrag.query(&req).await.unwrap();
        // drone.002 is only reachable through the fleet's incoming set.
        assert!(!response.scores.contains_key(DRONE2));
        assert!(response.scores.contains_key(FLEET));
    }

    #[tokio::test]
    async fn test_depth_bound_sets_truncated_only_when_graph_remains() {
        let pathrag = scenario().await;
        let mut req = request(DRONE1);
        req.max_depth = 1;
        let response = pathrag.query(&req).await.unwrap();
        // drone.002 lies beyond depth 1.
        assert!(response.truncated);
        assert!(!response.scores.contains_key(DRONE2));
    }

    #[tokio::test]
    async fn test_max_paths_truncates() {
        let pathrag = scenario().await;
        let mut req = request(DRONE1);
        req.max_paths = 2;
        let response = pathrag.query(&req).await.unwrap();
        assert!(response.truncated);
        assert_eq!(response.paths.len(), 2);
        // Best paths kept: the seed itself first.
        assert_eq!(response.paths[0], vec![DRONE1.to_string()]);
    }

    #[tokio::test]
    async fn test_cycles_do_not_loop() {
        let entities = Arc::new(EntityStore::new(Arc::new(MemoryBucket::new(
            "ENTITY_STATES",
        ))));
        let index = Arc::new(IndexMaintainer::new(
            IndexSettings::default(),
            Arc::new(VocabularyRegistry::new()),
            Arc::new(MemoryBucket::new("PREDICATE_INDEX")),
            Arc::new(MemoryBucket::new("INCOMING_INDEX")),
            Arc::new(MemoryBucket::new("ALIAS_INDEX")),
            Arc::new(MemoryBucket::new("SPATIAL_INDEX")),
            Arc::new(MemoryBucket::new("TEMPORAL_INDEX")),
        ));
        let mut a = EntityPayload::new(id(DRONE1), "robotics.drone");
        a.triples = vec![Triple::new(id(DRONE1), "ops.link.peer_of", json!(DRONE2))];
        let mut b = EntityPayload::new(id(DRONE2), "robotics.drone");
        b.triples = vec![Triple::new(id(DRONE2), "ops.link.peer_of", json!(DRONE1))];
        for payload in [a, b] {
            let outcome = entities.upsert(payload).await.unwrap();
            index
                .apply(outcome.prior.as_ref(), &outcome.current)
                .await
                .unwrap();
        }
        let pathrag = PathRag::new(entities, index);

        let mut req = request(DRONE1);
        req.edge_filter = None;
        req.max_depth = 5;
        let response = pathrag.query(&req).await.unwrap();
        assert_eq!(response.scores.len(), 2);
        assert!(!response.truncated);
    }

    #[tokio::test]
    async fn test_bad_start_id_is_invalid_input() {
        let pathrag = scenario().await;
        let mut req = request(DRONE1);
        req.start = "not-an-id".to_string();
        let err = pathrag.query(&req).await.unwrap_err();
        assert!(matches!(err, QueryError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_missing_start_returns_empty() {
        let pathrag = scenario().await;
        let mut req = request("acme.tele.robo.gcs1.drone.999");
        req.edge_filter = None;
        let response = pathrag.query(&req).await.unwrap();
        // The seed is visited (score 1.0) but has no state and no neighbours.
        assert_eq!(response.entities.len(), 0);
        assert_eq!(response.scores.len(), 1);
        assert!(!response.truncated);
    }
}
