//! The periodic community detection job.
//!
//! Runs label propagation over the full entity population, builds the
//! hierarchy, ranks members with PageRank, extracts TF-IDF keywords and
//! rewrites the `COMMUNITY_INDEX` bucket. Triggered on a fixed interval or
//! early when enough of the population has churned since the last run.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use semstreams_embed::TextExtractor;
use semstreams_model::EntityStatus;
use semstreams_store::EntityStore;

use crate::error::CommunityError;
use crate::graph::CommunityGraph;
use crate::hierarchy::{build_hierarchy, LevelCommunities};
use crate::metrics::CommunityMetrics;
use crate::pagerank::{pagerank, subgraph_adjacency};
use crate::store::{CommunityRecord, CommunityStore};
use crate::summarize::HttpSummarizer;
use crate::tfidf::{community_keywords, TfIdfModel};

/// How many representative entities a record carries.
const REP_ENTITIES: usize = 5;

/// Detector configuration.
#[derive(Debug, Clone)]
pub struct DetectorSettings {
    /// Master switch.
    pub enabled: bool,
    /// Fixed run interval.
    pub interval: Duration,
    /// Run early once this percentage of the population has churned.
    pub churn_trigger_pct: f64,
    /// Hierarchy depth.
    pub max_levels: usize,
    /// Label propagation sweep cap.
    pub max_iterations: usize,
    /// Communities smaller than this are discarded.
    pub min_community_size: usize,
    /// Rank members with PageRank (uniform ranks otherwise).
    pub use_pagerank: bool,
    /// PageRank iteration count.
    pub pagerank_iterations: usize,
    /// PageRank damping factor.
    pub pagerank_damping: f64,
    /// Keywords kept per community summary.
    pub top_keywords: usize,
    /// Optional remote summariser endpoint.
    pub summarizer_endpoint: Option<String>,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(300),
            churn_trigger_pct: 10.0,
            max_levels: 3,
            max_iterations: 10,
            min_community_size: 2,
            use_pagerank: true,
            pagerank_iterations: 20,
            pagerank_damping: 0.85,
            top_keywords: 10,
            summarizer_endpoint: None,
        }
    }
}

/// Summary of one detection run.
#[derive(Debug, Clone, Copy, Default)]
pub struct DetectionStats {
    /// Entities considered.
    pub entities: usize,
    /// Hierarchy levels produced.
    pub levels: usize,
    /// Communities across all levels.
    pub communities: usize,
}

/// The community detector.
pub struct CommunityDetector {
    settings: DetectorSettings,
    entities: Arc<EntityStore>,
    store: CommunityStore,
    extractor: TextExtractor,
    summarizer: Option<HttpSummarizer>,
    metrics: CommunityMetrics,
    churn: AtomicU64,
    last_population: AtomicU64,
}

impl CommunityDetector {
    /// Build the detector.
    ///
    /// # Errors
    ///
    /// Returns [`CommunityError::Summarizer`] when a summariser endpoint is
    /// configured but the client cannot be built.
    pub fn new(
        settings: DetectorSettings,
        entities: Arc<EntityStore>,
        store: CommunityStore,
        extractor: TextExtractor,
        metrics: CommunityMetrics,
    ) -> Result<Self, CommunityError> {
        let summarizer = settings
            .summarizer_endpoint
            .as_deref()
            .map(HttpSummarizer::new)
            .transpose()?;
        Ok(Self {
            settings,
            entities,
            store,
            extractor,
            summarizer,
            metrics,
            churn: AtomicU64::new(0),
            last_population: AtomicU64::new(0),
        })
    }

    /// Record one entity churn event (called per committed upsert).
    pub fn note_churn(&self) {
        self.churn.fetch_add(1, Ordering::Relaxed);
    }

    /// The community store this detector writes.
    #[must_use]
    pub fn store(&self) -> &CommunityStore {
        &self.store
    }

    fn churn_exceeded(&self) -> bool {
        let population = self.last_population.load(Ordering::Relaxed);
        if population == 0 {
            return self.churn.load(Ordering::Relaxed) > 0;
        }
        let churned = self.churn.load(Ordering::Relaxed) as f64;
        churned * 100.0 / population as f64 >= self.settings.churn_trigger_pct
    }

    /// Run one full detection pass.
    ///
    /// # Errors
    ///
    /// Returns [`CommunityError::Cancelled`] when shutdown interrupts the
    /// pass, or a store error.
    pub async fn run_once(&self, cancel: &CancellationToken) -> Result<DetectionStats, CommunityError> {
        let started = Instant::now();
        self.churn.store(0, Ordering::Relaxed);

        let states: Vec<_> = self
            .entities
            .scan_all()
            .await?
            .into_iter()
            .filter(|s| s.node.status != EntityStatus::Deleted)
            .collect();
        self.last_population
            .store(states.len() as u64, Ordering::Relaxed);
        if cancel.is_cancelled() {
            return Err(CommunityError::Cancelled);
        }

        let graph = CommunityGraph::from_states(&states);
        let levels = build_hierarchy(
            &graph,
            self.settings.max_levels,
            self.settings.max_iterations,
            self.settings.min_community_size,
        );

        let texts: HashMap<String, String> = states
            .iter()
            .filter_map(|s| {
                self.extractor
                    .extract(&s.node.properties)
                    .map(|text| (s.id.as_str().to_string(), text))
            })
            .collect();

        self.store.clear().await?;
        let mut stats = DetectionStats {
            entities: states.len(),
            levels: levels.len(),
            communities: 0,
        };

        for level in &levels {
            if cancel.is_cancelled() {
                return Err(CommunityError::Cancelled);
            }
            let records = self.summarise_level(&graph, level, &texts);
            for record in &records {
                self.store.put(record).await?;
                if let Some(summarizer) = &self.summarizer {
                    match summarizer.summarize(record).await {
                        Ok(summary) => {
                            let mut with_prose = record.clone();
                            with_prose.llm_summary = Some(summary);
                            self.store.put(&with_prose).await?;
                        }
                        Err(e) => {
                            warn!(community = record.id, error = %e,
                                  "prose summary failed, keeping statistical summary");
                        }
                    }
                }
            }
            stats.communities += records.len();
            let label = level.level.to_string();
            self.metrics
                .communities
                .with_label_values(&[label.as_str()])
                .set(records.len() as i64);
        }

        self.metrics.runs.inc();
        self.metrics.duration.observe(started.elapsed().as_secs_f64());
        info!(
            entities = stats.entities,
            levels = stats.levels,
            communities = stats.communities,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "community detection complete"
        );
        Ok(stats)
    }

    fn summarise_level(
        &self,
        graph: &CommunityGraph,
        level: &LevelCommunities,
        texts: &HashMap<String, String>,
    ) -> Vec<CommunityRecord> {
        // IDF across all member documents at this level, so keywords
        // discriminate between communities.
        let model = TfIdfModel::fit(
            level
                .communities
                .iter()
                .flat_map(|c| c.members.iter())
                .filter_map(|m| texts.get(m).map(String::as_str)),
        );

        level
            .communities
            .iter()
            .map(|community| {
                let indices: Vec<usize> = community
                    .members
                    .iter()
                    .filter_map(|m| graph.index_of(m))
                    .collect();
                let ranks: BTreeMap<String, f64> = if self.settings.use_pagerank {
                    let sub = subgraph_adjacency(graph.adjacency(), &indices);
                    let scores = pagerank(
                        &sub,
                        self.settings.pagerank_damping,
                        self.settings.pagerank_iterations,
                    );
                    indices
                        .iter()
                        .zip(scores)
                        .map(|(&i, score)| (graph.node(i).to_string(), score))
                        .collect()
                } else {
                    let uniform = 1.0 / community.members.len().max(1) as f64;
                    community
                        .members
                        .iter()
                        .map(|m| (m.clone(), uniform))
                        .collect()
                };

                let documents: Vec<(String, String)> = community
                    .members
                    .iter()
                    .filter_map(|m| texts.get(m).map(|t| (m.clone(), t.clone())))
                    .collect();
                let keywords: Vec<String> =
                    community_keywords(&model, &documents, &ranks, self.settings.top_keywords)
                        .into_iter()
                        .map(|(term, _)| term)
                        .collect();

                let mut by_rank: Vec<(&String, f64)> = ranks
                    .iter()
                    .map(|(id, &score)| (id, score))
                    .collect();
                by_rank.sort_by(|a, b| {
                    b.1.partial_cmp(&a.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.0.cmp(b.0))
                });
                let rep_entities: Vec<String> = by_rank
                    .iter()
                    .take(REP_ENTITIES)
                    .map(|(id, _)| (*id).clone())
                    .collect();

                let statistical_summary = format!(
                    "Community of {} entities at level {}. Representative members: {}. Keywords: {}.",
                    community.members.len(),
                    level.level,
                    rep_entities.join(", "),
                    if keywords.is_empty() {
                        "none".to_string()
                    } else {
                        keywords.join(", ")
                    },
                );

                CommunityRecord {
                    id: community.id.clone(),
                    level: level.level,
                    members: community.members.clone(),
                    keywords,
                    statistical_summary,
                    llm_summary: None,
                    rep_entities,
                    rank: ranks,
                    detected_at: Utc::now(),
                }
            })
            .collect()
    }

    /// Run the detector until cancelled: a fixed-interval schedule with an
    /// early trigger on population churn.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        if !self.settings.enabled {
            return;
        }
        let check = Duration::from_secs(10).min(self.settings.interval);
        let mut ticker = tokio::time::interval(check);
        let mut last_run: Option<Instant> = None;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let due = last_run.is_none_or(|at| at.elapsed() >= self.settings.interval);
                    if !due && !self.churn_exceeded() {
                        continue;
                    }
                    last_run = Some(Instant::now());
                    if let Err(e) = self.run_once(&cancel).await {
                        match e {
                            CommunityError::Cancelled => return,
                            other => warn!(error = %other, "community detection failed"),
                        }
                    }
                }
                () = cancel.cancelled() => return,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use semstreams_model::{EntityId, EntityPayload, Triple};
    use semstreams_store::{MemoryBucket, StoreError};

    use super::*;

    async fn seeded_store() -> Arc<EntityStore> {
        let store = Arc::new(EntityStore::new(Arc::new(MemoryBucket::new(
            "ENTITY_STATES",
        ))));
        // Two drones in a rescue fleet, two rovers in a survey fleet.
        let groups = [
            ("acme.ops.log.hq.fleet.rescue", ["001", "002"], "rescue drone"),
            ("acme.ops.log.hq.fleet.survey", ["101", "102"], "survey rover"),
        ];
        for (fleet, members, text) in groups {
            let fleet_id = EntityId::parse(fleet).unwrap();
            let mut payload = EntityPayload::new(fleet_id.clone(), "ops.fleet");
            payload
                .properties
                .insert("description".to_string(), json!(format!("{text} fleet")));
            store.upsert(payload).await.unwrap();
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
                store.upsert(payload).await.unwrap();
            }
        }
        store
    }

    fn detector(entities: Arc<EntityStore>) -> CommunityDetector {
        CommunityDetector::new(
            DetectorSettings::default(),
            entities,
            CommunityStore::new(Arc::new(MemoryBucket::new("COMMUNITY_INDEX"))),
            TextExtractor::default(),
            CommunityMetrics::new().unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_detection_produces_level_zero_communities() {
        let detector = detector(seeded_store().await);
        let stats = detector.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(stats.entities, 6);
        assert!(stats.communities >= 2);

        let communities = detector.store().communities_at(0).await.unwrap();
        assert_eq!(communities.len(), 2);
        for record in &communities {
            assert_eq!(record.members.len(), 3);
            assert!(!record.rep_entities.is_empty());
            assert!(!record.statistical_summary.is_empty());
            assert!(record.llm_summary.is_none());
        }
    }

    #[tokio::test]
    async fn test_membership_mappings_written() {
        let detector = detector(seeded_store().await);
        detector.run_once(&CancellationToken::new()).await.unwrap();
        let community = detector
            .store()
            .community_of(0, "acme.tele.robo.gcs1.unit.001")
            .await
            .unwrap();
        assert!(community.is_some());
        let record = detector
            .store()
            .get(0, &community.unwrap())
            .await
            .unwrap()
            .unwrap();
        assert!(record
            .members
            .contains(&"acme.tele.robo.gcs1.unit.001".to_string()));
    }

    #[tokio::test]
    async fn test_keywords_discriminate_communities() {
        let detector = detector(seeded_store().await);
        detector.run_once(&CancellationToken::new()).await.unwrap();
        let communities = detector.store().communities_at(0).await.unwrap();
        let rescue = communities
            .iter()
            .find(|c| c.members.iter().any(|m| m.ends_with("fleet.rescue")))
            .unwrap();
        assert!(rescue.keywords.iter().any(|k| k == "rescue"));
    }

    #[tokio::test]
    async fn test_rerun_replaces_previous_results() {
        let detector = detector(seeded_store().await);
        let cancel = CancellationToken::new();
        detector.run_once(&cancel).await.unwrap();
        let first = detector.store().communities_at(0).await.unwrap();
        detector.run_once(&cancel).await.unwrap();
        let second = detector.store().communities_at(0).await.unwrap();
        assert_eq!(first.len(), second.len());
    }

    #[tokio::test]
    async fn test_cancellation_aborts_run() {
        let detector = detector(seeded_store().await);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = detector.run_once(&cancel).await.unwrap_err();
        assert!(matches!(err, CommunityError::Cancelled));
    }

    #[tokio::test]
    async fn test_churn_trigger() {
        let detector = detector(seeded_store().await);
        detector.run_once(&CancellationToken::new()).await.unwrap();
        assert!(!detector.churn_exceeded());
        // 10% of 6 entities is < 1, so a single churn event trips it.
        detector.note_churn();
        assert!(detector.churn_exceeded());
    }

    #[tokio::test]
    async fn test_empty_population() -> Result<(), StoreError> {
        let entities = Arc::new(EntityStore::new(Arc::new(MemoryBucket::new(
            "ENTITY_STATES",
        ))));
        let detector = detector(entities);
        let stats = detector.run_once(&CancellationToken::new()).await.unwrap();
        assert_eq!(stats.entities, 0);
        assert_eq!(stats.communities, 0);
        Ok(())
    }
}
