//! Component wiring and the query/admin surface.
//!
//! [`Core`] owns every subsystem handle and implements the request/reply
//! operations. The NATS loop in [`crate::api`] is a thin shell over these
//! methods, which keeps the whole surface exercisable without a bus.

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context as _;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use semstreams_community::{
    CommunityDetector, CommunityStore, DetectorSettings,
};
use semstreams_embed::{EmbedderTier, ProviderKind, TextExtractor};
use semstreams_model::{
    Classified, EntityId, ErrorClass, ErrorRecord, VocabularyRegistry,
};
use semstreams_net::api::{
    CommunityGetRequest, EntityDeleteRequest, EntityDeleteResponse, EntityGetRequest,
    EntityGetResponse, EntityQueryRequest, EntityQueryResponse, GlobalQueryRequest, HealthResponse,
    LocalQueryRequest, PathQueryRequest, PathQueryResponse, PredicateQueryRequest,
    PredicateQueryResponse, RebuildResponse, Reply, SemanticQueryRequest, SemanticQueryResponse,
    StatsResponse,
};
use semstreams_query::{GraphRag, GraphRagSettings, PathRag, QueryCache};
use semstreams_rules::condition;
use semstreams_rules::config::ConditionSpec;
use semstreams_store::kv::KeyValue;
use semstreams_store::{buckets, EntityStore, IndexMaintainer, JetStreamBucket, MemoryBucket, StoreError};

use crate::config::AppConfig;
use crate::metrics::AppMetrics;

/// The durable buckets the core runs on.
pub struct CoreBuckets {
    /// `ENTITY_STATES`.
    pub entities: Arc<dyn KeyValue>,
    /// `PREDICATE_INDEX`.
    pub predicate: Arc<dyn KeyValue>,
    /// `INCOMING_INDEX`.
    pub incoming: Arc<dyn KeyValue>,
    /// `ALIAS_INDEX`.
    pub alias: Arc<dyn KeyValue>,
    /// `SPATIAL_INDEX`.
    pub spatial: Arc<dyn KeyValue>,
    /// `TEMPORAL_INDEX`.
    pub temporal: Arc<dyn KeyValue>,
    /// `COMMUNITY_INDEX`.
    pub community: Arc<dyn KeyValue>,
    /// `EMBEDDINGS_CACHE`.
    pub embeddings: Arc<dyn KeyValue>,
}

impl CoreBuckets {
    /// In-memory buckets for tests and embedded runs.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            entities: Arc::new(MemoryBucket::new(buckets::ENTITY_STATES)),
            predicate: Arc::new(MemoryBucket::new(buckets::PREDICATE_INDEX)),
            incoming: Arc::new(MemoryBucket::new(buckets::INCOMING_INDEX)),
            alias: Arc::new(MemoryBucket::new(buckets::ALIAS_INDEX)),
            spatial: Arc::new(MemoryBucket::new(buckets::SPATIAL_INDEX)),
            temporal: Arc::new(MemoryBucket::new(buckets::TEMPORAL_INDEX)),
            community: Arc::new(MemoryBucket::new(buckets::COMMUNITY_INDEX)),
            embeddings: Arc::new(MemoryBucket::new(buckets::EMBEDDINGS_CACHE)),
        }
    }

    /// Open (creating as needed) every JetStream bucket.
    ///
    /// # Errors
    ///
    /// Returns the first bucket that could not be opened.
    pub async fn open_jetstream(
        jetstream: &async_nats::jetstream::Context,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            entities: Arc::new(JetStreamBucket::open(jetstream, buckets::ENTITY_STATES).await?),
            predicate: Arc::new(JetStreamBucket::open(jetstream, buckets::PREDICATE_INDEX).await?),
            incoming: Arc::new(JetStreamBucket::open(jetstream, buckets::INCOMING_INDEX).await?),
            alias: Arc::new(JetStreamBucket::open(jetstream, buckets::ALIAS_INDEX).await?),
            spatial: Arc::new(JetStreamBucket::open(jetstream, buckets::SPATIAL_INDEX).await?),
            temporal: Arc::new(JetStreamBucket::open(jetstream, buckets::TEMPORAL_INDEX).await?),
            community: Arc::new(JetStreamBucket::open(jetstream, buckets::COMMUNITY_INDEX).await?),
            embeddings: Arc::new(
                JetStreamBucket::open(jetstream, buckets::EMBEDDINGS_CACHE).await?,
            ),
        })
    }
}

/// All wired subsystems plus the query surface.
pub struct Core {
    /// Predicate metadata registry.
    pub vocabulary: Arc<VocabularyRegistry>,
    /// Authoritative entity store.
    pub entities: Arc<EntityStore>,
    /// Secondary index maintainer.
    pub index: Arc<IndexMaintainer>,
    /// Embedding tier.
    pub embedder: Arc<EmbedderTier>,
    /// Community record reader.
    pub communities: Arc<CommunityStore>,
    /// Community detector (owns the community bucket).
    pub detector: Arc<CommunityDetector>,
    /// Bounded traversal evaluator.
    pub pathrag: PathRag,
    /// Community semantic evaluator.
    pub graphrag: GraphRag,
    /// Reply cache for path/semantic queries.
    pub cache: QueryCache,
    /// Process metrics.
    pub metrics: Arc<AppMetrics>,
    configured_provider: ProviderKind,
    started: Instant,
}

impl Core {
    /// Wire every subsystem from configuration and buckets.
    ///
    /// # Errors
    ///
    /// Returns the first wiring failure (vocabulary conflicts, embedder
    /// construction, summariser construction).
    pub fn build(
        config: &AppConfig,
        store_buckets: CoreBuckets,
        metrics: Arc<AppMetrics>,
    ) -> anyhow::Result<Arc<Self>> {
        let vocabulary = Arc::new(VocabularyRegistry::new());
        config
            .register_vocabulary(&vocabulary)
            .context("registering vocabulary")?;

        let entities = Arc::new(EntityStore::new(store_buckets.entities));
        let index = Arc::new(IndexMaintainer::new(
            config.index_settings(),
            vocabulary.clone(),
            store_buckets.predicate,
            store_buckets.incoming,
            store_buckets.alias,
            store_buckets.spatial,
            store_buckets.temporal,
        ));

        let embedder_settings = config.embedder_settings();
        let l2_bucket = config
            .embedder
            .cache_bucket
            .as_ref()
            .filter(|name| !name.is_empty())
            .map(|_| store_buckets.embeddings.clone());
        let embedder = Arc::new(
            EmbedderTier::new(embedder_settings, l2_bucket, metrics.embed.clone())
                .context("building embedder tier")?,
        );

        let communities = Arc::new(CommunityStore::new(store_buckets.community.clone()));
        let detector_settings: DetectorSettings = config.detector_settings();
        let detector = Arc::new(
            CommunityDetector::new(
                detector_settings,
                entities.clone(),
                CommunityStore::new(store_buckets.community),
                TextExtractor::new(config.embedder.text_fields.clone()),
                metrics.community.clone(),
            )
            .context("building community detector")?,
        );

        let pathrag = PathRag::new(entities.clone(), index.clone());
        let graphrag = GraphRag::new(
            entities.clone(),
            embedder.clone(),
            communities.clone(),
            GraphRagSettings::default(),
        );

        Ok(Arc::new(Self {
            vocabulary,
            entities,
            index,
            embedder,
            communities,
            detector,
            pathrag,
            graphrag,
            cache: QueryCache::new(config.cache_settings()),
            metrics,
            configured_provider: config.embedder.provider,
            started: Instant::now(),
        }))
    }

    fn track<T>(&self, kind: &str, started: Instant, reply: &Reply<T>) {
        self.metrics.query.queries.with_label_values(&[kind]).inc();
        self.metrics
            .query
            .seconds
            .with_label_values(&[kind])
            .observe(started.elapsed().as_secs_f64());
        if reply.error.is_some() {
            self.metrics.query.failures.with_label_values(&[kind]).inc();
        }
    }

    fn cached<R: DeserializeOwned>(&self, key: u64) -> Option<Reply<R>> {
        let bytes = self.cache.get(key)?;
        match serde_json::from_slice(&bytes) {
            Ok(reply) => {
                self.metrics.query.cache_hits.inc();
                Some(reply)
            }
            Err(_) => None,
        }
    }

    fn store_reply<R: Serialize>(&self, key: u64, reply: &Reply<R>) {
        if let Ok(bytes) = serde_json::to_vec(reply) {
            self.cache.put(key, bytes);
        }
    }

    // ── Entity operations ───────────────────────────────────────────────────

    /// `graph.entity.get`.
    pub async fn entity_get(&self, request: EntityGetRequest) -> Reply<EntityGetResponse> {
        let started = Instant::now();
        let reply = self.entity_get_inner(request).await;
        self.track("entity.get", started, &reply);
        reply
    }

    async fn entity_get_inner(&self, request: EntityGetRequest) -> Reply<EntityGetResponse> {
        let id = match (&request.id, &request.alias) {
            (Some(id), _) => match EntityId::parse(id) {
                Ok(id) => id,
                Err(e) => return Reply::error(&e),
            },
            (None, Some(alias)) => match self.index.resolve_alias(alias).await {
                Ok(Some(id)) => match EntityId::parse(&id) {
                    Ok(id) => id,
                    Err(e) => return Reply::error(&e),
                },
                Ok(None) => {
                    return Reply::ok(EntityGetResponse { entity: None });
                }
                Err(e) => return Reply::error(&e),
            },
            (None, None) => {
                return Reply::error_record(ErrorRecord::new(
                    ErrorClass::InvalidInput,
                    "request must carry id or alias",
                ));
            }
        };
        match self.entities.get(&id).await {
            Ok(entity) => Reply::ok(EntityGetResponse { entity }),
            Err(e) => Reply::error(&e),
        }
    }

    /// `graph.entity.query`.
    pub async fn entity_query(&self, request: EntityQueryRequest) -> Reply<EntityQueryResponse> {
        let started = Instant::now();
        let reply = self.entity_query_inner(request).await;
        self.track("entity.query", started, &reply);
        reply
    }

    async fn entity_query_inner(&self, request: EntityQueryRequest) -> Reply<EntityQueryResponse> {
        let scanned = match self
            .entities
            .scan_by_type(request.entity_type.as_deref(), usize::MAX)
            .await
        {
            Ok(scanned) => scanned,
            Err(e) => return Reply::error(&e),
        };
        let mut entities = Vec::new();
        for state in scanned {
            if entities.len() >= request.limit {
                break;
            }
            let properties = serde_json::Value::Object(state.node.properties.clone());
            let mut keep = true;
            for filter in &request.filters {
                let spec = ConditionSpec {
                    field: filter.field.clone(),
                    op: filter.op,
                    value: filter.value.clone(),
                };
                match condition::evaluate(&properties, &spec) {
                    Ok(verdict) => {
                        if !verdict {
                            keep = false;
                            break;
                        }
                    }
                    Err(e) => return Reply::error(&e),
                }
            }
            if keep {
                entities.push(state);
            }
        }
        self.metrics
            .query
            .result_size
            .with_label_values(&["entity.query"])
            .observe(entities.len() as f64);
        Reply::ok(EntityQueryResponse { entities })
    }

    /// `graph.entity.delete` — administrative.
    pub async fn entity_delete(&self, request: EntityDeleteRequest) -> Reply<EntityDeleteResponse> {
        let started = Instant::now();
        let reply = self.entity_delete_inner(request).await;
        self.track("entity.delete", started, &reply);
        reply
    }

    async fn entity_delete_inner(
        &self,
        request: EntityDeleteRequest,
    ) -> Reply<EntityDeleteResponse> {
        let id = match EntityId::parse(&request.id) {
            Ok(id) => id,
            Err(e) => return Reply::error(&e),
        };
        let prior = match self.entities.delete(&id).await {
            Ok(prior) => prior,
            Err(e) => return Reply::error(&e),
        };
        let Some(prior) = prior else {
            return Reply::ok(EntityDeleteResponse { deleted: false });
        };
        self.metrics.worker.entity_count.dec();
        if let Err(e) = self.index.remove(&prior).await {
            // The entity is gone; a rebuild clears any stragglers.
            warn!(entity_id = %id, error = %e, "index cleanup failed after delete");
            self.metrics.worker.index_failures.inc();
        }
        self.embedder.forget(id.as_str());
        Reply::ok(EntityDeleteResponse { deleted: true })
    }

    /// `graph.predicate.query`.
    pub async fn predicate_query(
        &self,
        request: PredicateQueryRequest,
    ) -> Reply<PredicateQueryResponse> {
        let started = Instant::now();
        let reply = self.predicate_query_inner(request).await;
        self.track("predicate.query", started, &reply);
        reply
    }

    async fn predicate_query_inner(
        &self,
        request: PredicateQueryRequest,
    ) -> Reply<PredicateQueryResponse> {
        if !VocabularyRegistry::valid_predicate(&request.predicate) {
            return Reply::error_record(ErrorRecord::new(
                ErrorClass::InvalidInput,
                format!("invalid predicate shape: {:?}", request.predicate),
            ));
        }
        match self
            .index
            .predicate_lookup(&request.predicate, &request.object)
            .await
        {
            Ok(entities) => {
                self.metrics
                    .query
                    .result_size
                    .with_label_values(&["predicate.query"])
                    .observe(entities.len() as f64);
                Reply::ok(PredicateQueryResponse { entities })
            }
            Err(e) => Reply::error(&e),
        }
    }

    // ── Graph queries ───────────────────────────────────────────────────────

    /// `graph.query.path` (cached).
    pub async fn path_query(&self, request: PathQueryRequest) -> Reply<PathQueryResponse> {
        let started = Instant::now();
        let key = QueryCache::key_for("path", &request);
        if let Some(reply) = self.cached(key) {
            self.track("path", started, &reply);
            return reply;
        }
        let reply = match self.pathrag.query(&request).await {
            Ok(response) => {
                self.metrics
                    .query
                    .result_size
                    .with_label_values(&["path"])
                    .observe(response.entities.len() as f64);
                Reply::ok(response)
            }
            Err(e) => Reply::error(&e),
        };
        if reply.ok.is_some() {
            self.store_reply(key, &reply);
        }
        self.track("path", started, &reply);
        reply
    }

    /// `graph.query.semantic` (cached).
    pub async fn semantic_query(
        &self,
        request: SemanticQueryRequest,
    ) -> Reply<SemanticQueryResponse> {
        let started = Instant::now();
        let key = QueryCache::key_for("semantic", &request);
        if let Some(reply) = self.cached(key) {
            self.track("semantic", started, &reply);
            return reply;
        }
        let reply = match self.graphrag.semantic(&request).await {
            Ok(response) => Reply::ok(response),
            Err(e) => Reply::error(&e),
        };
        if reply.ok.is_some() {
            self.store_reply(key, &reply);
        }
        self.track("semantic", started, &reply);
        reply
    }

    /// `graph.query.local`.
    pub async fn local_query(&self, request: LocalQueryRequest) -> Reply<SemanticQueryResponse> {
        let started = Instant::now();
        let reply = match self.graphrag.local(&request).await {
            Ok(response) => Reply::ok(response),
            Err(e) => Reply::error(&e),
        };
        self.track("local", started, &reply);
        reply
    }

    /// `graph.query.global`.
    pub async fn global_query(&self, request: GlobalQueryRequest) -> Reply<SemanticQueryResponse> {
        let started = Instant::now();
        let reply = match self.graphrag.global(&request).await {
            Ok(response) => Reply::ok(response),
            Err(e) => Reply::error(&e),
        };
        self.track("global", started, &reply);
        reply
    }

    // ── Community & admin ───────────────────────────────────────────────────

    /// `graph.community.get`.
    pub async fn community_get(&self, request: CommunityGetRequest) -> Reply<serde_json::Value> {
        let started = Instant::now();
        let reply = self.community_get_inner(request).await;
        self.track("community.get", started, &reply);
        reply
    }

    async fn community_get_inner(&self, request: CommunityGetRequest) -> Reply<serde_json::Value> {
        let community_id = match (&request.id, &request.entity) {
            (Some(id), _) => Some(id.clone()),
            (None, Some(entity)) => {
                match self.communities.community_of(request.level, entity).await {
                    Ok(found) => found,
                    Err(e) => return Reply::error(&e),
                }
            }
            (None, None) => {
                return Reply::error_record(ErrorRecord::new(
                    ErrorClass::InvalidInput,
                    "request must carry id or entity",
                ));
            }
        };
        let Some(community_id) = community_id else {
            return Reply::ok(serde_json::Value::Null);
        };
        match self.communities.get(request.level, &community_id).await {
            Ok(Some(record)) => match serde_json::to_value(&record) {
                Ok(value) => Reply::ok(value),
                Err(e) => Reply::error_record(ErrorRecord::new(ErrorClass::Fatal, e.to_string())),
            },
            Ok(None) => Reply::ok(serde_json::Value::Null),
            Err(e) => Reply::error(&e),
        }
    }

    /// `graph.index.rebuild` — drop and rebuild every derived bucket.
    pub async fn index_rebuild(&self) -> Reply<RebuildResponse> {
        let started = Instant::now();
        let reply = match self.index.rebuild(&self.entities).await {
            Ok((entities_scanned, entries_written)) => Reply::ok(RebuildResponse {
                entities_scanned,
                entries_written,
            }),
            Err(e) => Reply::error(&e),
        };
        self.track("index.rebuild", started, &reply);
        reply
    }

    /// `graph.stats`.
    pub async fn stats(&self) -> Reply<StatsResponse> {
        let started = Instant::now();
        let reply = self.stats_inner().await;
        self.track("stats", started, &reply);
        reply
    }

    async fn stats_inner(&self) -> Reply<StatsResponse> {
        let entities = match self.entities.count().await {
            Ok(count) => count,
            Err(e) => return Reply::error(&e),
        };
        let communities = match self.communities.counts_per_level().await {
            Ok(counts) => counts,
            Err(e) => return Reply::error(&e),
        };
        self.metrics.worker.entity_count.set(entities as i64);
        Reply::ok(StatsResponse {
            entities,
            communities,
            l1_vectors: self.embedder.l1().active_count(),
            messages_processed: self.metrics.worker.processed.get(),
        })
    }

    /// `graph.health`.
    #[must_use]
    pub fn health(&self) -> HealthResponse {
        let active = self.embedder.active();
        let status = if active == self.configured_provider {
            "ok"
        } else {
            "degraded"
        };
        HealthResponse {
            status: status.to_string(),
            embedder: active.as_str().to_string(),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }
}
