//! Provider selection, fallback and the generation flow.
//!
//! Flow per entity: extract text → content hash → L2 lookup → hit? store in
//! L1 : generate via the active provider → store in L1 and L2. The tier is
//! called from an asynchronous post-commit hook; nothing here can block or
//! fail an entity write.

use std::sync::Arc;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use semstreams_model::EntityState;
use semstreams_store::kv::KeyValue;

use crate::bm25::Bm25Embedder;
use crate::cache::{content_hash, L1Cache, L2Cache};
use crate::error::EmbedError;
use crate::http::HttpEmbedder;
use crate::metrics::EmbedMetrics;
use crate::text::{TextExtractor, TypeFilter};

/// Which provider produces vectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// No vectors; similarity queries return empty.
    Disabled,
    /// The in-process BM25 baseline.
    #[default]
    Bm25,
    /// A remote neural service, with BM25 fallback.
    Http,
}

impl ProviderKind {
    /// Stable lowercase name for logs and health reports.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderKind::Disabled => "disabled",
            ProviderKind::Bm25 => "bm25",
            ProviderKind::Http => "http",
        }
    }
}

/// Embedder tier configuration.
#[derive(Debug, Clone)]
pub struct EmbedderSettings {
    /// Master switch; `false` behaves like `provider = disabled`.
    pub enabled: bool,
    /// Configured provider.
    pub provider: ProviderKind,
    /// HTTP provider endpoint.
    pub http_endpoint: Option<String>,
    /// HTTP provider model name.
    pub http_model: Option<String>,
    /// Ordered property names mined for text.
    pub text_fields: Vec<String>,
    /// L1 retention window.
    pub retention_window: Duration,
    /// Type patterns allowed to embed (empty = all).
    pub enabled_types: Vec<String>,
    /// Type patterns never embedded; wins over `enabled_types`.
    pub skip_types: Vec<String>,
}

impl Default for EmbedderSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            provider: ProviderKind::Bm25,
            http_endpoint: None,
            http_model: None,
            text_fields: Vec::new(),
            retention_window: Duration::from_secs(24 * 60 * 60),
            enabled_types: Vec::new(),
            skip_types: Vec::new(),
        }
    }
}

/// The embedder tier.
pub struct EmbedderTier {
    settings: EmbedderSettings,
    extractor: TextExtractor,
    filter: TypeFilter,
    bm25: Bm25Embedder,
    http: Option<HttpEmbedder>,
    active: RwLock<ProviderKind>,
    l1: L1Cache,
    l2: Option<L2Cache>,
    metrics: EmbedMetrics,
}

impl EmbedderTier {
    /// Build the tier. The L2 bucket is optional; without it, only the L1
    /// cache is used.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError::Provider`] when the HTTP provider is configured
    /// without an endpoint or its client cannot be built.
    pub fn new(
        settings: EmbedderSettings,
        l2_bucket: Option<Arc<dyn KeyValue>>,
        metrics: EmbedMetrics,
    ) -> Result<Self, EmbedError> {
        let provider = if settings.enabled {
            settings.provider
        } else {
            ProviderKind::Disabled
        };
        let http = match provider {
            ProviderKind::Http => {
                let endpoint = settings.http_endpoint.clone().ok_or_else(|| {
                    EmbedError::Provider("http provider configured without endpoint".to_string())
                })?;
                let model = settings
                    .http_model
                    .clone()
                    .unwrap_or_else(|| "default".to_string());
                Some(HttpEmbedder::new(endpoint, model)?)
            }
            _ => None,
        };
        Ok(Self {
            extractor: TextExtractor::new(settings.text_fields.clone()),
            filter: TypeFilter::new(&settings.enabled_types, &settings.skip_types),
            bm25: Bm25Embedder::new(),
            http,
            active: RwLock::new(provider),
            l1: L1Cache::new(settings.retention_window),
            l2: l2_bucket.map(L2Cache::new),
            metrics,
            settings,
        })
    }

    /// The provider currently producing vectors.
    #[must_use]
    pub fn active(&self) -> ProviderKind {
        self.active.read().map(|p| *p).unwrap_or(ProviderKind::Disabled)
    }

    /// The tier's configuration.
    #[must_use]
    pub fn settings(&self) -> &EmbedderSettings {
        &self.settings
    }

    /// The L1 cache.
    #[must_use]
    pub fn l1(&self) -> &L1Cache {
        &self.l1
    }

    /// The tier's metric set.
    #[must_use]
    pub fn metrics(&self) -> &EmbedMetrics {
        &self.metrics
    }

    /// Startup connectivity probe. A failed probe degrades to BM25,
    /// increments the fallback counter and is never fatal.
    pub async fn probe(&self) {
        if self.active() != ProviderKind::Http {
            return;
        }
        let Some(http) = &self.http else {
            return;
        };
        match http.probe().await {
            Ok(()) => info!("http embedding provider reachable"),
            Err(e) => {
                warn!(error = %e, "http embedding provider unreachable, degrading to bm25");
                self.metrics.fallbacks.inc();
                if let Ok(mut active) = self.active.write() {
                    *active = ProviderKind::Bm25;
                }
            }
        }
    }

    fn degrade(&self, err: &EmbedError) {
        warn!(error = %err, "http embedding failed, falling back to bm25");
        self.metrics.fallbacks.inc();
    }

    async fn generate(&self, text: &str, admit: bool) -> Result<Option<Vec<f32>>, EmbedError> {
        match self.active() {
            ProviderKind::Disabled => Err(EmbedError::Disabled),
            ProviderKind::Bm25 => {
                if admit {
                    self.bm25.observe(text);
                }
                Ok(self.bm25.generate(text))
            }
            ProviderKind::Http => {
                let http = self
                    .http
                    .as_ref()
                    .ok_or_else(|| EmbedError::Provider("http provider missing".to_string()))?;
                match http.embed(text).await {
                    Ok(vector) => Ok(Some(vector)),
                    Err(e) => {
                        // Per-request fallback keeps ingest flowing while the
                        // remote service is down.
                        self.degrade(&e);
                        if admit {
                            self.bm25.observe(text);
                        }
                        Ok(self.bm25.generate(text))
                    }
                }
            }
        }
    }

    /// Embed one committed entity. Returns `true` when a vector was stored.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError::Disabled`] when no provider is active, or a
    /// cache backend error.
    pub async fn embed_entity(&self, state: &EntityState) -> Result<bool, EmbedError> {
        if self.active() == ProviderKind::Disabled {
            return Err(EmbedError::Disabled);
        }
        if !self.filter.allows(&state.node.entity_type) {
            self.metrics.skipped.inc();
            return Ok(false);
        }
        let Some(text) = self.extractor.extract(&state.node.properties) else {
            self.metrics.skipped.inc();
            return Ok(false);
        };
        let hash = content_hash(&text);

        let id = state.id.as_str();
        if let Some(cached) = self.l1.entry(id) {
            if cached.text_hash == hash {
                return Ok(true);
            }
        }

        if let Some(l2) = &self.l2 {
            if let Some(vector) = l2.get(&hash).await? {
                self.metrics.cache_hits.inc();
                self.l1.insert(
                    id,
                    &state.node.entity_type,
                    &hash,
                    state.updated_at,
                    Arc::new(vector),
                );
                self.metrics.l1_active.set(self.l1.active_count() as i64);
                return Ok(true);
            }
        }
        self.metrics.cache_misses.inc();

        let started = Instant::now();
        let Some(vector) = self.generate(&text, true).await? else {
            self.metrics.skipped.inc();
            return Ok(false);
        };
        self.metrics.latency.observe(started.elapsed().as_secs_f64());
        self.metrics.generated.inc();

        if let Some(l2) = &self.l2 {
            l2.put(&hash, &vector).await?;
        }
        self.l1.insert(
            id,
            &state.node.entity_type,
            &hash,
            state.updated_at,
            Arc::new(vector),
        );
        self.metrics.l1_active.set(self.l1.active_count() as i64);
        debug!(entity_id = id, "embedding stored");
        Ok(true)
    }

    /// Embed ad-hoc query text. Does not touch the corpus statistics or the
    /// caches.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError::Disabled`] when no provider is active.
    pub async fn query_vector(&self, text: &str) -> Result<Option<Vec<f32>>, EmbedError> {
        self.generate(text, false).await
    }

    /// Fetch the vector for an entity: L1 first, then L2 by content hash,
    /// regenerating as a last resort.
    ///
    /// # Errors
    ///
    /// Returns [`EmbedError::Disabled`] when no provider is active, or a
    /// cache backend error.
    pub async fn entity_vector(
        &self,
        state: &EntityState,
    ) -> Result<Option<Arc<Vec<f32>>>, EmbedError> {
        let id = state.id.as_str();
        if let Some(vector) = self.l1.get(id) {
            return Ok(Some(vector));
        }
        if !self.filter.allows(&state.node.entity_type) {
            return Ok(None);
        }
        let Some(text) = self.extractor.extract(&state.node.properties) else {
            return Ok(None);
        };
        let hash = content_hash(&text);
        if let Some(l2) = &self.l2 {
            if let Some(vector) = l2.get(&hash).await? {
                let vector = Arc::new(vector);
                self.l1.insert(
                    id,
                    &state.node.entity_type,
                    &hash,
                    state.updated_at,
                    vector.clone(),
                );
                return Ok(Some(vector));
            }
        }
        match self.generate(&text, false).await? {
            Some(vector) => {
                let vector = Arc::new(vector);
                self.l1.insert(
                    id,
                    &state.node.entity_type,
                    &hash,
                    state.updated_at,
                    vector.clone(),
                );
                Ok(Some(vector))
            }
            None => Ok(None),
        }
    }

    /// Drop cached state for a deleted entity.
    pub fn forget(&self, entity_id: &str) {
        self.l1.remove(entity_id);
        self.metrics.l1_active.set(self.l1.active_count() as i64);
    }

    /// Run the periodic L1 TTL sweeper until cancelled.
    pub async fn run_sweeper(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let evicted = self.l1.sweep();
                    self.metrics.l1_active.set(self.l1.active_count() as i64);
                    if evicted > 0 {
                        debug!(evicted, "l1 cache sweep");
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

    use semstreams_model::{EntityId, EntityState};
    use semstreams_store::MemoryBucket;

    use super::*;

    fn state(id: &str, entity_type: &str, description: &str) -> EntityState {
        let mut state = EntityState::empty(EntityId::parse(id).unwrap());
        state.node.entity_type = entity_type.to_string();
        if !description.is_empty() {
            state
                .node
                .properties
                .insert("description".to_string(), json!(description));
        }
        state.version = 1;
        state
    }

    fn bm25_tier(settings: EmbedderSettings) -> EmbedderTier {
        EmbedderTier::new(
            settings,
            Some(Arc::new(MemoryBucket::new("EMBEDDINGS_CACHE"))),
            EmbedMetrics::new().unwrap(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_embed_entity_stores_vector() {
        let tier = bm25_tier(EmbedderSettings::default());
        let state = state(
            "acme.tele.robo.gcs1.drone.001",
            "robotics.drone",
            "search and rescue drone",
        );
        assert!(tier.embed_entity(&state).await.unwrap());
        assert!(tier.l1().get("acme.tele.robo.gcs1.drone.001").is_some());
        assert_eq!(tier.metrics().generated.get(), 1);
    }

    #[tokio::test]
    async fn test_skip_types_bound_l1_memory() {
        let tier = bm25_tier(EmbedderSettings {
            skip_types: vec!["telemetry.*.*".to_string()],
            ..EmbedderSettings::default()
        });
        let skipped = state(
            "acme.tele.robo.gcs1.drone.001",
            "telemetry.drone.position",
            "position sample",
        );
        let kept = state(
            "acme.tele.robo.gcs1.alert.001",
            "alerts.battery.critical",
            "battery critically low",
        );
        assert!(!tier.embed_entity(&skipped).await.unwrap());
        assert!(tier.embed_entity(&kept).await.unwrap());
        assert_eq!(tier.l1().active_count(), 1);
        assert_eq!(tier.metrics().skipped.get(), 1);
    }

    #[tokio::test]
    async fn test_empty_text_not_embedded() {
        let tier = bm25_tier(EmbedderSettings::default());
        let state = state("acme.tele.robo.gcs1.drone.002", "robotics.drone", "");
        assert!(!tier.embed_entity(&state).await.unwrap());
        assert_eq!(tier.l1().active_count(), 0);
    }

    #[tokio::test]
    async fn test_l2_hit_equals_regeneration() {
        let tier = bm25_tier(EmbedderSettings::default());
        let a = state(
            "acme.tele.robo.gcs1.drone.001",
            "robotics.drone",
            "identical words",
        );
        let b = state(
            "acme.tele.robo.gcs1.drone.002",
            "robotics.drone",
            "identical words",
        );
        tier.embed_entity(&a).await.unwrap();
        tier.embed_entity(&b).await.unwrap();
        // Second entity with identical text is served from L2.
        assert_eq!(tier.metrics().cache_hits.get(), 1);
        assert_eq!(tier.metrics().generated.get(), 1);
        let va = tier.l1().get("acme.tele.robo.gcs1.drone.001").unwrap();
        let vb = tier.l1().get("acme.tele.robo.gcs1.drone.002").unwrap();
        assert_eq!(*va, *vb);
    }

    #[tokio::test]
    async fn test_disabled_provider_rejects_queries() {
        let tier = EmbedderTier::new(
            EmbedderSettings {
                enabled: false,
                ..EmbedderSettings::default()
            },
            None,
            EmbedMetrics::new().unwrap(),
        )
        .unwrap();
        assert_eq!(tier.active(), ProviderKind::Disabled);
        assert!(matches!(
            tier.query_vector("anything").await,
            Err(EmbedError::Disabled)
        ));
    }

    #[tokio::test]
    async fn test_http_probe_failure_degrades_to_bm25() {
        let tier = EmbedderTier::new(
            EmbedderSettings {
                provider: ProviderKind::Http,
                http_endpoint: Some("http://127.0.0.1:1/embeddings".to_string()),
                http_model: Some("test-model".to_string()),
                ..EmbedderSettings::default()
            },
            None,
            EmbedMetrics::new().unwrap(),
        )
        .unwrap();
        assert_eq!(tier.active(), ProviderKind::Http);
        tier.probe().await;
        assert_eq!(tier.active(), ProviderKind::Bm25);
        assert_eq!(tier.metrics().fallbacks.get(), 1);

        // Embedding still works on the baseline.
        let vector = tier.query_vector("rescue drone").await.unwrap();
        assert!(vector.is_some());
    }

    #[tokio::test]
    async fn test_entity_vector_regenerates_after_l1_loss() {
        let tier = bm25_tier(EmbedderSettings::default());
        let s = state(
            "acme.tele.robo.gcs1.drone.001",
            "robotics.drone",
            "search and rescue drone",
        );
        tier.embed_entity(&s).await.unwrap();
        let original = tier.l1().get("acme.tele.robo.gcs1.drone.001").unwrap();

        tier.forget("acme.tele.robo.gcs1.drone.001");
        let recovered = tier.entity_vector(&s).await.unwrap().unwrap();
        // Recovered from L2 by content hash, bit-identical.
        assert_eq!(*original, *recovered);
    }
}
