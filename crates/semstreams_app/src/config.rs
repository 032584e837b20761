//! Daemon configuration.
//!
//! TOML file loaded at startup via `--config <path>`. Every section has
//! workable defaults; validation failures abort startup with a non-zero
//! exit.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use semstreams_community::detector::DetectorSettings;
use semstreams_embed::{EmbedderSettings, ProviderKind};
use semstreams_model::{AliasType, PredicateMeta, VocabularyRegistry};
use semstreams_query::QueryCacheSettings;
use semstreams_rules::config::humantime_duration;
use semstreams_rules::RuleConfig;
use semstreams_store::index::IndexSettings;

/// Configuration load/validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config {path}: {source}")]
    Io {
        /// The path given.
        path: String,
        /// The I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("cannot parse config {path}: {source}")]
    Parse {
        /// The path given.
        path: String,
        /// The TOML failure.
        #[source]
        source: toml::de::Error,
    },
    /// A semantic validation failed.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Bus connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsSettings {
    /// NATS server URL.
    pub url: String,
}

impl Default for NatsSettings {
    fn default() -> Self {
        Self {
            url: semstreams_net::connection::DEFAULT_NATS_URL.to_string(),
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    /// Worker count; 0 means `CPU count - 1` (minimum 1).
    pub workers: usize,
    /// Total bounded queue capacity across workers.
    pub queue_size: usize,
    /// Per-message processing deadline.
    #[serde(with = "humantime_duration")]
    pub processing_timeout: Duration,
    /// Retry cap for transient failures.
    pub max_retries: usize,
    /// Queue drain deadline during shutdown.
    #[serde(with = "humantime_duration")]
    pub drain_timeout: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            workers: 0,
            queue_size: 5_000,
            processing_timeout: Duration::from_secs(30),
            max_retries: 5,
            drain_timeout: Duration::from_secs(30),
        }
    }
}

impl WorkerSettings {
    /// The effective worker count.
    #[must_use]
    pub fn effective_workers(&self) -> usize {
        if self.workers > 0 {
            self.workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1))
                .unwrap_or(1)
                .max(1)
        }
    }
}

/// Index enable flags.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexToggles {
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
}

impl Default for IndexToggles {
    fn default() -> Self {
        Self {
            predicate: true,
            incoming: true,
            alias: true,
            spatial: true,
            temporal: true,
        }
    }
}

/// Spatial index tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SpatialSettings {
    /// Geohash cell precision.
    pub geohash_precision: usize,
    /// Predicates whose objects carry positions.
    pub geo_predicates: Vec<String>,
}

impl Default for SpatialSettings {
    fn default() -> Self {
        Self {
            geohash_precision: semstreams_store::geohash::DEFAULT_PRECISION,
            geo_predicates: Vec::new(),
        }
    }
}

/// Temporal index tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TemporalSettings {
    /// Width of one time bucket.
    #[serde(with = "humantime_duration")]
    pub bucket_duration: Duration,
}

impl Default for TemporalSettings {
    fn default() -> Self {
        Self {
            bucket_duration: Duration::from_secs(60),
        }
    }
}

/// Embedder section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbedderFileSettings {
    /// Master switch.
    pub enabled: bool,
    /// Provider: `disabled`, `bm25` or `http`.
    pub provider: ProviderKind,
    /// HTTP provider endpoint.
    pub http_endpoint: Option<String>,
    /// HTTP provider model.
    pub http_model: Option<String>,
    /// Ordered property names mined for text.
    pub text_fields: Vec<String>,
    /// L1 retention window.
    #[serde(with = "humantime_duration")]
    pub retention_window: Duration,
    /// L2 bucket name; empty disables the persistent cache.
    pub cache_bucket: Option<String>,
    /// Allowed type patterns.
    pub enabled_types: Vec<String>,
    /// Denied type patterns (win over allowed).
    pub skip_types: Vec<String>,
}

impl Default for EmbedderFileSettings {
    fn default() -> Self {
        let defaults = EmbedderSettings::default();
        Self {
            enabled: defaults.enabled,
            provider: defaults.provider,
            http_endpoint: None,
            http_model: None,
            text_fields: Vec::new(),
            retention_window: defaults.retention_window,
            cache_bucket: Some(semstreams_store::buckets::EMBEDDINGS_CACHE.to_string()),
            enabled_types: Vec::new(),
            skip_types: Vec::new(),
        }
    }
}

/// Community detector section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommunityFileSettings {
    /// Master switch.
    pub enabled: bool,
    /// Only `label_propagation` is supported.
    pub algorithm: String,
    /// Fixed run interval.
    #[serde(with = "humantime_duration")]
    pub interval: Duration,
    /// Early-trigger churn percentage.
    pub churn_trigger_pct: f64,
    /// Hierarchy depth.
    pub max_levels: usize,
    /// Label propagation sweep cap.
    pub max_iterations: usize,
    /// Minimum community size.
    pub min_community_size: usize,
    /// Rank members with PageRank.
    pub use_pagerank: bool,
    /// PageRank iterations.
    pub pagerank_iterations: usize,
    /// PageRank damping.
    pub pagerank_damping: f64,
    /// Keywords kept per summary.
    pub top_keywords: usize,
    /// Optional remote summariser endpoint.
    pub summarizer_endpoint: Option<String>,
}

impl Default for CommunityFileSettings {
    fn default() -> Self {
        let defaults = DetectorSettings::default();
        Self {
            enabled: defaults.enabled,
            algorithm: "label_propagation".to_string(),
            interval: defaults.interval,
            churn_trigger_pct: defaults.churn_trigger_pct,
            max_levels: defaults.max_levels,
            max_iterations: defaults.max_iterations,
            min_community_size: defaults.min_community_size,
            use_pagerank: defaults.use_pagerank,
            pagerank_iterations: defaults.pagerank_iterations,
            pagerank_damping: defaults.pagerank_damping,
            top_keywords: defaults.top_keywords,
            summarizer_endpoint: None,
        }
    }
}

/// Query cache section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueryCacheFileSettings {
    /// Master switch.
    pub enabled: bool,
    /// Reply TTL.
    #[serde(with = "humantime_duration")]
    pub ttl: Duration,
    /// Maximum cached replies.
    pub max_entries: usize,
}

impl Default for QueryCacheFileSettings {
    fn default() -> Self {
        let defaults = QueryCacheSettings::default();
        Self {
            enabled: defaults.enabled,
            ttl: defaults.ttl,
            max_entries: defaults.max_entries,
        }
    }
}

/// One vocabulary entry from the config file.
#[derive(Debug, Clone, Deserialize)]
pub struct VocabularyEntry {
    /// Predicate name.
    pub name: String,
    /// Human description.
    #[serde(default)]
    pub description: String,
    /// Datatype hint.
    #[serde(default)]
    pub datatype: Option<String>,
    /// Units for numeric objects.
    #[serde(default)]
    pub units: Option<String>,
    /// IRI mapping.
    #[serde(default)]
    pub iri: Option<String>,
    /// Alias classification.
    #[serde(default)]
    pub alias: Option<VocabularyAlias>,
}

/// Alias sub-entry.
#[derive(Debug, Clone, Deserialize)]
pub struct VocabularyAlias {
    /// Alias class.
    #[serde(rename = "type")]
    pub alias_type: AliasType,
    /// Collision priority (lower wins).
    #[serde(default)]
    pub priority: i32,
}

/// The whole daemon configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Bus connection.
    pub nats: NatsSettings,
    /// Ingest subjects.
    pub subjects: Vec<String>,
    /// Worker pool.
    pub workers: WorkerSettings,
    /// Index toggles.
    pub indexes: IndexToggles,
    /// Spatial tuning.
    pub spatial: SpatialSettings,
    /// Temporal tuning.
    pub temporal: TemporalSettings,
    /// Embedder tier.
    pub embedder: EmbedderFileSettings,
    /// Community detector.
    pub community: CommunityFileSettings,
    /// Query cache.
    pub query_cache: QueryCacheFileSettings,
    /// Declarative rules.
    pub rules: Vec<RuleConfig>,
    /// Vocabulary entries registered at startup.
    pub vocabulary: Vec<VocabularyEntry>,
}

impl AppConfig {
    /// Load and validate a TOML config file.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] on read, parse or validation failure.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: AppConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Semantic validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers.queue_size == 0 {
            return Err(ConfigError::Invalid("workers.queue_size must be > 0".into()));
        }
        if self.workers.max_retries == 0 {
            return Err(ConfigError::Invalid("workers.max_retries must be > 0".into()));
        }
        if self.embedder.provider == ProviderKind::Http
            && self.embedder.enabled
            && self.embedder.http_endpoint.is_none()
        {
            return Err(ConfigError::Invalid(
                "embedder.provider = \"http\" requires embedder.http_endpoint".into(),
            ));
        }
        if self.community.algorithm != "label_propagation" {
            return Err(ConfigError::Invalid(format!(
                "community.algorithm {:?} is not supported",
                self.community.algorithm
            )));
        }
        if !(0.0..1.0).contains(&self.community.pagerank_damping) {
            return Err(ConfigError::Invalid(
                "community.pagerank_damping must be in [0, 1)".into(),
            ));
        }
        if self.spatial.geohash_precision == 0 || self.spatial.geohash_precision > 12 {
            return Err(ConfigError::Invalid(
                "spatial.geohash_precision must be in 1..=12".into(),
            ));
        }
        for entry in &self.vocabulary {
            if !VocabularyRegistry::valid_predicate(&entry.name) {
                return Err(ConfigError::Invalid(format!(
                    "vocabulary entry {:?} is not a valid predicate",
                    entry.name
                )));
            }
        }
        Ok(())
    }

    /// Ingest subjects (defaulting to the entity event wildcard).
    #[must_use]
    pub fn ingest_subjects(&self) -> Vec<String> {
        if self.subjects.is_empty() {
            vec![semstreams_net::subjects::ENTITY_EVENTS.to_string()]
        } else {
            self.subjects.clone()
        }
    }

    /// Build the index maintainer settings.
    #[must_use]
    pub fn index_settings(&self) -> IndexSettings {
        IndexSettings {
            predicate: self.indexes.predicate,
            incoming: self.indexes.incoming,
            alias: self.indexes.alias,
            spatial: self.indexes.spatial,
            temporal: self.indexes.temporal,
            geohash_precision: self.spatial.geohash_precision,
            temporal_bucket: self.temporal.bucket_duration,
            geo_predicates: self.spatial.geo_predicates.clone(),
        }
    }

    /// Build the embedder tier settings.
    #[must_use]
    pub fn embedder_settings(&self) -> EmbedderSettings {
        EmbedderSettings {
            enabled: self.embedder.enabled,
            provider: self.embedder.provider,
            http_endpoint: self.embedder.http_endpoint.clone(),
            http_model: self.embedder.http_model.clone(),
            text_fields: self.embedder.text_fields.clone(),
            retention_window: self.embedder.retention_window,
            enabled_types: self.embedder.enabled_types.clone(),
            skip_types: self.embedder.skip_types.clone(),
        }
    }

    /// Build the detector settings.
    #[must_use]
    pub fn detector_settings(&self) -> DetectorSettings {
        DetectorSettings {
            enabled: self.community.enabled,
            interval: self.community.interval,
            churn_trigger_pct: self.community.churn_trigger_pct,
            max_levels: self.community.max_levels,
            max_iterations: self.community.max_iterations,
            min_community_size: self.community.min_community_size,
            use_pagerank: self.community.use_pagerank,
            pagerank_iterations: self.community.pagerank_iterations,
            pagerank_damping: self.community.pagerank_damping,
            top_keywords: self.community.top_keywords,
            summarizer_endpoint: self.community.summarizer_endpoint.clone(),
        }
    }

    /// Build the query cache settings.
    #[must_use]
    pub fn cache_settings(&self) -> QueryCacheSettings {
        QueryCacheSettings {
            enabled: self.query_cache.enabled,
            ttl: self.query_cache.ttl,
            max_entries: self.query_cache.max_entries,
        }
    }

    /// Register the configured vocabulary entries.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] on conflicting registrations.
    pub fn register_vocabulary(&self, registry: &VocabularyRegistry) -> Result<(), ConfigError> {
        for entry in &self.vocabulary {
            let mut meta = PredicateMeta::new(&entry.name, &entry.description);
            meta.datatype = entry.datatype.clone();
            meta.units = entry.units.clone();
            meta.iri = entry.iri.clone();
            if let Some(alias) = &entry.alias {
                meta = meta.with_alias(alias.alias_type, alias.priority);
            }
            registry
                .register(meta)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        Ok(())
    }
}
