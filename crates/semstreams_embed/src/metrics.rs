//! Embedding metrics.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGauge, Registry};

/// Counters, gauges and latency histogram for the embedder tier.
#[derive(Debug, Clone)]
pub struct EmbedMetrics {
    /// Vectors produced by a provider (cache misses that generated).
    pub generated: IntCounter,
    /// L2/content cache hits.
    pub cache_hits: IntCounter,
    /// Cache misses that went to a provider.
    pub cache_misses: IntCounter,
    /// Times the tier fell back from the HTTP provider to BM25.
    pub fallbacks: IntCounter,
    /// Entities skipped by type filters or empty text.
    pub skipped: IntCounter,
    /// Live vectors in the L1 cache.
    pub l1_active: IntGauge,
    /// Seconds spent generating one embedding.
    pub latency: Histogram,
}

impl EmbedMetrics {
    /// Create the metric set (unregistered).
    ///
    /// # Errors
    ///
    /// Returns a [`prometheus::Error`] on invalid metric descriptors.
    pub fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            generated: IntCounter::new(
                "semstreams_embeddings_generated_total",
                "Embeddings produced by a provider",
            )?,
            cache_hits: IntCounter::new(
                "semstreams_embedding_cache_hits_total",
                "Content-cache hits during embedding",
            )?,
            cache_misses: IntCounter::new(
                "semstreams_embedding_cache_misses_total",
                "Content-cache misses during embedding",
            )?,
            fallbacks: IntCounter::new(
                "semstreams_embedding_fallbacks_total",
                "Falls back from the HTTP provider to BM25",
            )?,
            skipped: IntCounter::new(
                "semstreams_embedding_skipped_total",
                "Entities skipped by type filters or empty text",
            )?,
            l1_active: IntGauge::new(
                "semstreams_embedding_l1_vectors",
                "Live vectors in the L1 cache",
            )?,
            latency: Histogram::with_opts(HistogramOpts::new(
                "semstreams_embedding_generation_seconds",
                "Seconds spent generating one embedding",
            ))?,
        })
    }

    /// Register every metric on a registry.
    ///
    /// # Errors
    ///
    /// Returns a [`prometheus::Error`] on duplicate registration.
    pub fn register_on(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.generated.clone()))?;
        registry.register(Box::new(self.cache_hits.clone()))?;
        registry.register(Box::new(self.cache_misses.clone()))?;
        registry.register(Box::new(self.fallbacks.clone()))?;
        registry.register(Box::new(self.skipped.clone()))?;
        registry.register(Box::new(self.l1_active.clone()))?;
        registry.register(Box::new(self.latency.clone()))?;
        Ok(())
    }
}
