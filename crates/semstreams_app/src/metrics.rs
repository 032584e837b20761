//! Process-wide metrics assembly.
//!
//! Each subsystem crate owns its metric structs; this module creates them,
//! registers everything on one registry and renders the text exposition
//! served over `graph.metrics`.

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

use semstreams_community::CommunityMetrics;
use semstreams_embed::EmbedMetrics;
use semstreams_rules::RuleMetrics;

/// Worker pool and index maintenance metrics.
#[derive(Debug, Clone)]
pub struct WorkerMetrics {
    /// Messages processed to completion.
    pub processed: IntCounter,
    /// Messages that exhausted retries or failed terminally.
    pub failed: IntCounter,
    /// Messages routed to the dead-letter subject.
    pub dead_lettered: IntCounter,
    /// Transient retries performed.
    pub retries: IntCounter,
    /// Messages waiting across all worker queues.
    pub queue_depth: IntGauge,
    /// Seconds spent processing one message.
    pub processing_seconds: Histogram,
    /// Index entries written or removed.
    pub index_updates: IntCounter,
    /// Index update batches that exhausted retries (repair required).
    pub index_failures: IntCounter,
    /// Seconds per index diff application.
    pub index_seconds: Histogram,
    /// Entities in the primary bucket.
    pub entity_count: IntGauge,
}

impl WorkerMetrics {
    fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            processed: IntCounter::new(
                "semstreams_messages_processed_total",
                "Messages processed to completion",
            )?,
            failed: IntCounter::new(
                "semstreams_messages_failed_total",
                "Messages that failed terminally",
            )?,
            dead_lettered: IntCounter::new(
                "semstreams_messages_dead_lettered_total",
                "Messages routed to the dead-letter subject",
            )?,
            retries: IntCounter::new(
                "semstreams_message_retries_total",
                "Transient retries performed",
            )?,
            queue_depth: IntGauge::new(
                "semstreams_queue_depth",
                "Messages waiting across all worker queues",
            )?,
            processing_seconds: Histogram::with_opts(HistogramOpts::new(
                "semstreams_message_processing_seconds",
                "Seconds spent processing one message",
            ))?,
            index_updates: IntCounter::new(
                "semstreams_index_updates_total",
                "Index entries written or removed",
            )?,
            index_failures: IntCounter::new(
                "semstreams_index_update_failures_total",
                "Index update batches needing repair",
            )?,
            index_seconds: Histogram::with_opts(HistogramOpts::new(
                "semstreams_index_update_seconds",
                "Seconds per index diff application",
            ))?,
            entity_count: IntGauge::new(
                "semstreams_entity_count",
                "Entities in the primary bucket",
            )?,
        })
    }

    fn register_on(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.processed.clone()))?;
        registry.register(Box::new(self.failed.clone()))?;
        registry.register(Box::new(self.dead_lettered.clone()))?;
        registry.register(Box::new(self.retries.clone()))?;
        registry.register(Box::new(self.queue_depth.clone()))?;
        registry.register(Box::new(self.processing_seconds.clone()))?;
        registry.register(Box::new(self.index_updates.clone()))?;
        registry.register(Box::new(self.index_failures.clone()))?;
        registry.register(Box::new(self.index_seconds.clone()))?;
        registry.register(Box::new(self.entity_count.clone()))?;
        Ok(())
    }
}

/// Query surface metrics, labelled by query kind.
#[derive(Debug, Clone)]
pub struct QueryMetrics {
    /// Queries served.
    pub queries: IntCounterVec,
    /// Queries that returned an error record.
    pub failures: IntCounterVec,
    /// Query latency.
    pub seconds: HistogramVec,
    /// Result-cache hits.
    pub cache_hits: IntCounter,
    /// Result sizes.
    pub result_size: HistogramVec,
}

impl QueryMetrics {
    fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            queries: IntCounterVec::new(
                Opts::new("semstreams_queries_total", "Queries served"),
                &["kind"],
            )?,
            failures: IntCounterVec::new(
                Opts::new("semstreams_query_failures_total", "Queries that failed"),
                &["kind"],
            )?,
            seconds: HistogramVec::new(
                HistogramOpts::new("semstreams_query_seconds", "Query latency"),
                &["kind"],
            )?,
            cache_hits: IntCounter::new(
                "semstreams_query_cache_hits_total",
                "Result-cache hits",
            )?,
            result_size: HistogramVec::new(
                HistogramOpts::new("semstreams_query_result_size", "Result sizes").buckets(vec![
                    0.0, 1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0,
                ]),
                &["kind"],
            )?,
        })
    }

    fn register_on(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.queries.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.seconds.clone()))?;
        registry.register(Box::new(self.cache_hits.clone()))?;
        registry.register(Box::new(self.result_size.clone()))?;
        Ok(())
    }
}

/// All metric sets plus the registry that renders them.
pub struct AppMetrics {
    registry: Registry,
    /// Worker pool and indexing.
    pub worker: WorkerMetrics,
    /// Query surface.
    pub query: QueryMetrics,
    /// Embedder tier.
    pub embed: EmbedMetrics,
    /// Community detector.
    pub community: CommunityMetrics,
    /// Rules engine.
    pub rules: RuleMetrics,
}

impl AppMetrics {
    /// Create and register every metric.
    ///
    /// # Errors
    ///
    /// Returns a [`prometheus::Error`] on invalid or duplicate descriptors.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let worker = WorkerMetrics::new()?;
        worker.register_on(&registry)?;
        let query = QueryMetrics::new()?;
        query.register_on(&registry)?;
        let embed = EmbedMetrics::new()?;
        embed.register_on(&registry)?;
        let community = CommunityMetrics::new()?;
        community.register_on(&registry)?;
        let rules = RuleMetrics::new()?;
        rules.register_on(&registry)?;
        Ok(Self {
            registry,
            worker,
            query,
            embed,
            community,
            rules,
        })
    }

    /// Render the text exposition format.
    #[must_use]
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        if encoder.encode(&self.registry.gather(), &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
