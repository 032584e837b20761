//! Community-detection metrics.

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGaugeVec, Opts, Registry};

/// Counters and gauges for the detector.
#[derive(Debug, Clone)]
pub struct CommunityMetrics {
    /// Completed detection runs.
    pub runs: IntCounter,
    /// Seconds per detection run.
    pub duration: Histogram,
    /// Communities per hierarchy level.
    pub communities: IntGaugeVec,
}

impl CommunityMetrics {
    /// Create the metric set (unregistered).
    ///
    /// # Errors
    ///
    /// Returns a [`prometheus::Error`] on invalid metric descriptors.
    pub fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            runs: IntCounter::new(
                "semstreams_community_detection_runs_total",
                "Completed community detection runs",
            )?,
            duration: Histogram::with_opts(HistogramOpts::new(
                "semstreams_community_detection_seconds",
                "Seconds per community detection run",
            ))?,
            communities: IntGaugeVec::new(
                Opts::new(
                    "semstreams_communities",
                    "Communities per hierarchy level",
                ),
                &["level"],
            )?,
        })
    }

    /// Register every metric on a registry.
    ///
    /// # Errors
    ///
    /// Returns a [`prometheus::Error`] on duplicate registration.
    pub fn register_on(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.runs.clone()))?;
        registry.register(Box::new(self.duration.clone()))?;
        registry.register(Box::new(self.communities.clone()))?;
        Ok(())
    }
}
