//! Rules engine metrics.

use prometheus::{IntCounterVec, Opts, Registry};

/// Evaluation and trigger counters, labelled by rule id.
#[derive(Debug, Clone)]
pub struct RuleMetrics {
    /// Rule evaluations.
    pub evaluations: IntCounterVec,
    /// Rule firings (after cooldown).
    pub triggers: IntCounterVec,
    /// Firings suppressed by cooldown.
    pub suppressed: IntCounterVec,
}

impl RuleMetrics {
    /// Create the metric set (unregistered).
    ///
    /// # Errors
    ///
    /// Returns a [`prometheus::Error`] on invalid metric descriptors.
    pub fn new() -> Result<Self, prometheus::Error> {
        Ok(Self {
            evaluations: IntCounterVec::new(
                Opts::new("semstreams_rule_evaluations_total", "Rule evaluations"),
                &["rule"],
            )?,
            triggers: IntCounterVec::new(
                Opts::new("semstreams_rule_triggers_total", "Rule firings"),
                &["rule"],
            )?,
            suppressed: IntCounterVec::new(
                Opts::new(
                    "semstreams_rule_suppressed_total",
                    "Firings suppressed by cooldown",
                ),
                &["rule"],
            )?,
        })
    }

    /// Register every metric on a registry.
    ///
    /// # Errors
    ///
    /// Returns a [`prometheus::Error`] on duplicate registration.
    pub fn register_on(&self, registry: &Registry) -> Result<(), prometheus::Error> {
        registry.register(Box::new(self.evaluations.clone()))?;
        registry.register(Box::new(self.triggers.clone()))?;
        registry.register(Box::new(self.suppressed.clone()))?;
        Ok(())
    }
}
