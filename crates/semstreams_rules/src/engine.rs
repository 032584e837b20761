//! The rules engine.
//!
//! Holds the built rules, routes incoming messages to the rules whose watch
//! subjects match, applies per-rule cooldowns, and hands back the events to
//! publish. The transport loop lives with the caller; the engine itself is
//! synchronous and side-effect free apart from its cooldown clock.

use std::sync::Mutex;
use std::time::Instant;

use tracing::debug;

use semstreams_model::pattern::subject_matches;
use semstreams_net::messages::Envelope;

use crate::metrics::RuleMetrics;
use crate::rule::{Rule, RuleEvent};

struct RuleState {
    rule: Box<dyn Rule>,
    last_fired: Mutex<Option<Instant>>,
}

/// The engine over a fixed rule set.
pub struct RulesEngine {
    rules: Vec<RuleState>,
    metrics: RuleMetrics,
}

impl RulesEngine {
    /// Wrap a built rule set.
    #[must_use]
    pub fn new(rules: Vec<Box<dyn Rule>>, metrics: RuleMetrics) -> Self {
        Self {
            rules: rules
                .into_iter()
                .map(|rule| RuleState {
                    rule,
                    last_fired: Mutex::new(None),
                })
                .collect(),
            metrics,
        }
    }

    /// Number of rules held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// `true` when no rules are configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The union of all watch subjects, deduplicated.
    #[must_use]
    pub fn watch_subjects(&self) -> Vec<String> {
        let mut subjects: Vec<String> = self
            .rules
            .iter()
            .flat_map(|state| state.rule.subscribe())
            .collect();
        subjects.sort();
        subjects.dedup();
        subjects
    }

    /// Feed one message; returns the events to publish.
    ///
    /// Cooldown is applied per rule: a rule that fired within its window is
    /// suppressed, not re-evaluated later for the missed message.
    #[must_use]
    pub fn handle(&self, subject: &str, message: &Envelope) -> Vec<RuleEvent> {
        let mut out = Vec::new();
        for state in &self.rules {
            let watches = state
                .rule
                .subscribe()
                .iter()
                .any(|pattern| subject_matches(pattern, subject));
            if !watches {
                continue;
            }

            self.metrics
                .evaluations
                .with_label_values(&[state.rule.name()])
                .inc();
            let batch = std::slice::from_ref(message);
            if !state.rule.evaluate(batch) {
                continue;
            }

            let mut last_fired = match state.last_fired.lock() {
                Ok(guard) => guard,
                Err(_) => continue,
            };
            if last_fired.is_some_and(|at| at.elapsed() < state.rule.cooldown()) {
                self.metrics
                    .suppressed
                    .with_label_values(&[state.rule.name()])
                    .inc();
                continue;
            }
            *last_fired = Some(Instant::now());
            drop(last_fired);

            let events = state.rule.execute_events(batch);
            debug!(
                rule = state.rule.name(),
                events = events.len(),
                "rule fired"
            );
            self.metrics
                .triggers
                .with_label_values(&[state.rule.name()])
                .inc();
            out.extend(events);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use semstreams_net::api::FilterOp;
    use semstreams_net::messages::MessageType;

    use crate::config::{ConditionSpec, Logic, RuleConfig};
    use crate::factory::RuleRegistry;

    use super::*;

    fn engine(cooldown: Duration) -> RulesEngine {
        let config = RuleConfig {
            id: "battery-low".to_string(),
            rule_type: "condition".to_string(),
            enabled: true,
            conditions: vec![ConditionSpec {
                field: "properties.battery".to_string(),
                op: FilterOp::Lt,
                value: json!(20),
            }],
            logic: Logic::And,
            cooldown,
            entity_pattern: None,
            watch_subjects: vec!["events.graph.entity.*".to_string()],
        };
        let rules = RuleRegistry::with_builtins().build_all(&[config]);
        RulesEngine::new(rules, RuleMetrics::new().unwrap())
    }

    fn low_battery() -> Envelope {
        Envelope::new(
            MessageType::v1("graph", "entity.upsert"),
            &json!({
                "entity_id": "acme.tele.robo.gcs1.drone.001",
                "properties": {"battery": 9}
            }),
            "test",
        )
        .unwrap()
    }

    #[test]
    fn test_fires_and_respects_cooldown() {
        let engine = engine(Duration::from_secs(600));
        let events = engine.handle("events.graph.entity.upsert", &low_battery());
        assert_eq!(events.len(), 1);

        // Second firing within the window is suppressed.
        let events = engine.handle("events.graph.entity.upsert", &low_battery());
        assert!(events.is_empty());
    }

    #[test]
    fn test_cooldown_expiry_allows_refire() {
        let engine = engine(Duration::from_millis(0));
        assert_eq!(engine.handle("events.graph.entity.upsert", &low_battery()).len(), 1);
        assert_eq!(engine.handle("events.graph.entity.upsert", &low_battery()).len(), 1);
    }

    #[test]
    fn test_subject_routing() {
        let engine = engine(Duration::from_secs(600));
        let events = engine.handle("events.rule.triggered", &low_battery());
        assert!(events.is_empty());
    }

    #[test]
    fn test_watch_subjects_union() {
        let engine = engine(Duration::from_secs(600));
        assert_eq!(engine.watch_subjects(), vec!["events.graph.entity.*".to_string()]);
    }
}
