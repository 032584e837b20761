//! Rule factory registry.
//!
//! Rules are instantiated through factories keyed by a rule type string;
//! each factory validates its declarative configuration before producing a
//! rule. The built-in `condition` factory covers threshold/equality rules
//! over payload fields; domain-specific factories register alongside it.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use semstreams_model::DottedPattern;
use semstreams_net::messages::Envelope;
use semstreams_net::subjects;

use crate::condition::{evaluate_all, field_at};
use crate::config::RuleConfig;
use crate::error::RuleError;
use crate::rule::{Rule, RuleEvent};

/// Builds rules of one type from declarative configuration.
pub trait RuleFactory: Send + Sync {
    /// The type string this factory answers to.
    fn rule_type(&self) -> &str;

    /// Validate the configuration and build the rule.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::InvalidConfig`] on a bad configuration.
    fn build(&self, config: &RuleConfig) -> Result<Box<dyn Rule>, RuleError>;
}

/// Registry of rule factories keyed by type string.
#[derive(Default)]
pub struct RuleRegistry {
    factories: HashMap<String, Box<dyn RuleFactory>>,
}

impl RuleRegistry {
    /// A registry with the built-in factories.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::default();
        registry.register(Box::new(ConditionRuleFactory));
        registry
    }

    /// Register a factory; a later registration with the same type string
    /// replaces the earlier one.
    pub fn register(&mut self, factory: Box<dyn RuleFactory>) {
        self.factories.insert(factory.rule_type().to_string(), factory);
    }

    /// Build one rule from its configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RuleError::UnknownType`] for unregistered types and
    /// propagates factory validation failures.
    pub fn build(&self, config: &RuleConfig) -> Result<Box<dyn Rule>, RuleError> {
        let factory = self
            .factories
            .get(&config.rule_type)
            .ok_or_else(|| RuleError::UnknownType(config.rule_type.clone()))?;
        factory.build(config)
    }

    /// Build every enabled rule, skipping (and logging) invalid ones.
    #[must_use]
    pub fn build_all(&self, configs: &[RuleConfig]) -> Vec<Box<dyn Rule>> {
        configs
            .iter()
            .filter(|c| c.enabled)
            .filter_map(|config| match self.build(config) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    warn!(rule = config.id, error = %e, "skipping invalid rule");
                    None
                }
            })
            .collect()
    }
}

// ── Built-in: condition rules ───────────────────────────────────────────────

/// Factory for declarative condition rules.
pub struct ConditionRuleFactory;

impl RuleFactory for ConditionRuleFactory {
    fn rule_type(&self) -> &str {
        "condition"
    }

    fn build(&self, config: &RuleConfig) -> Result<Box<dyn Rule>, RuleError> {
        if config.id.is_empty() {
            return Err(RuleError::InvalidConfig {
                rule: config.id.clone(),
                reason: "empty rule id".to_string(),
            });
        }
        if config.conditions.is_empty() {
            return Err(RuleError::InvalidConfig {
                rule: config.id.clone(),
                reason: "condition rule without conditions".to_string(),
            });
        }
        for condition in &config.conditions {
            if condition.field.is_empty() {
                return Err(RuleError::InvalidConfig {
                    rule: config.id.clone(),
                    reason: "condition with empty field path".to_string(),
                });
            }
        }
        Ok(Box::new(ConditionRule {
            config: config.clone(),
            entity_pattern: config.entity_pattern.as_deref().map(DottedPattern::new),
        }))
    }
}

struct ConditionRule {
    config: RuleConfig,
    entity_pattern: Option<DottedPattern>,
}

impl ConditionRule {
    fn entity_of(payload: &Value) -> Option<String> {
        field_at(payload, "entity_id")
            .and_then(Value::as_str)
            .map(str::to_string)
    }

    fn matches_entity(&self, payload: &Value) -> bool {
        match (&self.entity_pattern, Self::entity_of(payload)) {
            (None, _) => true,
            (Some(pattern), Some(entity_id)) => pattern.matches(&entity_id),
            (Some(_), None) => false,
        }
    }
}

impl Rule for ConditionRule {
    fn name(&self) -> &str {
        &self.config.id
    }

    fn subscribe(&self) -> Vec<String> {
        if self.config.watch_subjects.is_empty() {
            vec![subjects::ENTITY_EVENTS.to_string()]
        } else {
            self.config.watch_subjects.clone()
        }
    }

    fn evaluate(&self, messages: &[Envelope]) -> bool {
        messages.iter().any(|message| {
            if !self.matches_entity(&message.payload) {
                return false;
            }
            let (verdict, errors) =
                evaluate_all(&message.payload, &self.config.conditions, self.config.logic);
            for error in errors {
                warn!(rule = self.config.id, message_id = message.id, error = %error,
                      "condition evaluation error");
            }
            verdict
        })
    }

    fn execute_events(&self, messages: &[Envelope]) -> Vec<RuleEvent> {
        messages
            .iter()
            .filter(|message| {
                self.matches_entity(&message.payload)
                    && evaluate_all(&message.payload, &self.config.conditions, self.config.logic).0
            })
            .map(|message| {
                let mut properties = serde_json::Map::new();
                // Carry the matched field values so consumers need not
                // re-fetch the triggering message.
                for condition in &self.config.conditions {
                    if let Some(value) = field_at(&message.payload, &condition.field) {
                        properties.insert(condition.field.clone(), value.clone());
                    }
                }
                properties.insert(
                    "message_id".to_string(),
                    Value::String(message.id.clone()),
                );
                RuleEvent {
                    rule: self.config.id.clone(),
                    event_type: self.config.id.clone(),
                    entity_id: Self::entity_of(&message.payload),
                    properties,
                    timestamp: chrono::Utc::now(),
                }
            })
            .collect()
    }

    fn cooldown(&self) -> Duration {
        self.config.cooldown
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use semstreams_net::api::FilterOp;
    use semstreams_net::messages::MessageType;

    use crate::config::{ConditionSpec, Logic};

    use super::*;

    fn battery_config() -> RuleConfig {
        RuleConfig {
            id: "battery-low".to_string(),
            rule_type: "condition".to_string(),
            enabled: true,
            conditions: vec![ConditionSpec {
                field: "properties.battery".to_string(),
                op: FilterOp::Lt,
                value: json!(20),
            }],
            logic: Logic::And,
            cooldown: Duration::from_secs(60),
            entity_pattern: Some("acme.tele.robo.*.drone.*".to_string()),
            watch_subjects: vec![],
        }
    }

    fn envelope(payload: Value) -> Envelope {
        Envelope::new(MessageType::v1("graph", "entity.upsert"), &payload, "test").unwrap()
    }

    #[test]
    fn test_factory_validates_config() {
        let registry = RuleRegistry::with_builtins();
        assert!(registry.build(&battery_config()).is_ok());

        let mut empty = battery_config();
        empty.conditions.clear();
        assert!(matches!(
            registry.build(&empty),
            Err(RuleError::InvalidConfig { .. })
        ));

        let mut unknown = battery_config();
        unknown.rule_type = "nonexistent".to_string();
        assert!(matches!(
            registry.build(&unknown),
            Err(RuleError::UnknownType(_))
        ));
    }

    #[test]
    fn test_condition_rule_fires_on_match() {
        let rule = RuleRegistry::with_builtins().build(&battery_config()).unwrap();
        let firing = envelope(json!({
            "entity_id": "acme.tele.robo.gcs1.drone.001",
            "properties": {"battery": 12}
        }));
        let calm = envelope(json!({
            "entity_id": "acme.tele.robo.gcs1.drone.001",
            "properties": {"battery": 80}
        }));
        assert!(rule.evaluate(std::slice::from_ref(&firing)));
        assert!(!rule.evaluate(std::slice::from_ref(&calm)));

        let events = rule.execute_events(&[firing]);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].rule, "battery-low");
        assert_eq!(
            events[0].entity_id.as_deref(),
            Some("acme.tele.robo.gcs1.drone.001")
        );
        assert_eq!(events[0].properties["properties.battery"], json!(12));
    }

    #[test]
    fn test_entity_pattern_gates_rule() {
        let rule = RuleRegistry::with_builtins().build(&battery_config()).unwrap();
        let other = envelope(json!({
            "entity_id": "acme.ops.log.hq.fleet.rescue",
            "properties": {"battery": 5}
        }));
        assert!(!rule.evaluate(&[other]));
    }

    #[test]
    fn test_default_subscription() {
        let rule = RuleRegistry::with_builtins().build(&battery_config()).unwrap();
        assert_eq!(rule.subscribe(), vec!["events.graph.entity.*".to_string()]);
    }

    #[test]
    fn test_build_all_skips_invalid() {
        let registry = RuleRegistry::with_builtins();
        let mut bad = battery_config();
        bad.id = "bad".to_string();
        bad.conditions.clear();
        let mut disabled = battery_config();
        disabled.id = "off".to_string();
        disabled.enabled = false;
        let rules = registry.build_all(&[battery_config(), bad, disabled]);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].name(), "battery-low");
    }
}
