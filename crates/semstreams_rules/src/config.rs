//! Declarative rule configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use semstreams_net::api::FilterOp;

/// How a rule's conditions combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Logic {
    /// Every condition must hold.
    #[default]
    And,
    /// At least one condition must hold.
    Or,
}

/// One condition over a message payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionSpec {
    /// Dotted path into the payload (e.g. `properties.battery.level`).
    pub field: String,
    /// Comparison operator.
    pub op: FilterOp,
    /// Comparison operand; ignored by `exists`.
    #[serde(default)]
    pub value: Value,
}

/// Declarative configuration of one rule instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Unique rule id.
    pub id: String,
    /// Factory type string (e.g. `condition`).
    #[serde(rename = "type")]
    pub rule_type: String,
    /// Disabled rules are built but never evaluated.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// The conditions.
    #[serde(default)]
    pub conditions: Vec<ConditionSpec>,
    /// How conditions combine.
    #[serde(default)]
    pub logic: Logic,
    /// Suppress repeat firing within this window.
    #[serde(default = "default_cooldown", with = "humantime_duration")]
    pub cooldown: Duration,
    /// Dotted glob the message's entity ID must match, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_pattern: Option<String>,
    /// Subjects this rule watches.
    #[serde(default)]
    pub watch_subjects: Vec<String>,
}

fn default_enabled() -> bool {
    true
}

fn default_cooldown() -> Duration {
    Duration::from_secs(60)
}

/// Serde adapter: durations as humantime strings (`"30s"`, `"5m"`).
pub mod humantime_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialise as a humantime string.
    ///
    /// # Errors
    ///
    /// Never fails.
    pub fn serialize<S: Serializer>(duration: &Duration, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    /// Deserialise from a humantime string or integer seconds.
    ///
    /// # Errors
    ///
    /// Fails on an unparseable duration.
    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Seconds(u64),
        }
        match Raw::deserialize(de)? {
            Raw::Text(s) => humantime::parse_duration(&s).map_err(serde::de::Error::custom),
            Raw::Seconds(secs) => Ok(Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_json() {
        let config: RuleConfig = serde_json::from_value(serde_json::json!({
            "id": "battery-low",
            "type": "condition",
            "conditions": [
                {"field": "properties.battery", "op": "lt", "value": 20}
            ],
            "logic": "and",
            "cooldown": "5m",
            "entity_pattern": "acme.tele.robo.*.drone.*",
            "watch_subjects": ["events.graph.entity.*"]
        }))
        .unwrap();
        assert!(config.enabled);
        assert_eq!(config.cooldown, Duration::from_secs(300));
        assert_eq!(config.conditions.len(), 1);
        assert_eq!(config.logic, Logic::And);
    }

    #[test]
    fn test_cooldown_accepts_integer_seconds() {
        let config: RuleConfig = serde_json::from_value(serde_json::json!({
            "id": "r",
            "type": "condition",
            "cooldown": 30
        }))
        .unwrap();
        assert_eq!(config.cooldown, Duration::from_secs(30));
    }

    #[test]
    fn test_defaults() {
        let config: RuleConfig =
            serde_json::from_value(serde_json::json!({"id": "r", "type": "condition"})).unwrap();
        assert!(config.enabled);
        assert_eq!(config.cooldown, Duration::from_secs(60));
        assert!(config.watch_subjects.is_empty());
    }
}
