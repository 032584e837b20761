//! The rule contract.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use semstreams_net::messages::Envelope;

/// A typed event emitted when a rule fires.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleEvent {
    /// The rule that fired.
    pub rule: String,
    /// Event type string (defaults to the rule id).
    #[serde(rename = "type")]
    pub event_type: String,
    /// The entity the event concerns, when one could be determined.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,
    /// Event properties computed by the rule implementation.
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// When the rule fired.
    pub timestamp: DateTime<Utc>,
}

/// The per-rule contract.
///
/// Rules are pure evaluators: event emission is their only side-effect, and
/// the engine performs it. A rule never mutates the entity store.
pub trait Rule: Send + Sync {
    /// The unique rule id.
    fn name(&self) -> &str;

    /// Subjects this rule wants to observe.
    fn subscribe(&self) -> Vec<String>;

    /// Whether the rule fires for this batch of messages.
    fn evaluate(&self, messages: &[Envelope]) -> bool;

    /// The events to emit for a firing batch.
    fn execute_events(&self, messages: &[Envelope]) -> Vec<RuleEvent>;

    /// Suppression window between firings.
    fn cooldown(&self) -> Duration;
}
