//! Entity identifiers.
//!
//! An [`EntityId`] is a six-part dotted key of the form
//! `org.platform.domain.system.type.instance`. IDs are lowercase, every part
//! is non-empty, and the grammar is bit-exact:
//! `^[a-z0-9]+(\.[a-z0-9_-]+){5}$`. IDs must be deterministic from source
//! data — the same upstream object always yields the same ID.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Classified, ErrorClass};

/// Number of dot-separated parts in a valid entity ID.
pub const ID_PARTS: usize = 6;

static ID_GRAMMAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]+(\.[a-z0-9_-]+){5}$").expect("entity id grammar"));

/// A globally unique, six-part dotted entity identifier.
///
/// `EntityId` is a validated newtype over its string form. Construction goes
/// through [`EntityId::parse`]; deserialisation re-validates, so an ID held
/// by any component is always well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    /// Parse and validate an entity ID.
    ///
    /// # Errors
    ///
    /// Returns [`IdError::Malformed`] if the string does not match the
    /// six-part dotted grammar.
    pub fn parse(raw: &str) -> Result<Self, IdError> {
        if Self::is_valid(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(IdError::Malformed(raw.to_string()))
        }
    }

    /// Returns `true` if the string is a syntactically valid entity ID.
    #[must_use]
    pub fn is_valid(raw: &str) -> bool {
        ID_GRAMMAR.is_match(raw)
    }

    /// The full dotted string form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The six dotted parts, in order.
    #[must_use]
    pub fn parts(&self) -> Vec<&str> {
        self.0.split('.').collect()
    }

    /// The `type` part (fifth of six), e.g. `drone` in
    /// `acme.tele.robo.gcs1.drone.001`.
    #[must_use]
    pub fn type_part(&self) -> &str {
        self.0.split('.').nth(4).unwrap_or("")
    }

    /// The `instance` part (last of six).
    #[must_use]
    pub fn instance(&self) -> &str {
        self.0.split('.').next_back().unwrap_or("")
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for EntityId {
    type Error = IdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        EntityId::parse(&value)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Errors produced when parsing entity identifiers.
#[derive(Debug, Clone, thiserror::Error)]
pub enum IdError {
    /// The string does not match the six-part dotted grammar.
    #[error("malformed entity id: {0:?}")]
    Malformed(String),
}

impl Classified for IdError {
    fn class(&self) -> ErrorClass {
        ErrorClass::InvalidInput
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_six_part_id() {
        let id = EntityId::parse("acme.tele.robo.gcs1.drone.001").unwrap();
        assert_eq!(id.as_str(), "acme.tele.robo.gcs1.drone.001");
        assert_eq!(id.parts().len(), ID_PARTS);
        assert_eq!(id.type_part(), "drone");
        assert_eq!(id.instance(), "001");
    }

    #[test]
    fn test_rejects_wrong_part_count() {
        assert!(EntityId::parse("acme.tele.robo.gcs1.drone").is_err());
        assert!(EntityId::parse("acme.tele.robo.gcs1.drone.001.extra").is_err());
    }

    #[test]
    fn test_rejects_empty_parts() {
        assert!(EntityId::parse("acme..robo.gcs1.drone.001").is_err());
        assert!(EntityId::parse(".tele.robo.gcs1.drone.001").is_err());
        assert!(EntityId::parse("acme.tele.robo.gcs1.drone.").is_err());
    }

    #[test]
    fn test_rejects_uppercase() {
        assert!(EntityId::parse("Acme.tele.robo.gcs1.drone.001").is_err());
        assert!(EntityId::parse("acme.tele.robo.gcs1.Drone.001").is_err());
    }

    #[test]
    fn test_first_part_disallows_separators() {
        // Underscores and dashes are only allowed after the first part.
        assert!(EntityId::parse("ac_me.tele.robo.gcs1.drone.001").is_err());
        assert!(EntityId::parse("acme.tele.robo.gcs_1.drone.x-1").is_ok());
    }

    #[test]
    fn test_serde_roundtrip_and_validation() {
        let id = EntityId::parse("acme.tele.robo.gcs1.drone.001").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"acme.tele.robo.gcs1.drone.001\"");
        let back: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);

        let bad: Result<EntityId, _> = serde_json::from_str("\"not-an-id\"");
        assert!(bad.is_err());
    }
}
