//! Predicate vocabulary registry.
//!
//! A process-wide catalog of predicate metadata, initialised before first
//! ingest and read-mostly afterwards. The index maintainer consults it to
//! decide which triples feed which indexes; it does not drive schema
//! validation of entities.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Classified, ErrorClass};

static PREDICATE_GRAMMAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z][a-z0-9]*(\.[a-z][a-z0-9_]*){2}$").expect("predicate grammar")
});

/// Alias classification for predicates that carry alternative identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AliasType {
    /// Primary identity alias (e.g. a callsign).
    Identity,
    /// Secondary identifier.
    Alternate,
    /// Identifier assigned by an external system.
    External,
    /// Communication address (radio callsign, MMSI, ...).
    Communication,
    /// Display label — intentionally ambiguous, never indexed for
    /// resolution.
    Label,
}

impl AliasType {
    /// `true` if values of this alias type may resolve back to an entity.
    #[must_use]
    pub fn resolvable(self) -> bool {
        !matches!(self, AliasType::Label)
    }
}

/// Alias classification plus priority. Lower priority values win on
/// collisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasSpec {
    /// The alias class.
    #[serde(rename = "type")]
    pub alias_type: AliasType,
    /// Collision priority; lower wins.
    pub priority: i32,
}

/// Metadata registered for one predicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredicateMeta {
    /// The three-part dotted predicate name.
    pub name: String,
    /// Human description.
    #[serde(default)]
    pub description: String,
    /// Expected object datatype hint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
    /// Units for numeric objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    /// Valid numeric range, when applicable.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<(f64, f64)>,
    /// IRI mapping used only at export boundaries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iri: Option<String>,
    /// Alias classification, when this predicate carries identifiers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<AliasSpec>,
}

impl PredicateMeta {
    /// Metadata with just a name and description.
    #[must_use]
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            datatype: None,
            units: None,
            range: None,
            iri: None,
            alias: None,
        }
    }

    /// Mark this predicate as an alias carrier.
    #[must_use]
    pub fn with_alias(mut self, alias_type: AliasType, priority: i32) -> Self {
        self.alias = Some(AliasSpec {
            alias_type,
            priority,
        });
        self
    }

    /// Set the datatype hint.
    #[must_use]
    pub fn with_datatype(mut self, datatype: impl Into<String>) -> Self {
        self.datatype = Some(datatype.into());
        self
    }
}

/// Errors raised by vocabulary registration.
#[derive(Debug, Clone, thiserror::Error)]
pub enum VocabularyError {
    /// The predicate name does not match the dotted grammar.
    #[error("invalid predicate shape: {0:?}")]
    InvalidPredicate(String),
    /// Re-registration with conflicting metadata.
    #[error("conflicting registration for predicate {0:?}")]
    InvalidConfig(String),
    /// The registry lock was poisoned by a panicking writer.
    #[error("vocabulary registry lock poisoned")]
    Poisoned,
}

impl Classified for VocabularyError {
    fn class(&self) -> ErrorClass {
        match self {
            VocabularyError::InvalidPredicate(_) | VocabularyError::InvalidConfig(_) => {
                ErrorClass::InvalidInput
            }
            VocabularyError::Poisoned => ErrorClass::Fatal,
        }
    }
}

/// The process-wide predicate metadata registry.
///
/// Registration happens during startup; afterwards the registry is
/// read-mostly, so an `RwLock` over a plain map is sufficient.
#[derive(Debug, Default)]
pub struct VocabularyRegistry {
    entries: RwLock<HashMap<String, PredicateMeta>>,
}

impl VocabularyRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enforces the dotted predicate grammar: exactly three lowercase parts,
    /// no consecutive dots.
    #[must_use]
    pub fn valid_predicate(name: &str) -> bool {
        PREDICATE_GRAMMAR.is_match(name)
    }

    /// Register predicate metadata.
    ///
    /// Idempotent for identical metadata; re-registration with conflicting
    /// metadata fails with [`VocabularyError::InvalidConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error on a bad predicate shape or a conflicting
    /// re-registration.
    pub fn register(&self, meta: PredicateMeta) -> Result<(), VocabularyError> {
        if !Self::valid_predicate(&meta.name) {
            return Err(VocabularyError::InvalidPredicate(meta.name));
        }
        let mut entries = self.entries.write().map_err(|_| VocabularyError::Poisoned)?;
        match entries.get(&meta.name) {
            Some(existing) if *existing == meta => Ok(()),
            Some(_) => Err(VocabularyError::InvalidConfig(meta.name)),
            None => {
                entries.insert(meta.name.clone(), meta);
                Ok(())
            }
        }
    }

    /// Look up metadata for a predicate.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<PredicateMeta> {
        self.entries.read().ok()?.get(name).cloned()
    }

    /// Predicates whose values may resolve back to an entity, mapped to
    /// their collision priority. `label` aliases are excluded.
    #[must_use]
    pub fn alias_predicates(&self) -> HashMap<String, i32> {
        let Ok(entries) = self.entries.read() else {
            return HashMap::new();
        };
        entries
            .values()
            .filter_map(|meta| {
                let alias = meta.alias?;
                alias
                    .alias_type
                    .resolvable()
                    .then(|| (meta.name.clone(), alias.priority))
            })
            .collect()
    }

    /// Number of registered predicates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    /// `true` if nothing has been registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
