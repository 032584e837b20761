//! # semstreams_model
//!
//! Core data model for the semantic streaming engine.
//!
//! This crate provides:
//!
//! - [`id`] — the six-part dotted [`EntityId`] and its validation grammar.
//! - [`triple`] — [`Triple`] facts and computed [`Edge`] relationships.
//! - [`state`] — the authoritative [`EntityState`] record and ingest payload.
//! - [`value`] — dynamically typed property values and comparison semantics.
//! - [`vocabulary`] — the process-wide predicate metadata registry.
//! - [`pattern`] — dotted glob patterns used for type filters and ID globs.
//! - [`error`] — the five-class error taxonomy crossed at every boundary.

pub mod error;
pub mod id;
pub mod pattern;
pub mod state;
pub mod triple;
pub mod value;
pub mod vocabulary;

pub use error::{Classified, ErrorClass, ErrorRecord};
pub use id::EntityId;
pub use pattern::DottedPattern;
pub use state::{EntityPayload, EntityState, EntityStatus, Node, Position};
pub use triple::{Edge, Triple};
pub use vocabulary::{AliasType, PredicateMeta, VocabularyRegistry};
