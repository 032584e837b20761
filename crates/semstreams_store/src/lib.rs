//! # semstreams_store
//!
//! Durable state for the semantic streaming core.
//!
//! This crate provides:
//!
//! - [`buckets`] — the stable KV bucket names.
//! - [`kv`] — the [`KeyValue`] bucket abstraction with JetStream-backed and
//!   in-memory implementations.
//! - [`entity`] — the authoritative entity store over the primary bucket.
//! - [`index`] — the secondary index maintainer (predicate, incoming, alias,
//!   spatial, temporal).
//! - [`geohash`] — geohash encoding for the spatial index.
//! - [`error`] — storage error types.
//!
//! The entity store is authoritative; every index bucket is derived state
//! and can be rebuilt from it at any time.

pub mod buckets;
pub mod entity;
pub mod error;
pub mod geohash;
pub mod index;
pub mod kv;

pub use entity::{EntityStore, UpsertOutcome};
pub use error::StoreError;
pub use index::{IndexMaintainer, IndexSettings};
pub use kv::{JetStreamBucket, KeyValue, MemoryBucket};
