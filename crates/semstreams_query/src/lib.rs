//! # semstreams_query
//!
//! The two query evaluators.
//!
//! - [`pathrag`] — bounded best-first graph traversal with decay scoring.
//! - [`graphrag`] — community-scoped (local) and cross-community (global)
//!   semantic search over the embedder tier and the community index.
//! - [`cache`] — a TTL-bounded result cache keyed by canonical request hash.
//!
//! Every query carries a deadline; a tripped bound surfaces as
//! `truncated = true` rather than an error. Evaluators only read derived
//! state — they never write anything.

pub mod cache;
pub mod error;
pub mod graphrag;
pub mod pathrag;

pub use cache::{QueryCache, QueryCacheSettings};
pub use error::QueryError;
pub use graphrag::{GraphRag, GraphRagSettings};
pub use pathrag::PathRag;
