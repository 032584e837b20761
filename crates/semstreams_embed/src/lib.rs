//! # semstreams_embed
//!
//! The embedder tier: produces a fixed-dimension vector per entity for
//! semantic search.
//!
//! This crate provides:
//!
//! - [`text`] — property text extraction and type filters.
//! - [`bm25`] — the deterministic in-process BM25 baseline embedder.
//! - [`http`] — the optional neural provider over HTTP.
//! - [`cache`] — the TTL-bounded L1 cache and content-addressed L2 cache.
//! - [`tier`] — provider selection, startup probe, fallback, generation flow.
//! - [`metrics`] — embedding counters and latency histograms.
//!
//! Embedding is always asynchronous with respect to entity commits: a failed
//! or slow embedding never blocks or loses a write.

pub mod bm25;
pub mod cache;
pub mod error;
pub mod http;
pub mod metrics;
pub mod text;
pub mod tier;

pub use bm25::{Bm25Embedder, DIMENSIONS};
pub use cache::{L1Cache, L2Cache};
pub use error::EmbedError;
pub use metrics::EmbedMetrics;
pub use text::{TextExtractor, TypeFilter};
pub use tier::{EmbedderSettings, EmbedderTier, ProviderKind};

/// Cosine similarity between two vectors. Returns 0.0 when either vector is
/// zero or the dimensions differ.
#[must_use]
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_orthogonal_and_parallel() {
        assert_eq!(cosine(&[1.0, 0.0], &[0.0, 1.0]), 0.0);
        assert!((cosine(&[1.0, 2.0], &[2.0, 4.0]) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine(&[0.0, 0.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine(&[], &[]), 0.0);
    }
}
