//! BM25 baseline embedder.
//!
//! Pure in-process provider. Maintains a rolling document-frequency table
//! over embedded entities and projects BM25 term weights into a fixed
//! 384-dimension vector via a stable hash, so cosine ordering between
//! vectors tracks BM25 scoring for corpus-consistent comparison.
//!
//! Determinism contract: [`Bm25Embedder::generate`] is a pure function of
//! (text, corpus state). The corpus only changes through
//! [`Bm25Embedder::observe`], which the tier calls when an entity document is
//! admitted — never during generation — so the same text embeds to the
//! bit-identical vector until the corpus moves.

use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

/// Vector dimensionality of the baseline provider.
pub const DIMENSIONS: usize = 384;

const K1: f32 = 1.2;
const B: f32 = 0.75;

/// FNV-1a 64-bit hash. Stable across platforms and builds, unlike the
/// standard library hasher.
fn fnv1a(term: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in term.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(str::to_lowercase)
        .collect()
}

#[derive(Debug, Default)]
struct CorpusStats {
    doc_count: u64,
    total_len: u64,
    doc_freq: HashMap<String, u64>,
}

/// The deterministic BM25 hash-projection embedder.
#[derive(Debug, Default)]
pub struct Bm25Embedder {
    stats: RwLock<CorpusStats>,
}

impl Bm25Embedder {
    /// An embedder with an empty corpus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit a document to the corpus, updating document frequencies.
    pub fn observe(&self, text: &str) {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return;
        }
        let Ok(mut stats) = self.stats.write() else {
            return;
        };
        stats.doc_count += 1;
        stats.total_len += tokens.len() as u64;
        let mut seen: BTreeMap<&str, ()> = BTreeMap::new();
        for token in &tokens {
            seen.entry(token.as_str()).or_insert(());
        }
        for (token, ()) in seen {
            *stats.doc_freq.entry(token.to_string()).or_insert(0) += 1;
        }
    }

    /// Documents observed so far.
    #[must_use]
    pub fn corpus_size(&self) -> u64 {
        self.stats.read().map(|s| s.doc_count).unwrap_or(0)
    }

    /// Produce the 384-dimension vector for a text, or `None` when the text
    /// tokenises to nothing.
    ///
    /// Pure with respect to corpus state; terms are accumulated in sorted
    /// order so the floating-point result is reproducible.
    #[must_use]
    pub fn generate(&self, text: &str) -> Option<Vec<f32>> {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            return None;
        }
        let mut term_freq: BTreeMap<String, u32> = BTreeMap::new();
        for token in tokens {
            *term_freq.entry(token).or_insert(0) += 1;
        }
        let doc_len: u32 = term_freq.values().sum();

        let stats = self.stats.read().ok()?;
        let n = stats.doc_count as f32;
        let avg_len = if stats.doc_count == 0 {
            doc_len as f32
        } else {
            stats.total_len as f32 / stats.doc_count as f32
        };

        let mut vector = vec![0.0f32; DIMENSIONS];
        for (term, tf) in &term_freq {
            let df = stats.doc_freq.get(term).copied().unwrap_or(0) as f32;
            let idf = ((n - df + 0.5) / (df + 0.5) + 1.0).ln();
            let tf = *tf as f32;
            let weight = idf * (tf * (K1 + 1.0))
                / (tf + K1 * (1.0 - B + B * doc_len as f32 / avg_len.max(1.0)));

            let hash = fnv1a(term);
            let dim = (hash % DIMENSIONS as u64) as usize;
            let sign = if hash >> 63 == 1 { -1.0 } else { 1.0 };
            vector[dim] += sign * weight;
        }

        let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm == 0.0 {
            return None;
        }
        for x in &mut vector {
            *x /= norm;
        }
        Some(vector)
    }
}
