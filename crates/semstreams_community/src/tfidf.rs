//! TF-IDF keyword extraction.
//!
//! Community summaries weight terms by `tfidf(term, member) ×
//! pagerank(member)`. The IDF model is fitted over all member documents at a
//! hierarchy level, so keywords discriminate between communities rather
//! than describing the whole corpus.

use std::collections::{BTreeMap, HashMap};

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 2)
        .map(str::to_lowercase)
        .collect()
}

/// Document-frequency model over one hierarchy level.
#[derive(Debug, Default)]
pub struct TfIdfModel {
    doc_count: usize,
    doc_freq: HashMap<String, usize>,
}

impl TfIdfModel {
    /// Fit the model over member documents.
    #[must_use]
    pub fn fit<'a, I: IntoIterator<Item = &'a str>>(documents: I) -> Self {
        let mut doc_count = 0;
        let mut doc_freq: HashMap<String, usize> = HashMap::new();
        for document in documents {
            let tokens = tokenize(document);
            if tokens.is_empty() {
                continue;
            }
            doc_count += 1;
            let mut seen: Vec<&String> = tokens.iter().collect();
            seen.sort();
            seen.dedup();
            for token in seen {
                *doc_freq.entry(token.clone()).or_insert(0) += 1;
            }
        }
        Self {
            doc_count,
            doc_freq,
        }
    }

    /// Documents the model was fitted on.
    #[must_use]
    pub fn doc_count(&self) -> usize {
        self.doc_count
    }

    /// TF-IDF score for a term with `tf` occurrences in a document of
    /// `doc_len` tokens.
    #[must_use]
    pub fn score(&self, term: &str, tf: usize, doc_len: usize) -> f64 {
        if doc_len == 0 {
            return 0.0;
        }
        let df = self.doc_freq.get(term).copied().unwrap_or(0) as f64;
        let idf = ((1.0 + self.doc_count as f64) / (1.0 + df)).ln() + 1.0;
        (tf as f64 / doc_len as f64) * idf
    }
}

/// Top keywords for one community.
///
/// `documents` pairs each member ID with its extracted text; `ranks` holds
/// the member PageRank scores. Terms accumulate
/// `tfidf(term, member) × rank(member)` and the strongest `top_k` are
/// returned with their scores, strongest first (ties resolved
/// alphabetically for determinism).
#[must_use]
pub fn community_keywords(
    model: &TfIdfModel,
    documents: &[(String, String)],
    ranks: &BTreeMap<String, f64>,
    top_k: usize,
) -> Vec<(String, f64)> {
    let mut scores: BTreeMap<String, f64> = BTreeMap::new();
    for (member, text) in documents {
        let tokens = tokenize(text);
        if tokens.is_empty() {
            continue;
        }
        let doc_len = tokens.len();
        let mut term_freq: BTreeMap<String, usize> = BTreeMap::new();
        for token in tokens {
            *term_freq.entry(token).or_insert(0) += 1;
        }
        let rank = ranks.get(member).copied().unwrap_or(0.0);
        for (term, tf) in term_freq {
            *scores.entry(term).or_insert(0.0) += model.score(&term, tf, doc_len) * rank;
        }
    }
    let mut ranked: Vec<(String, f64)> = scores.into_iter().collect();
    ranked.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    ranked.truncate(top_k);
    ranked
}
