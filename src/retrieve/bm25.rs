//! Lexical retrieval using Okapi BM25.
//!
//! Statistics are rebuilt on every call from the caller-filtered candidate
//! snapshot; there is no persistent global index, so IDF values always
//! reflect exactly the passages the caller is allowed to see, and no
//! cross-request mutable state exists.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use crate::models::{Passage, ScoredPassage};
use crate::store::{PassageFilter, PassageStore};

/// Corpus-wide lexical statistics over one candidate snapshot.
#[derive(Debug)]
pub struct TermIndexStats {
    doc_lengths: HashMap<String, usize>,
    term_freqs: HashMap<String, HashMap<String, usize>>,
    doc_freqs: HashMap<String, usize>,
    avg_doc_length: f64,
    total_docs: usize,
}

impl TermIndexStats {
    /// Build statistics from a candidate set.
    pub fn build(passages: &[Passage]) -> Self {
        let mut doc_lengths = HashMap::new();
        let mut term_freqs: HashMap<String, HashMap<String, usize>> = HashMap::new();
        let mut term_docs: HashMap<String, HashSet<String>> = HashMap::new();

        for passage in passages {
            let tokens = tokenize(&passage.text);
            doc_lengths.insert(passage.id.clone(), tokens.len());

            let mut counts: HashMap<String, usize> = HashMap::new();
            for token in tokens {
                *counts.entry(token).or_default() += 1;
            }
            for term in counts.keys() {
                term_docs
                    .entry(term.clone())
                    .or_default()
                    .insert(passage.id.clone());
            }
            term_freqs.insert(passage.id.clone(), counts);
        }

        let total_docs = passages.len();
        let total_length: usize = doc_lengths.values().sum();
        let avg_doc_length = if total_docs > 0 {
            total_length as f64 / total_docs as f64
        } else {
            1.0
        };

        let doc_freqs = term_docs
            .into_iter()
            .map(|(term, docs)| (term, docs.len()))
            .collect();

        Self {
            doc_lengths,
            term_freqs,
            doc_freqs,
            avg_doc_length,
            total_docs,
        }
    }

    pub fn total_docs(&self) -> usize {
        self.total_docs
    }

    pub fn avg_doc_length(&self) -> f64 {
        self.avg_doc_length
    }

    pub fn doc_length(&self, passage_id: &str) -> usize {
        self.doc_lengths.get(passage_id).copied().unwrap_or(1)
    }

    pub fn doc_freq(&self, term: &str) -> usize {
        self.doc_freqs.get(term).copied().unwrap_or(0)
    }

    pub fn term_freq(&self, passage_id: &str, term: &str) -> usize {
        self.term_freqs
            .get(passage_id)
            .and_then(|counts| counts.get(term))
            .copied()
            .unwrap_or(0)
    }

    /// Standard BM25 IDF: `ln((N - df + 0.5) / (df + 0.5) + 1)`.
    pub fn idf(&self, term: &str) -> f64 {
        let df = self.doc_freq(term) as f64;
        let n = self.total_docs as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }
}

/// Tokenize text into lowercase alphanumeric runs.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// BM25 lexical retriever.
pub struct Bm25Retriever {
    k1: f64,
    b: f64,
}

impl Bm25Retriever {
    pub fn new(k1: f64, b: f64) -> Self {
        Self { k1, b }
    }

    /// Score one passage against the query terms.
    ///
    /// Sums `idf(t) * tf*(k1+1) / (tf + k1*(1 - b + b*len/avgLen))` over
    /// terms with `tf > 0`. Monotonically non-decreasing in term frequency.
    pub fn score(&self, stats: &TermIndexStats, passage_id: &str, query_terms: &[String]) -> f64 {
        let doc_length = stats.doc_length(passage_id) as f64;
        let mut score = 0.0;

        for term in query_terms {
            if stats.doc_freq(term) == 0 {
                continue;
            }
            let tf = stats.term_freq(passage_id, term) as f64;
            if tf == 0.0 {
                continue;
            }
            let numerator = tf * (self.k1 + 1.0);
            let denominator =
                tf + self.k1 * (1.0 - self.b + self.b * (doc_length / stats.avg_doc_length()));
            score += stats.idf(term) * (numerator / denominator);
        }

        score
    }

    /// Rank a candidate set against `query_text`.
    ///
    /// Zero-score passages (no overlapping terms) are excluded. Ties keep
    /// candidate insertion order (stable sort). Ranks are 1-based, assigned
    /// after truncation to `top_k`.
    pub fn rank(
        &self,
        query_text: &str,
        candidates: &[Passage],
        top_k: usize,
    ) -> Vec<ScoredPassage> {
        let query_terms = tokenize(query_text);
        if query_terms.is_empty() || candidates.is_empty() {
            return Vec::new();
        }

        let stats = TermIndexStats::build(candidates);

        let mut scored: Vec<ScoredPassage> = candidates
            .iter()
            .filter_map(|passage| {
                let score = self.score(&stats, &passage.id, &query_terms);
                if score > 0.0 {
                    Some(ScoredPassage {
                        passage_id: passage.id.clone(),
                        document_id: passage.document_id.clone(),
                        content: passage.text.clone(),
                        score,
                        rank: None,
                        tags: passage.tags.clone(),
                    })
                } else {
                    None
                }
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        for (idx, sp) in scored.iter_mut().enumerate() {
            sp.rank = Some(idx as u32 + 1);
        }
        scored
    }

    /// Fetch the filtered candidate snapshot from the store and rank it.
    ///
    /// The store read is retried once; a second failure skips this
    /// retrieval path with a warning instead of propagating.
    pub async fn retrieve(
        &self,
        store: &dyn PassageStore,
        query_text: &str,
        filter: &PassageFilter,
        top_k: usize,
    ) -> Vec<ScoredPassage> {
        let candidates = match store.candidates(filter).await {
            Ok(c) => c,
            Err(first) => {
                warn!(error = %first, "candidate fetch failed, retrying once");
                match store.candidates(filter).await {
                    Ok(c) => c,
                    Err(second) => {
                        warn!(error = %second, "candidate fetch failed twice, skipping lexical retrieval");
                        return Vec::new();
                    }
                }
            }
        };

        self.rank(query_text, &candidates, top_k)
    }
}
