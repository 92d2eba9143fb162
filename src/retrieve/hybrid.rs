//! Hybrid retrieval: weighted combination of BM25 and vector scores.
//!
//! # Algorithm
//!
//! 1. Fetch `2 × top_k` candidates from the lexical and vector retrievers
//!    (over-fetch improves fusion recall). The two legs are independent
//!    and run concurrently.
//! 2. Min-max normalize each leg's scores to `[0, 1]` independently.
//! 3. Build the union keyed by `(document_id, passage_id)`; a passage
//!    absent from one leg contributes `0.0` for that leg.
//! 4. Combine: `score = vector_weight × norm_vector + bm25_weight × norm_bm25`.
//! 5. Sort descending (stable), truncate to `top_k`, assign ranks 1..k.

use std::collections::HashMap;

use crate::models::ScoredPassage;
use crate::retrieve::bm25::Bm25Retriever;
use crate::retrieve::vector::VectorRetriever;
use crate::store::{PassageFilter, PassageStore};

/// Combines lexical and vector retrieval into one ranking.
pub struct HybridRetriever {
    bm25: Bm25Retriever,
    vector: VectorRetriever,
    vector_weight: f64,
    bm25_weight: f64,
}

impl HybridRetriever {
    pub fn new(bm25: Bm25Retriever, vector: VectorRetriever, vector_weight: f64, bm25_weight: f64) -> Self {
        Self {
            bm25,
            vector,
            vector_weight,
            bm25_weight,
        }
    }

    /// Retrieve `top_k` passages for `query_text`.
    ///
    /// `query_vec` is the pre-computed query embedding; when `None` (the
    /// embedding backend degraded) the vector leg is skipped and the
    /// ranking falls back to normalized BM25 alone.
    pub async fn retrieve(
        &self,
        store: &dyn PassageStore,
        query_text: &str,
        query_vec: Option<&[f32]>,
        filter: &PassageFilter,
        top_k: usize,
    ) -> Vec<ScoredPassage> {
        let fetch_k = top_k * 2;

        let (bm25_results, vector_results) = match query_vec {
            Some(qv) => {
                tokio::join!(
                    self.bm25.retrieve(store, query_text, filter, fetch_k),
                    self.vector.retrieve(store, qv, filter, fetch_k),
                )
            }
            None => (
                self.bm25.retrieve(store, query_text, filter, fetch_k).await,
                Vec::new(),
            ),
        };

        merge_weighted(
            &vector_results,
            &bm25_results,
            self.vector_weight,
            self.bm25_weight,
            top_k,
        )
    }
}

/// Min-max normalize raw scores to `[0.0, 1.0]`.
///
/// A uniform non-empty score set (including a single element) normalizes
/// to `1.0` everywhere, treating it as uniformly maximal.
pub fn normalize_scores(scores: &[f64]) -> Vec<f64> {
    if scores.is_empty() {
        return Vec::new();
    }

    let s_min = scores.iter().copied().fold(f64::INFINITY, f64::min);
    let s_max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    scores
        .iter()
        .map(|&s| {
            if (s_max - s_min).abs() < f64::EPSILON {
                1.0
            } else {
                (s - s_min) / (s_max - s_min)
            }
        })
        .collect()
}

/// Merge two normalized result sets with a weighted sum.
///
/// Union order is vector results first, then BM25-only passages, so ties
/// resolve deterministically regardless of map iteration order. Content is
/// taken from the vector result when a passage appears in both.
pub fn merge_weighted(
    vector_results: &[ScoredPassage],
    bm25_results: &[ScoredPassage],
    vector_weight: f64,
    bm25_weight: f64,
    top_k: usize,
) -> Vec<ScoredPassage> {
    let vector_norm = normalize_scores(&vector_results.iter().map(|r| r.score).collect::<Vec<_>>());
    let bm25_norm = normalize_scores(&bm25_results.iter().map(|r| r.score).collect::<Vec<_>>());

    let vector_map: HashMap<(String, String), f64> = vector_results
        .iter()
        .zip(vector_norm.iter())
        .map(|(r, &s)| (r.key(), s))
        .collect();
    let bm25_map: HashMap<(String, String), f64> = bm25_results
        .iter()
        .zip(bm25_norm.iter())
        .map(|(r, &s)| (r.key(), s))
        .collect();

    let mut seen: HashMap<(String, String), ()> = HashMap::new();
    let mut combined: Vec<ScoredPassage> = Vec::new();

    for source in [vector_results, bm25_results] {
        for result in source {
            let key = result.key();
            if seen.insert(key.clone(), ()).is_some() {
                continue;
            }
            let v = vector_map.get(&key).copied().unwrap_or(0.0);
            let b = bm25_map.get(&key).copied().unwrap_or(0.0);
            combined.push(ScoredPassage {
                passage_id: result.passage_id.clone(),
                document_id: result.document_id.clone(),
                content: result.content.clone(),
                score: vector_weight * v + bm25_weight * b,
                rank: None,
                tags: result.tags.clone(),
            });
        }
    }

    combined.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    combined.truncate(top_k);
    for (idx, sp) in combined.iter_mut().enumerate() {
        sp.rank = Some(idx as u32 + 1);
    }
    combined
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PassageTags;

    fn scored(passage_id: &str, score: f64) -> ScoredPassage {
        ScoredPassage {
            passage_id: passage_id.to_string(),
            document_id: "doc1".to_string(),
            content: format!("content of {passage_id}"),
            score,
            rank: None,
            tags: PassageTags::default(),
        }
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_scores(&[]).is_empty());
    }

    #[test]
    fn test_normalize_extremes_map_to_unit_interval() {
        let norm = normalize_scores(&[10.0, 5.0, 0.0]);
        assert!((norm[0] - 1.0).abs() < 1e-9);
        assert!((norm[1] - 0.5).abs() < 1e-9);
        assert!((norm[2] - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalize_uniform_set_is_all_ones() {
        for score in &normalize_scores(&[3.0, 3.0, 3.0]) {
            assert!((score - 1.0).abs() < 1e-9);
        }
        let single = normalize_scores(&[42.0]);
        assert!((single[0] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_merge_weighted_tie_scenario() {
        // Lexical {X:5, Y:3}, vector {Y:0.9, Z:0.4}, weights 0.5/0.5:
        // normalized lexical {X:1, Y:0}, vector {Y:1, Z:0},
        // combined {X:0.5, Y:0.5, Z:0.0} -> X and Y tie ahead of Z.
        let bm25 = vec![scored("x", 5.0), scored("y", 3.0)];
        let vector = vec![scored("y", 0.9), scored("z", 0.4)];

        let merged = merge_weighted(&vector, &bm25, 0.5, 0.5, 10);
        assert_eq!(merged.len(), 3);

        let score_of = |id: &str| merged.iter().find(|m| m.passage_id == id).unwrap().score;
        assert!((score_of("x") - 0.5).abs() < 1e-9);
        assert!((score_of("y") - 0.5).abs() < 1e-9);
        assert!((score_of("z") - 0.0).abs() < 1e-9);
        assert_eq!(merged[2].passage_id, "z");
    }

    #[test]
    fn test_merge_missing_side_contributes_zero() {
        let bm25 = vec![scored("only-lexical", 7.0)];
        let merged = merge_weighted(&[], &bm25, 0.5, 0.5, 10);
        assert_eq!(merged.len(), 1);
        // Single-element lexical set normalizes to 1.0, vector side is 0.
        assert!((merged[0].score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_merge_truncates_and_ranks() {
        let bm25 = vec![scored("a", 3.0), scored("b", 2.0), scored("c", 1.0)];
        let merged = merge_weighted(&[], &bm25, 0.0, 1.0, 2);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].rank, Some(1));
        assert_eq!(merged[1].rank, Some(2));
        assert_eq!(merged[0].passage_id, "a");
    }

    #[test]
    fn test_merge_prefers_vector_content_for_shared_passages() {
        let mut from_vector = scored("shared", 0.9);
        from_vector.content = "vector copy".to_string();
        let mut from_bm25 = scored("shared", 4.0);
        from_bm25.content = "lexical copy".to_string();

        let merged = merge_weighted(&[from_vector], &[from_bm25], 0.5, 0.5, 10);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].content, "vector copy");
    }
}
