//! Reciprocal Rank Fusion.
//!
//! Merges N independently-ranked result lists by summing `1 / (k + rank)`
//! per list, using each list's own 1-based rank and deliberately ignoring
//! raw scores. This is what lets BM25 and vector rankings compose without
//! renormalization, and it naturally rewards passages that multiple
//! methods agree on.

use std::collections::HashMap;

use crate::models::ScoredPassage;

/// Fuses ranked result lists with reciprocal-rank scoring.
pub struct RankFusion {
    k: u32,
}

impl RankFusion {
    /// `k = 60` is the standard constant.
    pub fn new(k: u32) -> Self {
        Self { k }
    }

    fn rrf_score(&self, rank: u32) -> f64 {
        1.0 / (self.k as f64 + rank as f64)
    }

    /// Fuse `result_sets` into one ranking truncated to `top_k`.
    ///
    /// A passage's fused score accumulates one reciprocal-rank term per
    /// list it appears in; a missing `rank` falls back to the list
    /// position. Ties resolve by first appearance across lists in input
    /// order (stable sort), so fusion is deterministic. A single input
    /// list passes through with identity deduplication only.
    pub fn fuse(&self, result_sets: &[Vec<ScoredPassage>], top_k: usize) -> Vec<ScoredPassage> {
        if result_sets.is_empty() {
            return Vec::new();
        }
        if result_sets.len() == 1 {
            return dedup_first_seen(result_sets, top_k);
        }

        let mut scores: HashMap<(String, String), f64> = HashMap::new();
        let mut order: Vec<ScoredPassage> = Vec::new();

        for results in result_sets {
            for (idx, sp) in results.iter().enumerate() {
                let rank = match sp.rank {
                    Some(r) if r > 0 => r,
                    _ => idx as u32 + 1,
                };
                let key = sp.key();
                if !scores.contains_key(&key) {
                    order.push(sp.clone());
                }
                *scores.entry(key).or_default() += self.rrf_score(rank);
            }
        }

        let mut fused: Vec<ScoredPassage> = order
            .into_iter()
            .map(|sp| {
                let score = scores[&sp.key()];
                ScoredPassage {
                    score,
                    rank: None,
                    ..sp
                }
            })
            .collect();

        fused.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        fused.truncate(top_k);
        for (idx, sp) in fused.iter_mut().enumerate() {
            sp.rank = Some(idx as u32 + 1);
        }
        fused
    }
}

/// Deduplicate by `(document_id, passage_id)` preserving first-seen order
/// across the given result sets, truncated to `top_k`.
///
/// Used instead of fusion when fewer than two non-empty result sets exist
/// or fusion is disabled.
pub fn dedup_first_seen(result_sets: &[Vec<ScoredPassage>], top_k: usize) -> Vec<ScoredPassage> {
    let mut seen: HashMap<(String, String), ()> = HashMap::new();
    let mut ordered: Vec<ScoredPassage> = Vec::new();

    'outer: for results in result_sets {
        for sp in results {
            if seen.insert(sp.key(), ()).is_none() {
                ordered.push(sp.clone());
                if ordered.len() == top_k {
                    break 'outer;
                }
            }
        }
    }

    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::PassageTags;

    fn ranked(passage_id: &str, rank: u32) -> ScoredPassage {
        ScoredPassage {
            passage_id: passage_id.to_string(),
            document_id: "doc1".to_string(),
            content: String::new(),
            score: 0.0,
            rank: Some(rank),
            tags: PassageTags::default(),
        }
    }

    fn list(ids: &[&str]) -> Vec<ScoredPassage> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| ranked(id, i as u32 + 1))
            .collect()
    }

    #[test]
    fn test_symmetric_lists_tie_break_deterministically() {
        // [A,B,C] and [B,A,C] with k=60: A and B both accumulate
        // 1/61 + 1/62; the tie resolves by first appearance, giving A,B,C.
        let fusion = RankFusion::new(60);
        let fused = fusion.fuse(&[list(&["a", "b", "c"]), list(&["b", "a", "c"])], 10);

        let ids: Vec<&str> = fused.iter().map(|f| f.passage_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let expected = 1.0 / 61.0 + 1.0 / 62.0;
        assert!((fused[0].score - expected).abs() < 1e-12);
        assert!((fused[1].score - expected).abs() < 1e-12);
    }

    #[test]
    fn test_cross_method_agreement_beats_single_list() {
        // Present at rank 1 in both lists outranks present at rank 1 in one.
        let fusion = RankFusion::new(60);
        let fused = fusion.fuse(&[list(&["both", "solo"]), list(&["both"])], 10);
        assert_eq!(fused[0].passage_id, "both");
        assert!(fused[0].score > fused[1].score);
    }

    #[test]
    fn test_single_list_passthrough_dedups() {
        let fusion = RankFusion::new(60);
        let mut input = list(&["a", "b"]);
        input.push(ranked("a", 3));
        let fused = fusion.fuse(&[input], 10);
        let ids: Vec<&str> = fused.iter().map(|f| f.passage_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_missing_rank_falls_back_to_position() {
        let fusion = RankFusion::new(60);
        let unranked: Vec<ScoredPassage> = ["a", "b"]
            .iter()
            .map(|id| ScoredPassage {
                rank: None,
                ..ranked(id, 1)
            })
            .collect();
        let fused = fusion.fuse(&[unranked.clone(), unranked], 10);
        assert!((fused[0].score - 2.0 / 61.0).abs() < 1e-12);
        assert!((fused[1].score - 2.0 / 62.0).abs() < 1e-12);
    }

    #[test]
    fn test_truncation_reassigns_ranks() {
        let fusion = RankFusion::new(60);
        let fused = fusion.fuse(&[list(&["a", "b", "c"]), list(&["c", "b", "a"])], 2);
        assert_eq!(fused.len(), 2);
        assert_eq!(fused[0].rank, Some(1));
        assert_eq!(fused[1].rank, Some(2));
    }

    #[test]
    fn test_dedup_first_seen_across_sets() {
        let sets = vec![list(&["a", "b"]), list(&["b", "c", "a", "d"])];
        let deduped = dedup_first_seen(&sets, 3);
        let ids: Vec<&str> = deduped.iter().map(|f| f.passage_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_empty_input() {
        let fusion = RankFusion::new(60);
        assert!(fusion.fuse(&[], 10).is_empty());
        assert!(dedup_first_seen(&[], 10).is_empty());
    }
}
