//! Dense vector retrieval.
//!
//! Delegates the similarity search to the [`PassageStore`]'s
//! nearest-neighbor query, which returns `(passage, cosine_distance)`
//! pairs ordered by ascending distance. Scores are flipped to
//! `1 - distance` so that higher is better, matching the orientation of
//! every other retriever.

use tracing::warn;

use crate::models::ScoredPassage;
use crate::store::{PassageFilter, PassageStore};

/// Vector similarity retriever.
pub struct VectorRetriever;

impl VectorRetriever {
    pub fn new() -> Self {
        Self
    }

    /// Retrieve the `top_k` nearest passages to `query_vec`.
    ///
    /// The store read is retried once; a second failure skips this
    /// retrieval path with a warning instead of propagating. Ranks are
    /// 1-based in result order.
    pub async fn retrieve(
        &self,
        store: &dyn PassageStore,
        query_vec: &[f32],
        filter: &PassageFilter,
        top_k: usize,
    ) -> Vec<ScoredPassage> {
        let matches = match store.nearest(query_vec, top_k, filter).await {
            Ok(m) => m,
            Err(first) => {
                warn!(error = %first, "nearest-neighbor search failed, retrying once");
                match store.nearest(query_vec, top_k, filter).await {
                    Ok(m) => m,
                    Err(second) => {
                        warn!(error = %second, "nearest-neighbor search failed twice, skipping vector retrieval");
                        return Vec::new();
                    }
                }
            }
        };

        matches
            .into_iter()
            .enumerate()
            .map(|(idx, (passage, distance))| ScoredPassage {
                passage_id: passage.id,
                document_id: passage.document_id,
                content: passage.text,
                score: 1.0 - distance as f64,
                rank: Some(idx as u32 + 1),
                tags: passage.tags,
            })
            .collect()
    }
}

impl Default for VectorRetriever {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Passage, PassageTags};
    use crate::store::memory::InMemoryPassageStore;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_passage(id: &str, text: &str) -> Passage {
        Passage {
            id: id.to_string(),
            document_id: "doc1".to_string(),
            order: 0,
            text: text.to_string(),
            start_offset: None,
            end_offset: None,
            hash: String::new(),
            tags: PassageTags::default(),
        }
    }

    #[tokio::test]
    async fn test_scores_flip_distance_and_rank_in_order() {
        let store = InMemoryPassageStore::new();
        store.add(make_passage("p1", "a"), Some(vec![1.0, 0.0]), None, None);
        store.add(make_passage("p2", "b"), Some(vec![0.0, 1.0]), None, None);

        let retriever = VectorRetriever::new();
        let results = retriever
            .retrieve(&store, &[1.0, 0.0], &PassageFilter::default(), 5)
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].passage_id, "p1");
        assert!((results[0].score - 1.0).abs() < 1e-6);
        assert_eq!(results[0].rank, Some(1));
        assert!((results[1].score - 0.0).abs() < 1e-6);
        assert_eq!(results[1].rank, Some(2));
    }

    /// Store whose first call fails, to exercise the single retry.
    struct FlakyStore {
        inner: InMemoryPassageStore,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl PassageStore for FlakyStore {
        async fn candidates(&self, filter: &PassageFilter) -> Result<Vec<Passage>> {
            self.inner.candidates(filter).await
        }

        async fn nearest(
            &self,
            query_vec: &[f32],
            top_k: usize,
            filter: &PassageFilter,
        ) -> Result<Vec<(Passage, f32)>> {
            if self.failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                if n > 0 {
                    Some(n - 1)
                } else {
                    None
                }
            }).is_ok()
            {
                anyhow::bail!("transient backend error");
            }
            self.inner.nearest(query_vec, top_k, filter).await
        }
    }

    #[tokio::test]
    async fn test_retries_once_then_succeeds() {
        let inner = InMemoryPassageStore::new();
        inner.add(make_passage("p1", "a"), Some(vec![1.0]), None, None);
        let store = FlakyStore {
            inner,
            failures: AtomicUsize::new(1),
        };

        let retriever = VectorRetriever::new();
        let results = retriever
            .retrieve(&store, &[1.0], &PassageFilter::default(), 5)
            .await;
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_two_failures_yield_empty_not_error() {
        let store = FlakyStore {
            inner: InMemoryPassageStore::new(),
            failures: AtomicUsize::new(2),
        };

        let retriever = VectorRetriever::new();
        let results = retriever
            .retrieve(&store, &[1.0], &PassageFilter::default(), 5)
            .await;
        assert!(results.is_empty());
    }
}
