//! Passage storage abstraction.
//!
//! The [`PassageStore`] trait defines the two read operations the retrieval
//! pipeline needs: the full filtered candidate set (for lexical scoring,
//! where corpus statistics must only reflect passages the caller may see)
//! and a top-k nearest-neighbor query by cosine distance (for vector
//! scoring). Implementations must be `Send + Sync` to work with async
//! runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::Passage;

/// Caller-supplied visibility filter applied to every store read.
///
/// BM25 statistics are built from the filtered set, never a global corpus,
/// so IDF values cannot be biased by inaccessible documents.
#[derive(Debug, Clone, Default)]
pub struct PassageFilter {
    /// Restrict to passages whose document belongs to this user.
    pub user_id: Option<String>,
    /// Restrict to passages whose document belongs to this group.
    pub group_id: Option<String>,
}

impl PassageFilter {
    pub fn for_user(user_id: &str) -> Self {
        Self {
            user_id: Some(user_id.to_string()),
            group_id: None,
        }
    }
}

/// Abstract read-only passage backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`candidates`](PassageStore::candidates) | Full filtered candidate set for lexical scoring |
/// | [`nearest`](PassageStore::nearest) | Top-k nearest neighbors by cosine distance |
#[async_trait]
pub trait PassageStore: Send + Sync {
    /// Return every passage visible under `filter`, in insertion order.
    async fn candidates(&self, filter: &PassageFilter) -> Result<Vec<Passage>>;

    /// Return up to `top_k` passages nearest to `query_vec`, as
    /// `(passage, cosine_distance)` pairs ordered by ascending distance.
    async fn nearest(
        &self,
        query_vec: &[f32],
        top_k: usize,
        filter: &PassageFilter,
    ) -> Result<Vec<(Passage, f32)>>;
}
