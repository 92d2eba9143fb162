//! In-memory [`PassageStore`] implementation for tests and small corpora.
//!
//! Uses `Vec` behind `std::sync::RwLock` for thread safety. Nearest-neighbor
//! search is brute-force cosine distance over all stored vectors.

use std::sync::RwLock;

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_distance;
use crate::models::Passage;

use super::{PassageFilter, PassageStore};

struct StoredPassage {
    passage: Passage,
    user_id: Option<String>,
    group_id: Option<String>,
    vector: Option<Vec<f32>>,
}

/// In-memory store backing unit and integration tests.
pub struct InMemoryPassageStore {
    passages: RwLock<Vec<StoredPassage>>,
}

impl InMemoryPassageStore {
    pub fn new() -> Self {
        Self {
            passages: RwLock::new(Vec::new()),
        }
    }

    /// Add a passage with an optional embedding vector and ownership scope.
    pub fn add(
        &self,
        passage: Passage,
        vector: Option<Vec<f32>>,
        user_id: Option<&str>,
        group_id: Option<&str>,
    ) {
        let mut guard = self.passages.write().unwrap();
        guard.push(StoredPassage {
            passage,
            user_id: user_id.map(str::to_string),
            group_id: group_id.map(str::to_string),
            vector,
        });
    }

    /// Add a document's passages with matching vectors, unscoped.
    pub fn add_document(&self, passages: Vec<Passage>, vectors: Vec<Vec<f32>>) {
        for (p, v) in passages.into_iter().zip(vectors.into_iter()) {
            self.add(p, Some(v), None, None);
        }
    }

    fn visible(stored: &StoredPassage, filter: &PassageFilter) -> bool {
        if let Some(user) = &filter.user_id {
            if stored.user_id.as_deref() != Some(user.as_str()) {
                return false;
            }
        }
        if let Some(group) = &filter.group_id {
            if stored.group_id.as_deref() != Some(group.as_str()) {
                return false;
            }
        }
        true
    }
}

impl Default for InMemoryPassageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PassageStore for InMemoryPassageStore {
    async fn candidates(&self, filter: &PassageFilter) -> Result<Vec<Passage>> {
        let guard = self.passages.read().unwrap();
        Ok(guard
            .iter()
            .filter(|sp| Self::visible(sp, filter))
            .map(|sp| sp.passage.clone())
            .collect())
    }

    async fn nearest(
        &self,
        query_vec: &[f32],
        top_k: usize,
        filter: &PassageFilter,
    ) -> Result<Vec<(Passage, f32)>> {
        let guard = self.passages.read().unwrap();
        let mut scored: Vec<(Passage, f32)> = guard
            .iter()
            .filter(|sp| Self::visible(sp, filter))
            .filter_map(|sp| {
                sp.vector
                    .as_ref()
                    .map(|v| (sp.passage.clone(), cosine_distance(query_vec, v)))
            })
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }
}
