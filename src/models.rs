//! Core data models used throughout the retrieval pipeline.
//!
//! These types represent the passages, scored results, and query plans that
//! flow through chunking, retrieval, and fusion. [`Passage`] and its
//! embedding are created once during ingestion and consumed read-only here;
//! [`ScoredPassage`] and [`QueryPlan`] are ephemeral, created and discarded
//! within a single query's lifetime.

use serde::Serialize;

/// Tag metadata attached to a passage.
///
/// The `source` tag is typed because scoring and tests depend on it
/// (`"fixed_size"` vs `"semantic"`); everything else callers want to attach
/// goes into the open-ended `extra` map and is carried through untouched.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PassageTags {
    /// Chunking strategy that produced this passage, if known.
    pub source: Option<String>,
    /// Free-form string-keyed metadata, opaque to the pipeline.
    #[serde(skip_serializing_if = "serde_json::Value::is_null")]
    pub extra: serde_json::Value,
}

impl PassageTags {
    /// Tags carrying only a chunking-strategy label.
    pub fn from_source(source: &str) -> Self {
        Self {
            source: Some(source.to_string()),
            extra: serde_json::Value::Null,
        }
    }
}

/// A contiguous slice of a document's text, the unit of retrieval.
#[derive(Debug, Clone)]
pub struct Passage {
    /// Passage UUID.
    pub id: String,
    /// Parent document UUID.
    pub document_id: String,
    /// 0-based position within the document, contiguous per document.
    pub order: i64,
    /// Passage text (non-empty).
    pub text: String,
    /// Byte offset of the passage's window start in the source text.
    pub start_offset: Option<usize>,
    /// Byte offset just past the passage's window end in the source text.
    pub end_offset: Option<usize>,
    /// SHA-256 of `text`, used by callers for embedding staleness detection.
    pub hash: String,
    /// Tag metadata.
    pub tags: PassageTags,
}

/// Dense vector for a passage.
///
/// Exactly one embedding exists per passage at a time, and every vector in a
/// corpus has the same dimensionality.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub passage_id: String,
    pub vector: Vec<f32>,
    pub model_name: String,
}

/// A passage with a retrieval score and (once finalized) a 1-based rank.
///
/// Scores are only comparable within one retriever's output until they have
/// been normalized or rank-fused.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredPassage {
    pub passage_id: String,
    pub document_id: String,
    /// Passage text carried along for answer synthesis downstream.
    pub content: String,
    /// Retriever-specific score (BM25 sum, cosine similarity, fused, ...).
    pub score: f64,
    /// 1-based rank, assigned after truncation to `top_k`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rank: Option<u32>,
    pub tags: PassageTags,
}

impl ScoredPassage {
    /// Identity key used for deduplication and cross-retriever merging.
    pub fn key(&self) -> (String, String) {
        (self.document_id.clone(), self.passage_id.clone())
    }
}

/// One user query expanded into retrieval targets.
#[derive(Debug, Clone, Serialize)]
pub struct QueryPlan {
    /// The original query text, always retrieved first.
    pub primary_text: String,
    /// Distinct alternative phrasings; never contains `primary_text`.
    pub variations: Vec<String>,
    /// Higher-abstraction reformulation, if step-back was requested and
    /// produced something different from the original.
    pub step_back_text: Option<String>,
    /// Multi-query generation failed or produced nothing usable.
    pub multi_query_degraded: bool,
    /// Step-back generation failed or produced nothing usable.
    pub step_back_degraded: bool,
}

impl QueryPlan {
    /// A plan containing only the original query, with no expansion.
    pub fn passthrough(primary_text: &str) -> Self {
        Self {
            primary_text: primary_text.to_string(),
            variations: Vec::new(),
            step_back_text: None,
            multi_query_degraded: false,
            step_back_degraded: false,
        }
    }

    /// All retrieval targets other than the primary query, in order:
    /// variations first, then the step-back query if present.
    pub fn secondary_texts(&self) -> Vec<String> {
        let mut texts = self.variations.clone();
        if let Some(sb) = &self.step_back_text {
            if !texts.iter().any(|t| t == sb) {
                texts.push(sb.clone());
            }
        }
        texts
    }
}
