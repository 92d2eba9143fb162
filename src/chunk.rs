//! Document text chunker.
//!
//! Splits raw document text into ordered [`Passage`]s using one of two
//! strategies:
//!
//! - **Fixed-size**: a sliding character window of `chunk_size` with
//!   `overlap = min(chunk_overlap, chunk_size / 2)`; trailing partial
//!   windows are kept if non-empty after trimming.
//! - **Semantic**: sentences are grouped into small segments, each segment
//!   is embedded, and a cosine similarity below `boundary_threshold`
//!   between consecutive segments marks a chunk boundary. Segments are
//!   accumulated greedily up to `2 × chunk_size`, with the last segment of
//!   a closed chunk carried forward as one-segment overlap.
//!
//! Chunking never fails: if the embedding backend is unavailable or the
//! text has too little sentence structure, the semantic strategy falls
//! back to fixed-size, and the [`ChunkOutcome`] records which strategy
//! actually ran so callers and tests can observe the degradation.
//!
//! Each passage receives a UUID plus a SHA-256 hash of its text for
//! staleness detection in the embedding pipeline.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

use crate::config::ChunkingConfig;
use crate::embedding::{cosine_similarity, Embedder};
use crate::models::{Passage, PassageTags};

/// Chunking strategy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    FixedSize,
    Semantic,
}

/// Result of a chunking call.
///
/// `strategy_used` may differ from the configured strategy when the
/// semantic path degraded to fixed-size.
#[derive(Debug)]
pub struct ChunkOutcome {
    pub passages: Vec<Passage>,
    pub strategy_used: ChunkStrategy,
}

/// A sentence group compared against its neighbors during semantic chunking.
struct Segment {
    start: usize,
    end: usize,
    text: String,
}

/// Splits document text into ordered passages.
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
    strategy: ChunkStrategy,
    boundary_threshold: f32,
    embedder: Option<Arc<dyn Embedder>>,
}

impl Chunker {
    /// Create a fixed-size-only chunker.
    pub fn new(config: &ChunkingConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            strategy: ChunkStrategy::FixedSize,
            boundary_threshold: config.boundary_threshold,
            embedder: None,
        }
    }

    /// Create a chunker with an embedding backend for semantic chunking.
    ///
    /// The configured strategy still decides whether semantic chunking is
    /// attempted; without an embedder it degrades to fixed-size.
    pub fn with_embedder(config: &ChunkingConfig, embedder: Arc<dyn Embedder>) -> Self {
        let strategy = match config.strategy.as_str() {
            "semantic" => ChunkStrategy::Semantic,
            _ => ChunkStrategy::FixedSize,
        };
        Self {
            chunk_size: config.chunk_size,
            chunk_overlap: config.chunk_overlap,
            strategy,
            boundary_threshold: config.boundary_threshold,
            embedder: Some(embedder),
        }
    }

    /// Split `text` into ordered passages for `document_id`.
    ///
    /// Empty input returns an empty passage list. This call never fails;
    /// semantic chunking degrades to fixed-size when it cannot run.
    pub async fn chunk(&self, text: &str, document_id: &str) -> ChunkOutcome {
        if text.is_empty() {
            return ChunkOutcome {
                passages: Vec::new(),
                strategy_used: ChunkStrategy::FixedSize,
            };
        }

        if self.strategy == ChunkStrategy::Semantic {
            if let Some(embedder) = &self.embedder {
                if let Some(passages) = self.semantic_chunk(text, document_id, embedder).await {
                    return ChunkOutcome {
                        passages,
                        strategy_used: ChunkStrategy::Semantic,
                    };
                }
            }
        }

        ChunkOutcome {
            passages: self.fixed_size_chunk(text, document_id),
            strategy_used: ChunkStrategy::FixedSize,
        }
    }

    /// Sliding-window chunking over character positions.
    ///
    /// Offsets recorded on each passage are the byte range of the untrimmed
    /// window, so slicing the source text by them reconstructs exactly the
    /// covered regions (overlaps repeat, nothing is dropped).
    fn fixed_size_chunk(&self, text: &str, document_id: &str) -> Vec<Passage> {
        // Byte offset of every char boundary, plus the end of the text.
        let mut bounds: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        bounds.push(text.len());
        let n_chars = bounds.len() - 1;

        let overlap = self.chunk_overlap.min(self.chunk_size / 2);
        let mut passages = Vec::new();
        let mut start = 0usize;
        let mut order: i64 = 0;

        while start < n_chars {
            let end = (start + self.chunk_size).min(n_chars);
            let window_start = bounds[start];
            let window_end = bounds[end];
            let window = &text[window_start..window_end];
            let trimmed = window.trim();
            if !trimmed.is_empty() {
                passages.push(make_passage(
                    document_id,
                    order,
                    trimmed,
                    Some(window_start),
                    Some(window_end),
                    "fixed_size",
                ));
                order += 1;
            }
            if end >= n_chars {
                break;
            }
            start = end.saturating_sub(overlap);
        }

        passages
    }

    /// Boundary-detection chunking over segment embeddings.
    ///
    /// Returns `None` when the text or the embedding backend cannot support
    /// the semantic path, signalling the caller to fall back to fixed-size.
    async fn semantic_chunk(
        &self,
        text: &str,
        document_id: &str,
        embedder: &Arc<dyn Embedder>,
    ) -> Option<Vec<Passage>> {
        let sentences = split_sentences(text);
        if sentences.len() < 2 {
            return None;
        }

        let segments = build_segments(text, &sentences, self.chunk_size);
        if segments.len() < 2 {
            return None;
        }

        let segment_texts: Vec<String> = segments.iter().map(|s| s.text.clone()).collect();
        let embeddings = match embed_batch_with_retry(embedder.as_ref(), &segment_texts).await {
            Ok(vectors) => vectors,
            Err(err) => {
                warn!(document_id, error = %err, "embedding unavailable, falling back to fixed-size chunking");
                return None;
            }
        };
        if embeddings.len() != segments.len() {
            warn!(document_id, "embedding batch length mismatch, falling back to fixed-size chunking");
            return None;
        }

        let boundaries = find_boundaries(&embeddings, self.boundary_threshold);
        Some(self.group_segments(&segments, &boundaries, document_id))
    }

    /// Greedily accumulate segments into passages.
    ///
    /// A new passage starts at every semantic boundary or when the
    /// accumulated length would exceed `2 × chunk_size`. Accumulations
    /// shorter than `chunk_size / 2` are not emitted; their segments fold
    /// into the following passage by continuing accumulation. Short
    /// trailing content is emitted only if nothing has been emitted yet,
    /// so non-empty input always yields at least one passage.
    fn group_segments(
        &self,
        segments: &[Segment],
        boundaries: &[usize],
        document_id: &str,
    ) -> Vec<Passage> {
        let min_size = self.chunk_size / 2;
        let max_size = self.chunk_size * 2;

        let mut passages = Vec::new();
        let mut order: i64 = 0;
        let mut current: Vec<usize> = Vec::new();

        for (i, segment) in segments.iter().enumerate() {
            let accumulated: usize = current.iter().map(|&j| segments[j].text.len()).sum();
            let should_split = boundaries.contains(&i)
                || (!current.is_empty() && accumulated + segment.text.len() > max_size);

            if should_split && !current.is_empty() {
                let chunk_text = join_segments(segments, &current);
                if chunk_text.len() >= min_size {
                    passages.push(segment_passage(segments, &current, &chunk_text, document_id, order));
                    order += 1;
                    // Carry the last segment forward as one-segment overlap.
                    let overlap = *current.last().unwrap();
                    current = vec![overlap, i];
                } else {
                    current.push(i);
                }
            } else {
                current.push(i);
            }
        }

        if !current.is_empty() {
            let chunk_text = join_segments(segments, &current);
            if chunk_text.len() >= min_size || passages.is_empty() {
                passages.push(segment_passage(segments, &current, &chunk_text, document_id, order));
            }
            // Otherwise short trailing content is dropped rather than merged.
        }

        passages
    }
}

/// Split text into sentences.
///
/// A sentence ends at `.`, `!`, or `?` followed by whitespace and an ASCII
/// capital letter, or at the end of the text. Abbreviation-style periods
/// ("3.5", "e.g.x") do not split because no capital follows.
fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut sentences = Vec::new();
    let mut sent_start = 0usize;

    let mut k = 0;
    while k < chars.len() {
        let (_, c) = chars[k];
        if c == '.' || c == '!' || c == '?' {
            // Scan past any whitespace run after the terminator.
            let mut m = k + 1;
            while m < chars.len() && chars[m].1.is_whitespace() {
                m += 1;
            }
            let punct_end = if k + 1 < chars.len() {
                chars[k + 1].0
            } else {
                text.len()
            };
            if m >= chars.len() {
                // Terminator at end of text (possibly trailing whitespace).
                push_sentence(&mut sentences, &text[sent_start..punct_end]);
                sent_start = text.len();
                k = m;
                continue;
            }
            if m > k + 1 && chars[m].1.is_ascii_uppercase() {
                push_sentence(&mut sentences, &text[sent_start..punct_end]);
                sent_start = chars[m].0;
                k = m;
                continue;
            }
        }
        k += 1;
    }

    if sent_start < text.len() {
        push_sentence(&mut sentences, &text[sent_start..]);
    }

    sentences
}

fn push_sentence(sentences: &mut Vec<String>, raw: &str) {
    let trimmed = raw.trim();
    if !trimmed.is_empty() {
        sentences.push(trimmed.to_string());
    }
}

/// Group sentences into segments of `max(2, chunk_size / 500)` sentences,
/// recording each segment's offset in the original text.
fn build_segments(text: &str, sentences: &[String], chunk_size: usize) -> Vec<Segment> {
    let segment_size = (chunk_size / 500).max(2);
    let mut segments = Vec::new();
    let mut current_pos = 0usize;

    for group in sentences.chunks(segment_size) {
        let segment_text = group.join(" ");
        let start = text[current_pos..]
            .find(group[0].as_str())
            .map(|i| current_pos + i)
            .unwrap_or(current_pos);
        let end = start + segment_text.len();
        current_pos = end.min(text.len());
        segments.push(Segment {
            start,
            end,
            text: segment_text,
        });
    }

    segments
}

/// Indices where a new chunk should start: index 0, plus every segment
/// whose similarity to its predecessor falls below `threshold`.
fn find_boundaries(embeddings: &[Vec<f32>], threshold: f32) -> Vec<usize> {
    let mut boundaries = vec![0];
    for i in 0..embeddings.len().saturating_sub(1) {
        if cosine_similarity(&embeddings[i], &embeddings[i + 1]) < threshold {
            boundaries.push(i + 1);
        }
    }
    boundaries
}

async fn embed_batch_with_retry(
    embedder: &dyn Embedder,
    texts: &[String],
) -> anyhow::Result<Vec<Vec<f32>>> {
    match embedder.embed_batch(texts).await {
        Ok(vectors) => Ok(vectors),
        Err(first) => {
            warn!(error = %first, "embed_batch failed, retrying once");
            embedder.embed_batch(texts).await
        }
    }
}

fn join_segments(segments: &[Segment], indices: &[usize]) -> String {
    indices
        .iter()
        .map(|&i| segments[i].text.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

fn segment_passage(
    segments: &[Segment],
    indices: &[usize],
    chunk_text: &str,
    document_id: &str,
    order: i64,
) -> Passage {
    let start = segments[indices[0]].start;
    let end = segments[*indices.last().unwrap()].end;
    make_passage(
        document_id,
        order,
        chunk_text.trim(),
        Some(start),
        Some(end),
        "semantic",
    )
}

/// Create a single [`Passage`] with a UUID and SHA-256 content hash.
fn make_passage(
    document_id: &str,
    order: i64,
    text: &str,
    start_offset: Option<usize>,
    end_offset: Option<usize>,
    source: &str,
) -> Passage {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Passage {
        id: Uuid::new_v4().to_string(),
        document_id: document_id.to_string(),
        order,
        text: text.to_string(),
        start_offset,
        end_offset,
        hash,
        tags: PassageTags::from_source(source),
    }
}
