//! TOML configuration parsing and validation.
//!
//! Every tunable in the pipeline lives in an explicit config struct passed
//! into the owning component's constructor; there is no global settings
//! object. [`load_config`] parses a TOML file and validates ranges up front
//! so components can trust their parameters.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub transform: TransformConfig,
}

/// Chunking parameters shared by both strategies.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// Target passage size in characters.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Requested window overlap in characters; capped at `chunk_size / 2`.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    /// `"fixed_size"` or `"semantic"`.
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Cosine similarity below this marks a semantic boundary.
    #[serde(default = "default_boundary_threshold")]
    pub boundary_threshold: f32,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            strategy: default_strategy(),
            boundary_threshold: default_boundary_threshold(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_strategy() -> String {
    "semantic".to_string()
}
fn default_boundary_threshold() -> f32 {
    0.7
}

/// Retrieval, fusion, and concurrency parameters.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    /// BM25 term-frequency saturation constant.
    #[serde(default = "default_bm25_k1")]
    pub bm25_k1: f64,
    /// BM25 length-normalization constant.
    #[serde(default = "default_bm25_b")]
    pub bm25_b: f64,
    /// Weight of the normalized vector score in hybrid merging.
    #[serde(default = "default_half")]
    pub vector_weight: f64,
    /// Weight of the normalized BM25 score in hybrid merging.
    #[serde(default = "default_half")]
    pub bm25_weight: f64,
    /// Reciprocal Rank Fusion constant.
    #[serde(default = "default_rrf_k")]
    pub rrf_k: u32,
    /// Apply RRF when primary and variation result sets both exist.
    #[serde(default = "default_true")]
    pub use_fusion: bool,
    /// Maximum concurrent per-variation retrievals.
    #[serde(default = "default_fan_out_limit")]
    pub fan_out_limit: usize,
    /// Deadline for the variation retrieval phase, in milliseconds.
    /// Pending variations are cancelled and omitted when it elapses.
    #[serde(default)]
    pub variation_timeout_ms: Option<u64>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            bm25_k1: default_bm25_k1(),
            bm25_b: default_bm25_b(),
            vector_weight: default_half(),
            bm25_weight: default_half(),
            rrf_k: default_rrf_k(),
            use_fusion: true,
            fan_out_limit: default_fan_out_limit(),
            variation_timeout_ms: None,
        }
    }
}

fn default_bm25_k1() -> f64 {
    1.5
}
fn default_bm25_b() -> f64 {
    0.75
}
fn default_half() -> f64 {
    0.5
}
fn default_rrf_k() -> u32 {
    60
}
fn default_true() -> bool {
    true
}
fn default_fan_out_limit() -> usize {
    4
}

/// Query transformation parameters.
#[derive(Debug, Deserialize, Clone)]
pub struct TransformConfig {
    /// Number of alternative phrasings multi-query expansion produces.
    #[serde(default = "default_multi_query_count")]
    pub multi_query_count: usize,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            multi_query_count: default_multi_query_count(),
        }
    }
}

fn default_multi_query_count() -> usize {
    3
}

/// Load and validate a TOML config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

/// Validate parameter ranges. Exposed so in-code configs get the same checks.
pub fn validate(config: &Config) -> Result<()> {
    if config.chunking.chunk_size == 0 {
        anyhow::bail!("chunking.chunk_size must be > 0");
    }

    match config.chunking.strategy.as_str() {
        "fixed_size" | "semantic" => {}
        other => anyhow::bail!(
            "Unknown chunking strategy: '{}'. Must be fixed_size or semantic.",
            other
        ),
    }

    if !(0.0..=1.0).contains(&config.chunking.boundary_threshold) {
        anyhow::bail!("chunking.boundary_threshold must be in [0.0, 1.0]");
    }

    if !(0.0..=1.0).contains(&config.retrieval.vector_weight) {
        anyhow::bail!("retrieval.vector_weight must be in [0.0, 1.0]");
    }

    if !(0.0..=1.0).contains(&config.retrieval.bm25_weight) {
        anyhow::bail!("retrieval.bm25_weight must be in [0.0, 1.0]");
    }

    if config.retrieval.bm25_k1 < 0.0 {
        anyhow::bail!("retrieval.bm25_k1 must be >= 0.0");
    }

    if !(0.0..=1.0).contains(&config.retrieval.bm25_b) {
        anyhow::bail!("retrieval.bm25_b must be in [0.0, 1.0]");
    }

    if config.retrieval.fan_out_limit == 0 {
        anyhow::bail!("retrieval.fan_out_limit must be >= 1");
    }

    if config.transform.multi_query_count == 0 {
        anyhow::bail!("transform.multi_query_count must be >= 1");
    }

    Ok(())
}
