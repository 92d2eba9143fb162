//! # ragpipe
//!
//! Retrieval pipeline core: chunking, hybrid BM25 + vector retrieval,
//! query transformation, and rank fusion over pluggable backends.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌────────────────┐   ┌─────────────┐
//! │  Chunker  │──▶│  PassageStore  │◀──│  Retrieval   │
//! │ fixed/sem │   │ (trait + mem)  │   │ bm25/vector │
//! └───────────┘   └────────────────┘   └──────┬──────┘
//!                                             │
//!                  ┌──────────────┐    ┌──────▼──────┐
//!                  │ Transformer  │───▶│ Orchestrator │
//!                  │ multi/step   │    │ hybrid + RRF │
//!                  └──────────────┘    └─────────────┘
//! ```
//!
//! The crate is backend-agnostic: callers supply a [`store::PassageStore`]
//! for passage reads, an [`embedding::Embedder`] for vectors, and a
//! [`generate::TextGenerator`] for query rewrites. Everything else is
//! pipeline logic driven by [`config::Config`], and every backend failure
//! degrades to a narrower retrieval instead of an error.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`models`] | Passages, scored results, query plans |
//! | [`config`] | TOML configuration parsing and validation |
//! | [`chunk`] | Fixed-size and semantic document chunking |
//! | [`embedding`] | Embedder trait and cosine similarity |
//! | [`generate`] | Text generation trait for query rewrites |
//! | [`store`] | Passage store trait and in-memory implementation |
//! | [`retrieve`] | BM25, vector, hybrid, and RRF retrieval |
//! | [`transform`] | Multi-query and step-back query expansion |
//! | [`orchestrator`] | End-to-end retrieval workflow |

pub mod chunk;
pub mod config;
pub mod embedding;
pub mod generate;
pub mod models;
pub mod orchestrator;
pub mod retrieve;
pub mod store;
pub mod transform;

pub use chunk::{ChunkOutcome, ChunkStrategy, Chunker};
pub use config::{load_config, Config};
pub use embedding::{cosine_similarity, Embedder};
pub use generate::TextGenerator;
pub use models::{Passage, QueryPlan, ScoredPassage};
pub use orchestrator::{RetrievalOrchestrator, RetrievalOutput, RetrievalRequest};
pub use store::{PassageFilter, PassageStore};
