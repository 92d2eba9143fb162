//! Retrieval strategies.
//!
//! | Module   | Strategy                                            |
//! |----------|-----------------------------------------------------|
//! | `bm25`   | Okapi BM25 over the filtered candidate snapshot     |
//! | `vector` | Nearest-neighbor search via the passage store       |
//! | `hybrid` | Weighted combination of the two, min-max normalized |
//! | `fusion` | Reciprocal Rank Fusion across ranked result lists   |

pub mod bm25;
pub mod fusion;
pub mod hybrid;
pub mod vector;

pub use bm25::{Bm25Retriever, TermIndexStats};
pub use fusion::{dedup_first_seen, RankFusion};
pub use hybrid::HybridRetriever;
pub use vector::VectorRetriever;
