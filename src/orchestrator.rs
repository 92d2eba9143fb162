//! End-to-end retrieval orchestration.
//!
//! One [`RetrievalOrchestrator::retrieve`] call runs the full pipeline:
//!
//! 1. Expand the query into a [`QueryPlan`] (multi-query, step-back).
//! 2. Retrieve the primary query through hybrid BM25 + vector scoring.
//! 3. Retrieve each variation concurrently, bounded by `fan_out_limit`,
//!    and merge them into one set keeping each passage's best score.
//! 4. Fuse primary and variation rankings with RRF, or deduplicate in
//!    first-seen order when fusion is disabled or only one set exists.
//!
//! The call is infallible by construction. Every backend interaction
//! (generation, embedding, store reads) degrades to a narrower retrieval
//! rather than an error, and the [`RetrievalTrace`] records what was
//! skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::Config;
use crate::embedding::Embedder;
use crate::generate::TextGenerator;
use crate::models::{QueryPlan, ScoredPassage};
use crate::retrieve::bm25::Bm25Retriever;
use crate::retrieve::fusion::{dedup_first_seen, RankFusion};
use crate::retrieve::hybrid::HybridRetriever;
use crate::retrieve::vector::VectorRetriever;
use crate::store::{PassageFilter, PassageStore};
use crate::transform::QueryTransformer;

/// One retrieval request.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub query_text: String,
    pub top_k: usize,
    pub use_multi_query: bool,
    pub use_step_back: bool,
    pub filter: PassageFilter,
}

impl RetrievalRequest {
    /// A request with both query rewrites enabled and no visibility filter.
    pub fn new(query_text: &str, top_k: usize) -> Self {
        Self {
            query_text: query_text.to_string(),
            top_k,
            use_multi_query: true,
            use_step_back: true,
            filter: PassageFilter::default(),
        }
    }
}

/// What actually happened while serving a request.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalTrace {
    pub query_text: String,
    pub started_at: DateTime<Utc>,
    /// Secondary retrieval targets attempted (variations + step-back).
    pub variation_count: usize,
    pub result_count: usize,
    pub elapsed_ms: u64,
    pub multi_query_degraded: bool,
    pub step_back_degraded: bool,
    /// The variation phase hit its deadline; pending variations were
    /// cancelled and their results omitted.
    pub variation_phase_timed_out: bool,
}

/// Final ranking plus the plan and trace that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalOutput {
    pub passages: Vec<ScoredPassage>,
    pub plan: QueryPlan,
    pub trace: RetrievalTrace,
}

/// Drives the retrieval pipeline over injected backends.
pub struct RetrievalOrchestrator {
    store: Arc<dyn PassageStore>,
    embedder: Arc<dyn Embedder>,
    transformer: QueryTransformer,
    hybrid: Arc<HybridRetriever>,
    fusion: RankFusion,
    use_fusion: bool,
    fan_out_limit: usize,
    variation_timeout: Option<Duration>,
}

impl RetrievalOrchestrator {
    pub fn new(
        store: Arc<dyn PassageStore>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn TextGenerator>,
        config: &Config,
    ) -> Self {
        let retrieval = &config.retrieval;
        let hybrid = HybridRetriever::new(
            Bm25Retriever::new(retrieval.bm25_k1, retrieval.bm25_b),
            VectorRetriever::new(),
            retrieval.vector_weight,
            retrieval.bm25_weight,
        );

        Self {
            store,
            embedder,
            transformer: QueryTransformer::new(generator, config.transform.multi_query_count),
            hybrid: Arc::new(hybrid),
            fusion: RankFusion::new(retrieval.rrf_k),
            use_fusion: retrieval.use_fusion,
            fan_out_limit: retrieval.fan_out_limit,
            variation_timeout: retrieval.variation_timeout_ms.map(Duration::from_millis),
        }
    }

    /// Run the full pipeline for `request`.
    ///
    /// An empty or whitespace-only query short-circuits to an empty result
    /// without touching any backend.
    pub async fn retrieve(&self, request: &RetrievalRequest) -> RetrievalOutput {
        let started_at = Utc::now();
        let started = Instant::now();
        let query = request.query_text.trim();

        if query.is_empty() {
            let plan = QueryPlan::passthrough(query);
            return RetrievalOutput {
                passages: Vec::new(),
                trace: trace_for(&plan, 0, 0, started_at, started, false),
                plan,
            };
        }

        let plan = self
            .transformer
            .plan(query, request.use_multi_query, request.use_step_back)
            .await;

        let query_vec = embed_with_retry(self.embedder.as_ref(), &plan.primary_text).await;
        let primary = self
            .hybrid
            .retrieve(
                self.store.as_ref(),
                &plan.primary_text,
                query_vec.as_deref(),
                &request.filter,
                request.top_k,
            )
            .await;

        let secondary = plan.secondary_texts();
        let (variation_results, timed_out) = if secondary.is_empty() {
            (Vec::new(), false)
        } else {
            self.retrieve_variations(&secondary, &request.filter, request.top_k)
                .await
        };

        let mut result_sets: Vec<Vec<ScoredPassage>> = Vec::new();
        if !primary.is_empty() {
            result_sets.push(primary);
        }
        if !variation_results.is_empty() {
            result_sets.push(variation_results);
        }

        let passages = if self.use_fusion && result_sets.len() > 1 {
            self.fusion.fuse(&result_sets, request.top_k)
        } else {
            dedup_first_seen(&result_sets, request.top_k)
        };

        let trace = trace_for(
            &plan,
            secondary.len(),
            passages.len(),
            started_at,
            started,
            timed_out,
        );
        info!(
            query = %plan.primary_text,
            variations = trace.variation_count,
            results = trace.result_count,
            elapsed_ms = trace.elapsed_ms,
            "retrieval complete"
        );
        if passages.is_empty() {
            warn!(query = %plan.primary_text, "no passages retrieved");
        }

        RetrievalOutput {
            passages,
            plan,
            trace,
        }
    }

    /// Retrieve every secondary query concurrently and merge the results.
    ///
    /// Each variation runs a full hybrid retrieval under a semaphore permit.
    /// A passage found by several variations keeps its best score. When a
    /// deadline is configured and elapses, already-joined results are kept,
    /// the rest are aborted, and the returned flag is set.
    async fn retrieve_variations(
        &self,
        texts: &[String],
        filter: &PassageFilter,
        top_k: usize,
    ) -> (Vec<ScoredPassage>, bool) {
        let semaphore = Arc::new(Semaphore::new(self.fan_out_limit));
        let mut tasks: JoinSet<(usize, Vec<ScoredPassage>)> = JoinSet::new();

        for (idx, text) in texts.iter().enumerate() {
            let store = Arc::clone(&self.store);
            let embedder = Arc::clone(&self.embedder);
            let hybrid = Arc::clone(&self.hybrid);
            let semaphore = Arc::clone(&semaphore);
            let filter = filter.clone();
            let text = text.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                let query_vec = embed_with_retry(embedder.as_ref(), &text).await;
                let results = hybrid
                    .retrieve(store.as_ref(), &text, query_vec.as_deref(), &filter, top_k)
                    .await;
                (idx, results)
            });
        }

        let deadline = self
            .variation_timeout
            .map(|t| tokio::time::Instant::now() + t);
        let mut sets: Vec<(usize, Vec<ScoredPassage>)> = Vec::new();
        let mut timed_out = false;

        loop {
            let next = match deadline {
                Some(at) => match tokio::time::timeout_at(at, tasks.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        timed_out = true;
                        warn!(
                            pending = tasks.len(),
                            "variation retrieval deadline elapsed, cancelling pending variations"
                        );
                        tasks.abort_all();
                        break;
                    }
                },
                None => tasks.join_next().await,
            };

            match next {
                Some(Ok(indexed)) => sets.push(indexed),
                Some(Err(err)) => {
                    if !err.is_cancelled() {
                        warn!(error = %err, "variation retrieval task failed");
                    }
                }
                None => break,
            }
        }

        // Spawn order, not completion order, so ties merge deterministically.
        sets.sort_by_key(|(idx, _)| *idx);
        let ordered: Vec<Vec<ScoredPassage>> = sets.into_iter().map(|(_, s)| s).collect();
        (merge_max_score(&ordered, top_k), timed_out)
    }
}

/// Merge variation result sets, keeping each passage's best score.
///
/// Output is sorted by score descending, ties in first-seen order,
/// truncated to `top_k` with ranks reassigned.
fn merge_max_score(sets: &[Vec<ScoredPassage>], top_k: usize) -> Vec<ScoredPassage> {
    let mut best: HashMap<(String, String), ScoredPassage> = HashMap::new();
    let mut order: Vec<(String, String)> = Vec::new();

    for set in sets {
        for sp in set {
            let key = sp.key();
            match best.get(&key) {
                Some(existing) if existing.score >= sp.score => {}
                Some(_) => {
                    best.insert(key, sp.clone());
                }
                None => {
                    order.push(key.clone());
                    best.insert(key, sp.clone());
                }
            }
        }
    }

    let mut merged: Vec<ScoredPassage> = order.iter().filter_map(|k| best.remove(k)).collect();
    merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    merged.truncate(top_k);
    for (idx, sp) in merged.iter_mut().enumerate() {
        sp.rank = Some(idx as u32 + 1);
    }
    merged
}

/// Embed `text`, retrying once. `None` means both attempts failed and the
/// caller should fall back to lexical-only retrieval.
async fn embed_with_retry(embedder: &dyn Embedder, text: &str) -> Option<Vec<f32>> {
    match embedder.embed(text).await {
        Ok(v) => Some(v),
        Err(first) => {
            warn!(error = %first, "query embedding failed, retrying once");
            match embedder.embed(text).await {
                Ok(v) => Some(v),
                Err(second) => {
                    warn!(
                        error = %second,
                        "query embedding failed twice, falling back to lexical-only retrieval"
                    );
                    None
                }
            }
        }
    }
}

fn trace_for(
    plan: &QueryPlan,
    variation_count: usize,
    result_count: usize,
    started_at: DateTime<Utc>,
    started: Instant,
    timed_out: bool,
) -> RetrievalTrace {
    RetrievalTrace {
        query_text: plan.primary_text.clone(),
        started_at,
        variation_count,
        result_count,
        elapsed_ms: started.elapsed().as_millis() as u64,
        multi_query_degraded: plan.multi_query_degraded,
        step_back_degraded: plan.step_back_degraded,
        variation_phase_timed_out: timed_out,
    }
}
