//! Query transformation.
//!
//! Two rewrites run ahead of retrieval, both driven by a
//! [`TextGenerator`]:
//!
//! - **multi-query**: paraphrase the question into several
//!   retrieval-friendly variations, so lexically different but
//!   semantically equivalent passages can still match.
//! - **step-back**: reframe the question into one higher-level version
//!   that pulls in broader background passages.
//!
//! Neither rewrite is allowed to fail a request. A generation error, or
//! output that cleans down to nothing, degrades to the original query
//! and sets the corresponding flag on the [`QueryPlan`].

use std::collections::HashSet;
use std::sync::Arc;

use tracing::warn;

use crate::generate::TextGenerator;
use crate::models::QueryPlan;

const MULTI_QUERY_SYSTEM: &str = "You rewrite user questions into alternative phrasings that \
     preserve intent. Return each variation on its own line with no numbering.";

const STEP_BACK_SYSTEM: &str = "You help reframe detailed questions into higher-level versions \
     that capture the main intent. The result should aid retrieval of broader concepts relevant \
     to the original query.";

/// Expands a user query into a [`QueryPlan`].
pub struct QueryTransformer {
    generator: Arc<dyn TextGenerator>,
    multi_query_count: usize,
}

impl QueryTransformer {
    pub fn new(generator: Arc<dyn TextGenerator>, multi_query_count: usize) -> Self {
        Self {
            generator,
            multi_query_count,
        }
    }

    /// Build the plan for `query`, applying whichever rewrites are enabled.
    ///
    /// Variations that match the original query (case-insensitively) are
    /// dropped rather than retrieved twice.
    pub async fn plan(&self, query: &str, multi_query: bool, step_back: bool) -> QueryPlan {
        let mut plan = QueryPlan::passthrough(query);
        if query.trim().is_empty() {
            return plan;
        }

        if multi_query {
            let (variations, degraded) = self.multi_query(query).await;
            plan.variations = variations
                .into_iter()
                .filter(|v| !v.eq_ignore_ascii_case(query))
                .collect();
            plan.multi_query_degraded = degraded;
        }

        if step_back {
            let (text, degraded) = self.step_back(query).await;
            if !text.eq_ignore_ascii_case(query) {
                plan.step_back_text = Some(text);
            }
            plan.step_back_degraded = degraded;
        }

        plan
    }

    /// Generate up to `multi_query_count` paraphrases of `query`.
    ///
    /// Returns the variations and whether generation degraded. On failure
    /// or empty cleaned output the original query stands in as the sole
    /// variation.
    pub async fn multi_query(&self, query: &str) -> (Vec<String>, bool) {
        let user_prompt = format!(
            "Original question: {query}\nProvide {} diverse retrieval-friendly variations.",
            self.multi_query_count
        );

        let response = match self.generator.generate(MULTI_QUERY_SYSTEM, &user_prompt).await {
            Ok(r) => r,
            Err(err) => {
                warn!(error = %err, "multi-query generation failed, using original query");
                return (vec![query.to_string()], true);
            }
        };

        let mut unique: Vec<String> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        for line in response.lines() {
            let cleaned = strip_list_marker(line);
            if cleaned.is_empty() {
                continue;
            }
            if !seen.insert(cleaned.to_lowercase()) {
                continue;
            }
            unique.push(cleaned.to_string());
            if unique.len() >= self.multi_query_count {
                break;
            }
        }

        if unique.is_empty() {
            warn!("multi-query output cleaned to nothing, using original query");
            return (vec![query.to_string()], true);
        }

        (unique, false)
    }

    /// Generate one higher-level reformulation of `query`.
    ///
    /// Returns the step-back text and whether generation degraded; both
    /// failure and blank output fall back to the original query.
    pub async fn step_back(&self, query: &str) -> (String, bool) {
        let user_prompt = format!(
            "Original question:\n{query}\n\nProduce one abstract 'step-back' question that \
             focuses on the core problem."
        );

        match self.generator.generate(STEP_BACK_SYSTEM, &user_prompt).await {
            Ok(response) => {
                let trimmed = response.trim();
                if trimmed.is_empty() {
                    warn!("step-back output was blank, using original query");
                    (query.to_string(), true)
                } else {
                    (trimmed.to_string(), false)
                }
            }
            Err(err) => {
                warn!(error = %err, "step-back generation failed, using original query");
                (query.to_string(), true)
            }
        }
    }
}

/// Strip a leading list marker (`-`, digits, `.`, `)`) and surrounding
/// whitespace from a generated line.
fn strip_list_marker(line: &str) -> &str {
    line.trim_start()
        .trim_start_matches(|c: char| c == '-' || c == '.' || c == ')' || c.is_ascii_digit())
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;

    /// Generator returning a fixed response.
    struct CannedGenerator {
        response: String,
    }

    #[async_trait]
    impl TextGenerator for CannedGenerator {
        async fn generate(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String> {
            Ok(self.response.clone())
        }
    }

    struct FailingGenerator;

    #[async_trait]
    impl TextGenerator for FailingGenerator {
        async fn generate(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String> {
            anyhow::bail!("backend unavailable")
        }
    }

    fn transformer(response: &str, count: usize) -> QueryTransformer {
        QueryTransformer::new(
            Arc::new(CannedGenerator {
                response: response.to_string(),
            }),
            count,
        )
    }

    #[test]
    fn test_strip_list_marker() {
        assert_eq!(strip_list_marker("1. How does it work?"), "How does it work?");
        assert_eq!(strip_list_marker("- a variation"), "a variation");
        assert_eq!(strip_list_marker("  2) another"), "another");
        assert_eq!(strip_list_marker("plain line"), "plain line");
        assert_eq!(strip_list_marker("   "), "");
    }

    #[tokio::test]
    async fn test_multi_query_cleans_and_dedups() {
        let t = transformer("1. What is BM25?\n2. what is bm25?\n3. Explain BM25 scoring\n", 3);
        let (variations, degraded) = t.multi_query("bm25?").await;
        assert!(!degraded);
        assert_eq!(variations, vec!["What is BM25?", "Explain BM25 scoring"]);
    }

    #[tokio::test]
    async fn test_multi_query_truncates_to_count() {
        let t = transformer("one\ntwo\nthree\nfour\nfive", 3);
        let (variations, _) = t.multi_query("q").await;
        assert_eq!(variations.len(), 3);
    }

    #[tokio::test]
    async fn test_multi_query_failure_degrades_to_original() {
        let t = QueryTransformer::new(Arc::new(FailingGenerator), 3);
        let (variations, degraded) = t.multi_query("original question").await;
        assert!(degraded);
        assert_eq!(variations, vec!["original question"]);
    }

    #[tokio::test]
    async fn test_multi_query_blank_output_degrades() {
        let t = transformer("  \n- \n1.  ", 3);
        let (variations, degraded) = t.multi_query("original").await;
        assert!(degraded);
        assert_eq!(variations, vec!["original"]);
    }

    #[tokio::test]
    async fn test_step_back_trims_response() {
        let t = transformer("  What is ranked retrieval?  \n", 3);
        let (text, degraded) = t.step_back("how do I tune k1 in bm25?").await;
        assert!(!degraded);
        assert_eq!(text, "What is ranked retrieval?");
    }

    #[tokio::test]
    async fn test_step_back_failure_degrades_to_original() {
        let t = QueryTransformer::new(Arc::new(FailingGenerator), 3);
        let (text, degraded) = t.step_back("the question").await;
        assert!(degraded);
        assert_eq!(text, "the question");
    }

    #[tokio::test]
    async fn test_plan_excludes_echoed_variations() {
        let t = transformer("My Query\nsomething new", 3);
        let plan = t.plan("my query", true, false).await;
        assert_eq!(plan.variations, vec!["something new"]);
        assert!(!plan.multi_query_degraded);
        assert!(plan.step_back_text.is_none());
    }

    #[tokio::test]
    async fn test_plan_empty_query_is_passthrough() {
        let t = QueryTransformer::new(Arc::new(FailingGenerator), 3);
        let plan = t.plan("   ", true, true).await;
        assert!(plan.variations.is_empty());
        assert!(plan.step_back_text.is_none());
        assert!(!plan.multi_query_degraded);
    }

    #[tokio::test]
    async fn test_plan_disabled_rewrites_do_nothing() {
        let t = QueryTransformer::new(Arc::new(FailingGenerator), 3);
        let plan = t.plan("real question", false, false).await;
        assert!(plan.variations.is_empty());
        assert!(plan.step_back_text.is_none());
        assert!(!plan.multi_query_degraded);
        assert!(!plan.step_back_degraded);
    }
}
