//! Generative-text capability trait.
//!
//! Used only by query transformation (multi-query and step-back). A failed
//! or empty generation never propagates as a fatal error out of this core:
//! the transformer degrades to the original query instead.

use anyhow::Result;
use async_trait::async_trait;

/// Capability trait for generative-text backends.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate a completion for the given system and user prompts.
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String>;
}
