//! Clinichat LLM - Summarization Provider Abstraction
//!
//! The history cache only needs one thing from a language model: turn a
//! conversation transcript into a short summary. This crate defines that
//! seam and ships an Anthropic implementation.

use async_trait::async_trait;
use clinichat_core::ClinichatResult;
use serde::{Deserialize, Serialize};

pub mod providers;

pub use providers::{AnthropicClient, AnthropicSummarizationProvider};

// ============================================================================
// SUMMARIZATION PROVIDER TRAIT
// ============================================================================

/// Configuration for summarization requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummarizeConfig {
    /// Maximum tokens in the summary output
    pub max_tokens: i32,
    /// Sampling temperature; kept low so summaries are stable
    pub temperature: f32,
}

impl Default for SummarizeConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1000,
            temperature: 0.3,
        }
    }
}

/// Trait for summarization providers.
///
/// Implementations must be thread-safe (Send + Sync). Timeouts are applied
/// by the caller; providers only report their own failures.
#[async_trait]
pub trait SummarizationProvider: Send + Sync {
    /// Summarize `content` (a fully rendered prompt) within `config` limits.
    ///
    /// # Returns
    /// * `Ok(String)` - The summary text
    /// * `Err(ClinichatError::Llm)` - If the provider call fails
    async fn summarize(&self, content: &str, config: &SummarizeConfig) -> ClinichatResult<String>;

    /// Provider name used in logs.
    fn name(&self) -> &str;
}
