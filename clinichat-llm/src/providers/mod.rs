//! LLM provider implementations

pub mod anthropic;

pub use anthropic::{AnthropicClient, AnthropicSummarizationProvider};
