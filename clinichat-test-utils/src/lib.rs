//! Clinichat Test Utilities
//!
//! Shared test infrastructure for the clinichat workspace:
//! - Mock summarization provider with call counting and failure injection
//! - Proptest generators for turns and identifiers
//! - Fixtures for common conversation shapes
//! - Assertions for the error taxonomy

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use clinichat_llm::{SummarizationProvider, SummarizeConfig};

// Re-export core types for convenience
pub use clinichat_core::{
    ClinichatError, ClinichatResult, ConversationTurn, LlmError, StorageError, Timestamp,
    ValidationError,
};

// ============================================================================
// MOCK PROVIDERS
// ============================================================================

/// Mock summarization provider for testing (async).
///
/// Returns `"{prefix}#{n}"` where `n` is the call number, so tests can tell
/// which call produced a summary. Every prompt is recorded.
#[derive(Debug)]
pub struct MockSummarizationProvider {
    prefix: String,
    delay: Option<Duration>,
    failing: AtomicBool,
    calls: AtomicU64,
    prompts: Mutex<Vec<String>>,
}

impl MockSummarizationProvider {
    pub fn new() -> Self {
        Self::with_prefix("Summary ")
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            delay: None,
            failing: AtomicBool::new(false),
            calls: AtomicU64::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// A provider whose every call fails with `LlmError::RequestFailed`.
    pub fn failing() -> Self {
        let provider = Self::new();
        provider.set_failing(true);
        provider
    }

    /// A provider that sleeps before answering (for timeout tests).
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::new()
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_prompt(&self) -> Option<String> {
        self.prompts.lock().ok().and_then(|p| p.last().cloned())
    }
}

impl Default for MockSummarizationProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SummarizationProvider for MockSummarizationProvider {
    async fn summarize(&self, content: &str, _config: &SummarizeConfig) -> ClinichatResult<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(content.to_string());
        }

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.load(Ordering::SeqCst) {
            return Err(LlmError::RequestFailed {
                provider: "mock".to_string(),
                status: 503,
                message: "mock provider configured to fail".to_string(),
            }
            .into());
        }

        Ok(format!("{}#{}", self.prefix, n))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for clinichat types.

    use super::*;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    /// Generate a timestamp between 2020 and 2030.
    fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1_577_836_800i64..1_893_456_000i64)
            .prop_map(|secs| Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now))
    }

    /// Numeric ids as issued by the durable log.
    pub fn arb_numeric_conversation_id() -> impl Strategy<Value = String> {
        (1u32..1_000_000).prop_map(|n| n.to_string())
    }

    /// Transient session ids that never resolve against the durable log.
    pub fn arb_session_id() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9-]{3,20}"
    }

    pub fn arb_conversation_id() -> impl Strategy<Value = String> {
        prop_oneof![arb_numeric_conversation_id(), arb_session_id()]
    }

    fn arb_resources() -> impl Strategy<Value = Vec<String>> {
        prop::collection::vec("[a-z_]{3,12}", 0..4)
    }

    /// Generate a regular exchange for `conversation_id`.
    pub fn arb_turn(conversation_id: String) -> impl Strategy<Value = ConversationTurn> {
        (
            "[A-Za-z ?]{1,60}",
            "[A-Za-z .]{1,120}",
            arb_resources(),
            arb_timestamp(),
        )
            .prop_map(move |(query, response, resources, ts)| {
                ConversationTurn::new(conversation_id.clone(), query, response)
                    .with_resources(resources)
                    .with_timestamp(ts)
            })
    }

    /// Generate `len` turns for one conversation.
    pub fn arb_conversation(
        conversation_id: String,
        len: std::ops::Range<usize>,
    ) -> impl Strategy<Value = Vec<ConversationTurn>> {
        prop::collection::vec(arb_turn(conversation_id), len)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made turns for common scenarios.

    use super::*;

    /// Turn `i` of a conversation: `Q{i}` / `A{i}`.
    pub fn turn(conversation_id: &str, i: usize) -> ConversationTurn {
        ConversationTurn::new(conversation_id, format!("Q{}", i), format!("A{}", i))
    }

    /// Turns `1..=n` in order.
    pub fn turns(conversation_id: &str, n: usize) -> Vec<ConversationTurn> {
        (1..=n).map(|i| turn(conversation_id, i)).collect()
    }

    pub fn summary_turn(conversation_id: &str, count: u32) -> ConversationTurn {
        ConversationTurn::summary(
            conversation_id,
            format!("Summary of {} earlier exchanges", count),
            count,
        )
    }

    /// `(query, response)` pairs of a sequence, for compact assertions.
    pub fn pairs(turns: &[ConversationTurn]) -> Vec<(String, String)> {
        turns
            .iter()
            .map(|t| (t.query.clone(), t.response.clone()))
            .collect()
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for clinichat error classes.

    use super::*;

    /// Assert that a ClinichatResult is a validation (caller) error.
    #[track_caller]
    pub fn assert_validation_error<T: std::fmt::Debug>(result: &ClinichatResult<T>) {
        match result {
            Err(ClinichatError::Validation(_)) => {}
            other => panic!("Expected Validation error, got: {:?}", other),
        }
    }

    /// Assert that a ClinichatResult is a storage error.
    #[track_caller]
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &ClinichatResult<T>) {
        match result {
            Err(ClinichatError::Storage(_)) => {}
            other => panic!("Expected Storage error, got: {:?}", other),
        }
    }

    /// Assert that a ClinichatResult is an LLM error.
    #[track_caller]
    pub fn assert_llm_error<T: std::fmt::Debug>(result: &ClinichatResult<T>) {
        match result {
            Err(ClinichatError::Llm(_)) => {}
            other => panic!("Expected Llm error, got: {:?}", other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_counts_and_numbers_calls() {
        let provider = MockSummarizationProvider::new();
        let config = SummarizeConfig::default();
        assert_eq!(provider.summarize("a", &config).await.unwrap(), "Summary #1");
        assert_eq!(provider.summarize("b", &config).await.unwrap(), "Summary #2");
        assert_eq!(provider.call_count(), 2);
        assert_eq!(provider.last_prompt().as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_failing_mock_still_counts() {
        let provider = MockSummarizationProvider::failing();
        let result = provider.summarize("x", &SummarizeConfig::default()).await;
        assertions::assert_llm_error(&result);
        assert_eq!(provider.call_count(), 1);
    }

    #[test]
    fn test_fixture_turns_are_ordered() {
        let turns = fixtures::turns("c", 3);
        assert_eq!(
            fixtures::pairs(&turns),
            vec![
                ("Q1".to_string(), "A1".to_string()),
                ("Q2".to_string(), "A2".to_string()),
                ("Q3".to_string(), "A3".to_string()),
            ]
        );
    }
}
