//! Collapse long histories into a single summary turn.
//!
//! The durable-log tier asks [`ConversationSummarizer::should_summarize`]
//! after reconstruction. When it says yes, everything but the most recent
//! `keep_recent` turns is rendered as a transcript and handed to the
//! configured [`SummarizationProvider`] under a timeout.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use clinichat_core::{ClinichatResult, ConversationTurn, LlmError, SummarizerConfig};
use clinichat_llm::{SummarizationProvider, SummarizeConfig};

const INSTRUCTIONS: &str = "Summarize the conversation below between a clinician and an \
assistant that answers questions about clinical notes. Keep the key topics discussed, \
important decisions or conclusions, patient or document context the clinician relies on, \
and any stated preferences. Be concise and stay under 500 words.";

/// Render the prompt for one summarization call.
///
/// A previous summary, if any, leads the transcript so the new summary
/// covers everything folded so far.
pub fn render_transcript(previous: Option<&ConversationTurn>, older: &[ConversationTurn]) -> String {
    let mut out = String::from(INSTRUCTIONS);
    out.push_str("\n\n");

    if let Some(previous) = previous {
        out.push_str("Earlier summary:\n");
        out.push_str(&previous.response);
        out.push_str("\n\n");
    }

    for (i, turn) in older.iter().enumerate() {
        out.push_str(&format!(
            "Message {} ({}):\nUser: {}\nAssistant: {}\n\n",
            i + 1,
            turn.timestamp.format("%Y-%m-%d %H:%M:%S"),
            turn.query,
            turn.response
        ));
    }
    out.push_str("Summary:");
    out
}

/// Threshold policy plus the LLM call that produces summary text.
pub struct ConversationSummarizer {
    provider: Arc<dyn SummarizationProvider>,
    config: SummarizerConfig,
    calls: AtomicU64,
    failures: AtomicU64,
}

impl ConversationSummarizer {
    pub fn new(provider: Arc<dyn SummarizationProvider>, config: SummarizerConfig) -> Self {
        Self {
            provider,
            config,
            calls: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &SummarizerConfig {
        &self.config
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    /// True once a reconstructed sequence is longer than the threshold.
    pub fn should_summarize(&self, turn_count: usize) -> bool {
        turn_count > self.config.threshold
    }

    /// Index splitting `len` turns into (older, recent).
    pub fn split_point(&self, len: usize) -> usize {
        len.saturating_sub(self.config.keep_recent)
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Summarize `older`, folding in `previous` if one exists.
    ///
    /// The returned turn counts every exchange it stands for, including the
    /// ones already folded into `previous`. Errors and timeouts come back as
    /// `LlmError`; callers decide how to degrade.
    pub async fn summarize(
        &self,
        conversation_id: &str,
        previous: Option<&ConversationTurn>,
        older: &[ConversationTurn],
    ) -> ClinichatResult<ConversationTurn> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        let result = self.call_provider(previous, older).await;
        if result.is_err() {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }
        let text = result?;

        let carried = previous
            .and_then(ConversationTurn::summarized_turn_count)
            .unwrap_or(0);
        let count = carried.saturating_add(older.len() as u32);

        tracing::info!(
            conversation_id,
            provider = self.provider.name(),
            folded = older.len(),
            summarized_turn_count = count,
            "conversation summarized"
        );
        Ok(ConversationTurn::summary(conversation_id, text, count))
    }

    async fn call_provider(
        &self,
        previous: Option<&ConversationTurn>,
        older: &[ConversationTurn],
    ) -> ClinichatResult<String> {
        let prompt = render_transcript(previous, older);
        let request = SummarizeConfig {
            max_tokens: self.config.max_tokens,
            temperature: self.config.temperature,
        };

        let text = tokio::time::timeout(
            self.config.timeout,
            self.provider.summarize(&prompt, &request),
        )
        .await
        .map_err(|_| LlmError::Timeout {
            provider: self.provider.name().to_string(),
            after_ms: self.config.timeout.as_millis() as u64,
        })??;

        let text = text.trim();
        if text.is_empty() {
            return Err(LlmError::SummarizationFailed {
                reason: "provider returned an empty summary".to_string(),
            }
            .into());
        }
        Ok(text.to_string())
    }
}

impl std::fmt::Debug for ConversationSummarizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationSummarizer")
            .field("provider", &self.provider.name())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clinichat_core::ClinichatError;
    use clinichat_test_utils::assertions::assert_llm_error;
    use clinichat_test_utils::{fixtures, MockSummarizationProvider};
    use std::time::Duration;

    fn summarizer(provider: Arc<MockSummarizationProvider>) -> ConversationSummarizer {
        ConversationSummarizer::new(provider, SummarizerConfig::default())
    }

    #[test]
    fn test_threshold_is_exclusive() {
        let s = summarizer(Arc::new(MockSummarizationProvider::new()));
        assert!(!s.should_summarize(30));
        assert!(s.should_summarize(31));
        assert_eq!(s.split_point(35), 25);
        assert_eq!(s.split_point(4), 0);
    }

    #[test]
    fn test_transcript_lists_turns_in_order() {
        let older = fixtures::turns("c", 2);
        let prompt = render_transcript(None, &older);
        let first = prompt.find("Message 1").unwrap();
        let second = prompt.find("Message 2").unwrap();
        assert!(first < second);
        assert!(prompt.contains("User: Q1\nAssistant: A1"));
        assert!(!prompt.contains("Earlier summary"));
    }

    #[test]
    fn test_transcript_includes_previous_summary() {
        let previous = fixtures::summary_turn("c", 25);
        let prompt = render_transcript(Some(&previous), &fixtures::turns("c", 1));
        assert!(prompt.contains("Earlier summary:\nSummary of 25 earlier exchanges"));
    }

    #[tokio::test]
    async fn test_summary_counts_folded_turns() {
        let provider = Arc::new(MockSummarizationProvider::new());
        let s = summarizer(provider.clone());
        let turn = s.summarize("c", None, &fixtures::turns("c", 25)).await.unwrap();
        assert!(turn.is_summary());
        assert_eq!(turn.summarized_turn_count(), Some(25));
        assert_eq!(turn.response, "Summary #1");
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn test_counts_accumulate_over_previous_summary() {
        let s = summarizer(Arc::new(MockSummarizationProvider::new()));
        let previous = fixtures::summary_turn("c", 25);
        let turn = s
            .summarize("c", Some(&previous), &fixtures::turns("c", 21))
            .await
            .unwrap();
        assert_eq!(turn.summarized_turn_count(), Some(46));
    }

    #[tokio::test]
    async fn test_provider_failure_is_reported() {
        let s = summarizer(Arc::new(MockSummarizationProvider::failing()));
        let result = s.summarize("c", None, &fixtures::turns("c", 3)).await;
        assert_llm_error(&result);
        assert_eq!(s.failures(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out() {
        let provider = Arc::new(MockSummarizationProvider::slow(Duration::from_secs(120)));
        let s = ConversationSummarizer::new(
            provider,
            SummarizerConfig::default().with_timeout(Duration::from_secs(1)),
        );
        let result = s.summarize("c", None, &fixtures::turns("c", 3)).await;
        assert!(matches!(
            result,
            Err(ClinichatError::Llm(LlmError::Timeout { after_ms: 1000, .. }))
        ));
    }
}
