//! Anthropic (Claude) summarization provider implementation

use super::client::AnthropicClient;
use super::types::{ContentBlock, Message, MessageRequest, MessageResponse};
use crate::{SummarizationProvider, SummarizeConfig};
use async_trait::async_trait;
use clinichat_core::{AnthropicConfig, ClinichatResult, LlmError};

const SYSTEM_PROMPT: &str = "You summarize conversations between clinicians and an assistant \
    that answers questions over clinical notes. Preserve patient context, findings, \
    decisions and open questions. Do not invent facts that are not in the conversation.";

/// Anthropic summarization provider using Claude models.
pub struct AnthropicSummarizationProvider {
    client: AnthropicClient,
    model: String,
}

impl AnthropicSummarizationProvider {
    /// Create a new Anthropic summarization provider.
    ///
    /// # Arguments
    /// * `api_key` - Anthropic API key
    /// * `model` - Model name (e.g., "claude-3-5-haiku-20241022")
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> ClinichatResult<Self> {
        Ok(Self {
            client: AnthropicClient::new(api_key, 50)?,
            model: model.into(),
        })
    }

    pub fn from_config(config: &AnthropicConfig) -> ClinichatResult<Self> {
        Ok(Self {
            client: AnthropicClient::from_config(config)?,
            model: config.model.clone(),
        })
    }

    /// Extract text from content blocks.
    fn extract_text(content: Vec<ContentBlock>) -> String {
        content
            .into_iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text),
                ContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl SummarizationProvider for AnthropicSummarizationProvider {
    async fn summarize(&self, content: &str, config: &SummarizeConfig) -> ClinichatResult<String> {
        let request = MessageRequest {
            model: self.model.clone(),
            system: Some(SYSTEM_PROMPT.to_string()),
            messages: vec![Message {
                role: "user".to_string(),
                content: content.to_string(),
            }],
            max_tokens: config.max_tokens,
            temperature: Some(config.temperature),
        };

        let response: MessageResponse = self.client.request("messages", request).await?;
        tracing::debug!(
            model = %response.model,
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "summary generated"
        );

        let text = Self::extract_text(response.content);
        if text.trim().is_empty() {
            return Err(LlmError::InvalidResponse {
                provider: "anthropic".to_string(),
                reason: "summary response contained no text".to_string(),
            }
            .into());
        }
        Ok(text)
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

impl std::fmt::Debug for AnthropicSummarizationProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicSummarizationProvider")
            .field("model", &self.model)
            .finish()
    }
}
