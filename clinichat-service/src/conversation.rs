//! The two calls the chat flow makes around the LLM step.
//!
//! `load_history` runs before the model is invoked and `record_answer`
//! after it produced an answer. Both key the cache by the request's
//! effective conversation id.

use std::sync::Arc;

use clinichat_core::{ClinichatResult, HistoryEntry, HistoryRequest};
use clinichat_storage::HistoryCache;

/// Request-level entry point to the history cache.
#[derive(Debug, Clone)]
pub struct ConversationService {
    cache: Arc<HistoryCache>,
}

impl ConversationService {
    pub fn new(cache: Arc<HistoryCache>) -> Self {
        Self { cache }
    }

    /// Prior turns to hand to the model as context.
    ///
    /// With history disabled the request starts a new conversation: any
    /// cached turns under its id are dropped and nothing is returned.
    pub async fn load_history(&self, request: &HistoryRequest) -> ClinichatResult<Vec<HistoryEntry>> {
        request.validate()?;
        let Some(id) = request.effective_conversation_id() else {
            return Ok(Vec::new());
        };

        if !request.history_enabled {
            self.cache.clear_session(id).await?;
            tracing::debug!(
                conversation_id = id,
                department = %request.department,
                "history disabled, starting new conversation"
            );
            return Ok(Vec::new());
        }

        let entries = self.cache.get_history_entries(id).await?;
        tracing::debug!(
            conversation_id = id,
            department = %request.department,
            entries = entries.len(),
            "loaded conversation history"
        );
        Ok(entries)
    }

    /// Store the model's answer. Returns `false` when the request carries no
    /// identifier to store it under.
    pub async fn record_answer<I, S>(
        &self,
        request: &HistoryRequest,
        response: &str,
        used_resources: I,
    ) -> ClinichatResult<bool>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let Some(id) = request.effective_conversation_id() else {
            tracing::debug!(
                department = %request.department,
                "no conversation id, answer not cached"
            );
            return Ok(false);
        };
        self.cache
            .save_response(id, &request.query, response, used_resources)
            .await?;
        Ok(true)
    }
}
