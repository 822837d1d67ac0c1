//! Inbound chat request as handed over by the HTTP layer

use crate::{ClinichatResult, ValidationError};
use serde::{Deserialize, Serialize};

/// The fields of a chat request the history cache cares about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRequest {
    pub department: String,
    pub user: String,
    pub query: String,
    #[serde(default)]
    pub history_enabled: bool,
    /// Legacy per-session key
    #[serde(default)]
    pub session_id: Option<String>,
    /// Preferred key when present
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl HistoryRequest {
    pub fn new(
        department: impl Into<String>,
        user: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            department: department.into(),
            user: user.into(),
            query: query.into(),
            history_enabled: false,
            session_id: None,
            conversation_id: None,
        }
    }

    pub fn with_history(mut self, enabled: bool) -> Self {
        self.history_enabled = enabled;
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_conversation_id(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// The key used for cache lookups: `conversation_id` wins over `session_id`.
    /// Blank identifiers count as absent.
    pub fn effective_conversation_id(&self) -> Option<&str> {
        non_blank(self.conversation_id.as_deref()).or_else(|| non_blank(self.session_id.as_deref()))
    }

    /// Reject requests the cache cannot serve.
    pub fn validate(&self) -> ClinichatResult<()> {
        for (field, value) in [
            ("department", &self.department),
            ("user", &self.user),
            ("query", &self.query),
        ] {
            if value.trim().is_empty() {
                return Err(ValidationError::RequiredFieldMissing {
                    field: field.to_string(),
                }
                .into());
            }
        }

        if self.history_enabled && self.effective_conversation_id().is_none() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "session_id".to_string(),
            }
            .into());
        }

        Ok(())
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
