//! Conversation turn and history entry types

use crate::Timestamp;
use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Question text used when a summary turn is rendered as history.
pub const SUMMARY_QUESTION: &str = "[Previous conversation summary]";

/// Whether a turn is a real exchange or a synthetic summary of older ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnKind {
    /// One question and its answer
    #[default]
    Exchange,
    /// Stands in for `summarized_turn_count` older exchanges
    Summary { summarized_turn_count: u32 },
}

/// One question/answer exchange in a conversation.
///
/// Sequences of turns are ordered by append order (or log row id), never by
/// `timestamp`. A summary turn, when present, is always the first element.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub conversation_id: String,
    pub query: String,
    pub response: String,
    /// Data sources consulted for this answer, in first-use order
    #[serde(default)]
    pub used_resources: Vec<String>,
    /// Advisory only; used for display and stats
    pub timestamp: Timestamp,
    #[serde(default)]
    pub kind: TurnKind,
}

impl ConversationTurn {
    /// Create a regular exchange stamped with the current time.
    pub fn new(
        conversation_id: impl Into<String>,
        query: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            query: query.into(),
            response: response.into(),
            used_resources: Vec::new(),
            timestamp: Utc::now(),
            kind: TurnKind::Exchange,
        }
    }

    /// Create a summary turn standing in for `summarized_turn_count` exchanges.
    pub fn summary(
        conversation_id: impl Into<String>,
        text: impl Into<String>,
        summarized_turn_count: u32,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            query: SUMMARY_QUESTION.to_string(),
            response: text.into(),
            used_resources: Vec::new(),
            timestamp: Utc::now(),
            kind: TurnKind::Summary {
                summarized_turn_count,
            },
        }
    }

    /// Attach the consulted resources, dropping duplicates but keeping order.
    pub fn with_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut seen = Vec::new();
        for resource in resources {
            let resource = resource.into();
            if !seen.contains(&resource) {
                seen.push(resource);
            }
        }
        self.used_resources = seen;
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_summary(&self) -> bool {
        matches!(self.kind, TurnKind::Summary { .. })
    }

    /// Number of original turns represented, only for summary turns.
    pub fn summarized_turn_count(&self) -> Option<u32> {
        match self.kind {
            TurnKind::Summary {
                summarized_turn_count,
            } => Some(summarized_turn_count),
            TurnKind::Exchange => None,
        }
    }

    /// Rough byte footprint used for statistics.
    pub fn estimated_size(&self) -> usize {
        self.query.len()
            + self.response.len()
            + self.used_resources.iter().map(String::len).sum::<usize>()
    }

    /// Render this turn in the shape handed to the LLM orchestration step.
    pub fn to_history_entry(&self) -> HistoryEntry {
        match self.kind {
            TurnKind::Exchange => HistoryEntry {
                question: self.query.clone(),
                answer: self.response.clone(),
                timestamp: self.timestamp,
                is_summary: None,
                turn_count: None,
            },
            TurnKind::Summary {
                summarized_turn_count,
            } => HistoryEntry {
                question: SUMMARY_QUESTION.to_string(),
                answer: self.response.clone(),
                timestamp: self.timestamp,
                is_summary: Some(true),
                turn_count: Some(summarized_turn_count),
            },
        }
    }
}

/// History as consumed by the LLM orchestration step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub question: String,
    pub answer: String,
    pub timestamp: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_summary: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_count: Option<u32>,
}

/// Convert an ordered turn sequence into history entries.
pub fn to_history_entries(turns: &[ConversationTurn]) -> Vec<HistoryEntry> {
    turns.iter().map(ConversationTurn::to_history_entry).collect()
}
