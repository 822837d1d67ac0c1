//! Message log abstraction and the in-process implementation.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;
use clinichat_core::{ClinichatResult, StorageError, Timestamp};
use serde::{Deserialize, Serialize};

/// Query text written on summary rows.
pub const SUMMARY_ROW_QUERY: &str = "[CONVERSATION SUMMARY]";

/// Who wrote a log row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
    Other(String),
}

impl MessageRole {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "user" => Self::User,
            "assistant" => Self::Assistant,
            _ => Self::Other(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Other(raw) => raw,
        }
    }
}

/// One non-deleted row of the message log.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageRow {
    pub id: i64,
    pub conversation_id: i64,
    pub role: MessageRole,
    pub query: Option<String>,
    pub response: Option<String>,
    pub parent_id: Option<i64>,
    pub meta: Option<serde_json::Value>,
    pub created_at: Timestamp,
}

/// Metadata stored on rows that hold a generated summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryMeta {
    #[serde(default)]
    pub is_summary: bool,
    /// Older rows wrote this as `message_count`
    #[serde(default, alias = "message_count")]
    pub summarized_turn_count: Option<u32>,
    /// Last assistant row id folded into the summary
    #[serde(default)]
    pub covers_through_id: Option<i64>,
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub summary_timestamp: Option<String>,
}

impl SummaryMeta {
    /// Parse a row's metadata, returning it only when it tags a summary.
    pub fn from_row(row: &MessageRow) -> Option<Self> {
        let meta = row.meta.as_ref()?;
        serde_json::from_value::<SummaryMeta>(meta.clone())
            .ok()
            .filter(|m| m.is_summary)
    }
}

/// A summary to append to the log.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryRecord {
    pub conversation_id: i64,
    pub text: String,
    pub summarized_turn_count: u32,
    pub covers_through_id: i64,
    pub created_at: Timestamp,
}

impl SummaryRecord {
    pub fn meta(&self) -> serde_json::Value {
        serde_json::json!({
            "is_summary": true,
            "summarized_turn_count": self.summarized_turn_count,
            "covers_through_id": self.covers_through_id,
            "created_by": "auto_summarizer",
            "summary_timestamp": self.created_at,
        })
    }
}

/// Aggregate numbers over the whole log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogStats {
    pub conversations: u64,
    pub assistant_rows: u64,
    pub user_rows: u64,
    pub summary_rows: u64,
    pub total_bytes: u64,
    pub oldest: Option<Timestamp>,
    pub newest: Option<Timestamp>,
}

/// Read access to the externally populated message log, plus the one
/// sanctioned write: appending a generated summary.
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// All non-deleted rows for a conversation, ordered by row id ascending.
    async fn fetch_rows(&self, conversation_id: i64) -> ClinichatResult<Vec<MessageRow>>;

    async fn insert_summary(&self, summary: &SummaryRecord) -> ClinichatResult<()>;

    async fn stats(&self) -> ClinichatResult<LogStats>;

    /// Human readable location (table name) for logs and stats.
    fn describe(&self) -> String;

    async fn close(&self) {}
}

// ============================================================================
// IN-PROCESS IMPLEMENTATION
// ============================================================================

#[derive(Debug, Clone)]
struct StoredRow {
    row: MessageRow,
    deleted: bool,
}

/// Message log held in memory.
///
/// Stands in for the relational log in tests and local runs. Counts fetches
/// and summary inserts so callers can verify how often the log was read.
#[derive(Debug)]
pub struct InMemoryMessageLog {
    rows: RwLock<Vec<StoredRow>>,
    next_id: AtomicI64,
    fetches: AtomicU64,
    summary_inserts: AtomicU64,
    unavailable: AtomicBool,
}

impl Default for InMemoryMessageLog {
    fn default() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
            fetches: AtomicU64::new(0),
            summary_inserts: AtomicU64::new(0),
            unavailable: AtomicBool::new(false),
        }
    }
}

impl InMemoryMessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `fetch_rows` calls so far.
    pub fn fetch_count(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn summary_insert_count(&self) -> u64 {
        self.summary_inserts.load(Ordering::SeqCst)
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Append a row, assigning the next id. Returns the id.
    pub fn append(
        &self,
        conversation_id: i64,
        role: MessageRole,
        query: Option<&str>,
        response: Option<&str>,
        parent_id: Option<i64>,
    ) -> i64 {
        let id = self.allocate_id();
        self.push_row(MessageRow {
            id,
            conversation_id,
            role,
            query: query.map(str::to_string),
            response: response.map(str::to_string),
            parent_id,
            meta: None,
            created_at: Utc::now(),
        });
        id
    }

    /// Append a self-contained assistant row (query and response together).
    pub fn append_exchange(&self, conversation_id: i64, query: &str, response: &str) -> i64 {
        self.append(
            conversation_id,
            MessageRole::Assistant,
            Some(query),
            Some(response),
            None,
        )
    }

    /// Append a row exactly as given, keeping ids monotonic.
    pub fn push_row(&self, row: MessageRow) {
        self.next_id.fetch_max(row.id + 1, Ordering::SeqCst);
        if let Ok(mut rows) = self.rows.write() {
            rows.push(StoredRow { row, deleted: false });
        }
    }

    pub fn soft_delete(&self, id: i64) -> bool {
        let Ok(mut rows) = self.rows.write() else {
            return false;
        };
        match rows.iter_mut().find(|r| r.row.id == id) {
            Some(stored) => {
                stored.deleted = true;
                true
            }
            None => false,
        }
    }

    fn check_available(&self) -> ClinichatResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::TierUnavailable {
                tier: "in_memory_log".to_string(),
                reason: "log marked unavailable".to_string(),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl MessageLog for InMemoryMessageLog {
    async fn fetch_rows(&self, conversation_id: i64) -> ClinichatResult<Vec<MessageRow>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.check_available()?;
        let rows = self.rows.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut found: Vec<MessageRow> = rows
            .iter()
            .filter(|r| !r.deleted && r.row.conversation_id == conversation_id)
            .map(|r| r.row.clone())
            .collect();
        found.sort_by_key(|r| r.id);
        Ok(found)
    }

    async fn insert_summary(&self, summary: &SummaryRecord) -> ClinichatResult<()> {
        self.check_available()?;
        let id = self.allocate_id();
        self.push_row(MessageRow {
            id,
            conversation_id: summary.conversation_id,
            role: MessageRole::Assistant,
            query: Some(SUMMARY_ROW_QUERY.to_string()),
            response: Some(summary.text.clone()),
            parent_id: Some(0),
            meta: Some(summary.meta()),
            created_at: summary.created_at,
        });
        self.summary_inserts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stats(&self) -> ClinichatResult<LogStats> {
        self.check_available()?;
        let rows = self.rows.read().map_err(|_| StorageError::LockPoisoned)?;
        let live: Vec<&MessageRow> = rows.iter().filter(|r| !r.deleted).map(|r| &r.row).collect();

        let mut conversations: Vec<i64> = live.iter().map(|r| r.conversation_id).collect();
        conversations.sort_unstable();
        conversations.dedup();

        Ok(LogStats {
            conversations: conversations.len() as u64,
            assistant_rows: live
                .iter()
                .filter(|r| r.role == MessageRole::Assistant)
                .count() as u64,
            user_rows: live.iter().filter(|r| r.role == MessageRole::User).count() as u64,
            summary_rows: live
                .iter()
                .filter(|r| SummaryMeta::from_row(r).is_some())
                .count() as u64,
            total_bytes: live
                .iter()
                .map(|r| {
                    (r.query.as_deref().map_or(0, str::len) + r.response.as_deref().map_or(0, str::len))
                        as u64
                })
                .sum(),
            oldest: live.iter().map(|r| r.created_at).min(),
            newest: live.iter().map(|r| r.created_at).max(),
        })
    }

    fn describe(&self) -> String {
        "in-memory".to_string()
    }
}
