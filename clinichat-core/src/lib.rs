//! Clinichat Core - Conversation History Types
//!
//! Pure data structures shared by every tier of the history cache: the turn
//! record, its rendered history form, statistics, the inbound request
//! contract, errors and configuration. This crate performs no I/O.

use chrono::{DateTime, Utc};

pub mod config;
pub mod error;
pub mod request;
pub mod stats;
pub mod turn;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

pub use config::{
    AnthropicConfig, ClinichatConfig, DbConfig, DurableLogConfig, HistoryCacheConfig, LogSchema,
    ReconstructionStrategy, SharedTierConfig, SummarizerConfig, DEFAULT_MAX_TURNS,
};
pub use error::{
    ClinichatError, ClinichatResult, ConfigError, LlmError, StorageError, ValidationError,
};
pub use request::HistoryRequest;
pub use stats::{CacheStatistics, TierStats};
pub use turn::{to_history_entries, ConversationTurn, HistoryEntry, TurnKind, SUMMARY_QUESTION};
