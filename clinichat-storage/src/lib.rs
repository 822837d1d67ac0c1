//! Clinichat Storage - Conversation History Cache
//!
//! Tiered storage for the turns of clinical-notes conversations. The
//! orchestrator reads fast tiers before slow ones, back-fills on a slow hit,
//! and writes only to the fast tiers. The durable message log is owned by
//! another process and is only ever read, apart from appending generated
//! summaries.

pub mod cache;

pub use cache::{
    CacheBackend, ConversationSummarizer, DurableLogTier, HistoryCache, InMemoryListStore,
    InMemoryMessageLog, InMemoryTier, MessageLog, MessageRole, MessageRow, PostgresMessageLog,
    RedisListStore, SharedListStore, SharedTier, DEFAULT_CLEAR_TTL,
};
