//! Multi-tier conversation history cache.
//!
//! Three kinds of tier implement one [`CacheBackend`] contract:
//!
//! - [`InMemoryTier`]: bounded per-conversation buffers, always present
//! - [`SharedTier`]: lists in a network-shared store with expiry, so several
//!   backend instances see the same history
//! - [`DurableLogTier`]: read-only reconstruction from the relational message
//!   log, optionally condensed by a [`ConversationSummarizer`]
//!
//! [`HistoryCache`] composes any ordered selection of them.
//!
//! # Example
//!
//! ```ignore
//! let tiers: Vec<Arc<dyn CacheBackend>> = vec![
//!     Arc::new(InMemoryTier::new(30)),
//!     Arc::new(DurableLogTier::new(log, &config.durable_log)),
//! ];
//! let cache = HistoryCache::new(tiers);
//!
//! let history = cache.get_history_entries("42").await?;
//! cache.save_response("42", "Q3", "A3", ["notes"]).await?;
//! ```

pub mod durable_log;
pub mod memory;
pub mod orchestrator;
pub mod shared;
pub mod summarizer;
pub mod traits;

pub use durable_log::{
    reconstruct, DurableLogTier, InMemoryMessageLog, LogStats, MessageLog, MessageRole,
    MessageRow, PostgresMessageLog, Reconstruction, SummaryRecord,
};
pub use memory::InMemoryTier;
pub use orchestrator::{HistoryCache, DEFAULT_CLEAR_TTL};
pub use shared::{InMemoryListStore, ListStoreStats, RedisListStore, SharedListStore, SharedTier};
pub use summarizer::ConversationSummarizer;
pub use traits::CacheBackend;
