//! Shared fast tier.
//!
//! Conversations live in a network-shared list store so every backend
//! instance sees the same history. Regular turns are kept in one list per
//! conversation, trimmed to the per-conversation bound on each append. A
//! summary turn, if any, lives under a sibling key so trimming never drops
//! it. Both keys have their TTL refreshed on every read and write.

pub mod redis_store;
pub mod store;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clinichat_core::{
    ClinichatResult, ConversationTurn, SharedTierConfig, StorageError, TierStats,
};

use super::traits::CacheBackend;

pub use redis_store::{RedisListStore, RedisStoreError};
pub use store::{InMemoryListStore, ListStoreStats, SharedListStore};

/// Marker placed between the key prefix and the conversation id for summaries.
const SUMMARY_MARKER: &str = "~summary:";

/// History tier over a [`SharedListStore`].
pub struct SharedTier {
    store: Arc<dyn SharedListStore>,
    key_prefix: String,
    ttl: Duration,
    io_timeout: Duration,
    max_turns: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    malformed: AtomicU64,
    consecutive_failures: AtomicU64,
}

impl SharedTier {
    pub const NAME: &'static str = "shared";

    pub fn new(store: Arc<dyn SharedListStore>, config: &SharedTierConfig, max_turns: usize) -> Self {
        Self {
            store,
            key_prefix: config.key_prefix.clone(),
            ttl: config.ttl,
            io_timeout: config.io_timeout,
            max_turns: max_turns.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            malformed: AtomicU64::new(0),
            consecutive_failures: AtomicU64::new(0),
        }
    }

    pub fn list_key(&self, conversation_id: &str) -> String {
        format!("{}{}", self.key_prefix, conversation_id)
    }

    pub fn summary_key(&self, conversation_id: &str) -> String {
        format!("{}{}{}", self.key_prefix, SUMMARY_MARKER, conversation_id)
    }

    fn keys(&self, conversation_id: &str) -> [String; 2] {
        [self.list_key(conversation_id), self.summary_key(conversation_id)]
    }

    /// Run a store call under the I/O timeout and track tier health.
    async fn guarded<T, F>(&self, operation: &'static str, fut: F) -> ClinichatResult<T>
    where
        F: Future<Output = ClinichatResult<T>> + Send,
    {
        let result = match tokio::time::timeout(self.io_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout {
                tier: Self::NAME.to_string(),
                operation: operation.to_string(),
                after_ms: self.io_timeout.as_millis() as u64,
            }
            .into()),
        };
        if result.is_ok() {
            self.consecutive_failures.store(0, Ordering::Relaxed);
        } else {
            self.consecutive_failures.fetch_add(1, Ordering::Relaxed);
        }
        result
    }

    /// Decode stored items, skipping (and logging) anything unreadable.
    fn decode(&self, conversation_id: &str, raw: Vec<String>, want_summary: bool) -> Vec<ConversationTurn> {
        let mut turns = Vec::with_capacity(raw.len());
        for item in raw {
            match serde_json::from_str::<ConversationTurn>(&item) {
                Ok(turn) if turn.is_summary() == want_summary => turns.push(turn),
                Ok(_) => {
                    self.malformed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        conversation_id,
                        tier = Self::NAME,
                        operation = "get",
                        "skipping turn stored under the wrong key"
                    );
                }
                Err(e) => {
                    self.malformed.fetch_add(1, Ordering::Relaxed);
                    let err = StorageError::MalformedEntry {
                        tier: Self::NAME.to_string(),
                        reason: e.to_string(),
                    };
                    tracing::warn!(
                        conversation_id,
                        tier = Self::NAME,
                        operation = "get",
                        error = %err,
                        "skipping malformed cached turn"
                    );
                }
            }
        }
        turns
    }

    fn encode(turn: &ConversationTurn) -> ClinichatResult<String> {
        serde_json::to_string(turn).map_err(|e| {
            StorageError::MalformedEntry {
                tier: Self::NAME.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

#[async_trait]
impl CacheBackend for SharedTier {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn supports_write(&self) -> bool {
        true
    }

    async fn get(&self, conversation_id: &str) -> ClinichatResult<Option<Vec<ConversationTurn>>> {
        let [list_key, summary_key] = self.keys(conversation_id);

        let items = self.guarded("get", self.store.fetch(&list_key)).await?;
        let summary = self.guarded("get", self.store.fetch(&summary_key)).await?;

        if items.is_none() && summary.is_none() {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        let keys = [list_key, summary_key];
        if let Err(e) = self.guarded("touch", self.store.touch(&keys, self.ttl)).await {
            tracing::warn!(
                conversation_id,
                tier = Self::NAME,
                operation = "touch",
                error = %e,
                "failed to refresh ttl"
            );
        }

        let mut turns = self.decode(conversation_id, summary.unwrap_or_default(), true);
        // Only the newest summary is meaningful.
        if turns.len() > 1 {
            turns.drain(..turns.len() - 1);
        }
        turns.extend(self.decode(conversation_id, items.unwrap_or_default(), false));

        self.hits.fetch_add(1, Ordering::Relaxed);
        Ok(Some(turns))
    }

    async fn add(&self, conversation_id: &str, turn: ConversationTurn) -> ClinichatResult<()> {
        let [list_key, summary_key] = self.keys(conversation_id);
        let encoded = Self::encode(&turn)?;

        if turn.is_summary() {
            return self
                .guarded(
                    "add",
                    self.store.overwrite(&summary_key, vec![encoded], self.ttl),
                )
                .await;
        }

        self.guarded(
            "add",
            self.store.push(&list_key, encoded, self.max_turns, self.ttl),
        )
        .await?;
        if let Err(e) = self
            .guarded("touch", self.store.touch(&[summary_key], self.ttl))
            .await
        {
            tracing::warn!(
                conversation_id,
                tier = Self::NAME,
                operation = "touch",
                error = %e,
                "failed to refresh summary ttl"
            );
        }
        Ok(())
    }

    async fn backfill(
        &self,
        conversation_id: &str,
        turns: Vec<ConversationTurn>,
    ) -> ClinichatResult<()> {
        let [list_key, summary_key] = self.keys(conversation_id);

        let (summaries, regular): (Vec<_>, Vec<_>) =
            turns.into_iter().partition(ConversationTurn::is_summary);
        let items = regular
            .iter()
            .map(Self::encode)
            .collect::<ClinichatResult<Vec<_>>>()?;

        self.guarded(
            "backfill",
            self.store
                .prepend_missing(&list_key, items, self.max_turns, self.ttl),
        )
        .await?;
        if let Some(summary) = summaries.last() {
            // Keeping one item lets a summary written since the miss win.
            self.guarded(
                "backfill",
                self.store
                    .prepend_missing(&summary_key, vec![Self::encode(summary)?], 1, self.ttl),
            )
            .await?;
        }
        Ok(())
    }

    async fn clear(&self, conversation_id: &str) -> ClinichatResult<()> {
        let keys = self.keys(conversation_id);
        self.guarded("clear", self.store.delete(&keys)).await
    }

    async fn stats(&self) -> TierStats {
        let summary_prefix = format!("{}{}", self.key_prefix, SUMMARY_MARKER);
        let all = self.guarded("stats", self.store.keyspace(&self.key_prefix)).await;
        let summaries = self.guarded("stats", self.store.keyspace(&summary_prefix)).await;

        let failures = self.consecutive_failures.load(Ordering::Relaxed);
        let stats = match (all, summaries) {
            (Ok(all), Ok(summaries)) => TierStats {
                available: failures == 0,
                sessions: all.keys.saturating_sub(summaries.keys),
                turns: all.items,
                estimated_bytes: all.memory_bytes.unwrap_or(0),
                ..TierStats::new(Self::NAME)
            }
            .with_detail("summaries", summaries.keys),
            (Err(e), _) | (_, Err(e)) => TierStats::failed(Self::NAME, e),
        };

        TierStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            ..stats
        }
        .with_detail("store", self.store.describe())
        .with_detail("key_prefix", self.key_prefix.clone())
        .with_detail("ttl_seconds", self.ttl.as_secs())
        .with_detail("max_turns", self.max_turns as u64)
        .with_detail("malformed_entries", self.malformed.load(Ordering::Relaxed))
        .with_detail("consecutive_failures", failures)
    }

    async fn close(&self) {
        self.store.close().await;
    }
}

// ============================================================================
// TESTS
// ============================================================================
