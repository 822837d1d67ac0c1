//! The history cache: one read/write contract over an ordered list of tiers.
//!
//! Reads walk the tiers fastest first and stop at the first hit. A hit from a
//! slower tier is merged into the fastest writable tier that reported a miss,
//! falling back to the next such tier if it fails, so the next read is served
//! there. Writes go to the primary writable tier, falling back to the next
//! writable tier if it fails. Tier failures are logged and never reach
//! the caller; only a missing conversation id does.
//!
//! Clearing a session hides the read-only tiers for that conversation until
//! the next saved response, so a cleared conversation reads back empty
//! instead of being reloaded from the durable log. The mark expires after
//! the clear TTL, which bounds how many cleared ids are remembered.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clinichat_core::{
    to_history_entries, CacheStatistics, ClinichatResult, ConversationTurn, HistoryEntry,
    ValidationError,
};
use dashmap::DashMap;
use tokio::time::Instant;

use super::traits::CacheBackend;

/// How long a cleared conversation stays hidden from read-only tiers.
pub const DEFAULT_CLEAR_TTL: Duration = Duration::from_secs(3600);

/// Multi-tier conversation history cache.
///
/// Composition is a configuration choice: `[memory]`, `[memory, durable_log]`
/// and `[shared, memory, durable_log]` are all the same type.
pub struct HistoryCache {
    tiers: Vec<Arc<dyn CacheBackend>>,
    tier_hits: Vec<AtomicU64>,
    /// Conversations cleared since their last saved response, with expiry
    cleared: DashMap<String, Instant>,
    clear_ttl: Duration,
    total_requests: AtomicU64,
    new_conversations: AtomicU64,
}

impl HistoryCache {
    /// Build a cache over `tiers`, listed fastest first.
    pub fn new(tiers: Vec<Arc<dyn CacheBackend>>) -> Self {
        let tier_hits = tiers.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            tiers,
            tier_hits,
            cleared: DashMap::new(),
            clear_ttl: DEFAULT_CLEAR_TTL,
            total_requests: AtomicU64::new(0),
            new_conversations: AtomicU64::new(0),
        }
    }

    /// Keep cleared conversations hidden from read-only tiers for `ttl`.
    pub fn with_clear_ttl(mut self, ttl: Duration) -> Self {
        self.clear_ttl = ttl;
        self
    }

    pub fn tier_names(&self) -> Vec<&str> {
        self.tiers.iter().map(|t| t.name()).collect()
    }

    fn require_id(conversation_id: &str) -> ClinichatResult<&str> {
        let id = conversation_id.trim();
        if id.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "conversation_id".to_string(),
            }
            .into());
        }
        Ok(id)
    }

    fn is_cleared(&self, id: &str) -> bool {
        let now = Instant::now();
        match self.cleared.get(id).map(|expires| *expires.value()) {
            Some(expires) if expires > now => true,
            Some(_) => {
                self.cleared.remove_if(id, |_, expires| *expires <= now);
                false
            }
            None => false,
        }
    }

    /// Number of conversations currently hidden from read-only tiers.
    pub fn cleared_count(&self) -> usize {
        self.cleared.len()
    }

    /// Prior turns for a conversation, oldest first, summary leading.
    ///
    /// Returns an empty sequence for a conversation no tier knows about.
    /// Nothing is written in that case.
    pub async fn get_history(&self, conversation_id: &str) -> ClinichatResult<Vec<ConversationTurn>> {
        let id = Self::require_id(conversation_id)?;
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let cleared = self.is_cleared(id);
        let mut missed = Vec::new();

        for (index, tier) in self.tiers.iter().enumerate() {
            if cleared && !tier.supports_write() {
                continue;
            }
            match tier.get(id).await {
                Ok(Some(turns)) => {
                    self.tier_hits[index].fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        conversation_id = id,
                        tier = tier.name(),
                        turns = turns.len(),
                        "history cache hit"
                    );
                    self.backfill(id, index, &missed, &turns).await;
                    return Ok(turns);
                }
                Ok(None) => {
                    if tier.supports_write() {
                        missed.push(index);
                    }
                    tracing::debug!(conversation_id = id, tier = tier.name(), "history cache miss");
                }
                Err(e) => {
                    tracing::warn!(
                        conversation_id = id,
                        tier = tier.name(),
                        operation = "get",
                        error = %e,
                        "tier read failed, trying next tier"
                    );
                }
            }
        }

        self.new_conversations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(conversation_id = id, "no tier has history, new conversation");
        Ok(Vec::new())
    }

    /// Merge a hit into the first writable tier in `missed` that accepts it.
    ///
    /// Tiers that failed the read are not in `missed` and are skipped.
    async fn backfill(
        &self,
        id: &str,
        hit_index: usize,
        missed: &[usize],
        turns: &[ConversationTurn],
    ) {
        for &index in missed {
            let tier = &self.tiers[index];
            match tier.backfill(id, turns.to_vec()).await {
                Ok(()) => {
                    tracing::debug!(
                        conversation_id = id,
                        tier = tier.name(),
                        from = self.tiers[hit_index].name(),
                        turns = turns.len(),
                        "back-filled history"
                    );
                    return;
                }
                Err(e) => tracing::warn!(
                    conversation_id = id,
                    tier = tier.name(),
                    operation = "backfill",
                    error = %e,
                    "back-fill failed, trying next writable tier"
                ),
            }
        }
    }

    /// [`get_history`](Self::get_history) rendered for the LLM step.
    pub async fn get_history_entries(&self, conversation_id: &str) -> ClinichatResult<Vec<HistoryEntry>> {
        let turns = self.get_history(conversation_id).await?;
        Ok(to_history_entries(&turns))
    }

    /// Record a new exchange in the fastest writable tier.
    pub async fn save_response<I, S>(
        &self,
        conversation_id: &str,
        query: &str,
        response: &str,
        used_resources: I,
    ) -> ClinichatResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let id = Self::require_id(conversation_id)?;
        let turn = ConversationTurn::new(id, query, response).with_resources(used_resources);

        for tier in self.tiers.iter().filter(|t| t.supports_write()) {
            match tier.add(id, turn.clone()).await {
                Ok(()) => {
                    self.cleared.remove(id);
                    tracing::debug!(conversation_id = id, tier = tier.name(), "saved response");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(
                        conversation_id = id,
                        tier = tier.name(),
                        operation = "add",
                        error = %e,
                        "tier write failed, trying next writable tier"
                    );
                }
            }
        }

        tracing::error!(
            conversation_id = id,
            operation = "add",
            "no writable tier accepted the turn"
        );
        Ok(())
    }

    /// Forget a conversation in every writable tier. The durable log is untouched.
    pub async fn clear_session(&self, conversation_id: &str) -> ClinichatResult<()> {
        let id = Self::require_id(conversation_id)?;
        let now = Instant::now();
        self.cleared.retain(|_, expires| *expires > now);
        self.cleared.insert(id.to_string(), now + self.clear_ttl);
        self.clear_writable(id).await;
        tracing::info!(conversation_id = id, "session cleared");
        Ok(())
    }

    async fn clear_writable(&self, id: &str) {
        for tier in self.tiers.iter().filter(|t| t.supports_write()) {
            if let Err(e) = tier.clear(id).await {
                tracing::warn!(
                    conversation_id = id,
                    tier = tier.name(),
                    operation = "clear",
                    error = %e,
                    "tier clear failed"
                );
            }
        }
    }

    /// Drop cached copies and reload from the slower tiers.
    ///
    /// Turns that exist only in the fast tiers are lost. Also lifts an
    /// earlier `clear_session`.
    pub async fn refresh(&self, conversation_id: &str) -> ClinichatResult<Vec<ConversationTurn>> {
        let id = Self::require_id(conversation_id)?;
        self.cleared.remove(id);
        self.clear_writable(id).await;
        self.get_history(id).await
    }

    pub async fn stats(&self) -> CacheStatistics {
        let mut tiers = Vec::with_capacity(self.tiers.len());
        let mut hits = BTreeMap::new();
        for (tier, counter) in self.tiers.iter().zip(&self.tier_hits) {
            tiers.push(tier.stats().await);
            hits.insert(tier.name().to_string(), counter.load(Ordering::Relaxed));
        }
        CacheStatistics::merge(
            tiers,
            hits,
            self.total_requests.load(Ordering::Relaxed),
            self.new_conversations.load(Ordering::Relaxed),
        )
    }

    /// Release every tier's connections.
    pub async fn shutdown(&self) {
        for tier in &self.tiers {
            tier.close().await;
        }
        tracing::info!(tiers = ?self.tier_names(), "history cache shut down");
    }
}

impl std::fmt::Debug for HistoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryCache")
            .field("tiers", &self.tier_names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::durable_log::{DurableLogTier, InMemoryMessageLog};
    use crate::cache::memory::InMemoryTier;
    use clinichat_core::DurableLogConfig;
    use clinichat_test_utils::assertions::assert_validation_error;
    use clinichat_test_utils::fixtures::pairs;

    fn memory_and_log(log: Arc<InMemoryMessageLog>) -> (HistoryCache, Arc<InMemoryTier>) {
        let memory = Arc::new(InMemoryTier::new(30));
        let durable = Arc::new(DurableLogTier::new(log, &DurableLogConfig::default()));
        let tiers: Vec<Arc<dyn CacheBackend>> = vec![memory.clone(), durable];
        (HistoryCache::new(tiers), memory)
    }

    fn memory_only() -> HistoryCache {
        let tiers: Vec<Arc<dyn CacheBackend>> = vec![Arc::new(InMemoryTier::default())];
        HistoryCache::new(tiers)
    }

    #[tokio::test]
    async fn test_blank_id_is_caller_error() {
        let cache = memory_only();
        let err = cache.get_history("  ").await.unwrap_err();
        assert!(err.is_caller_error());
        assert_validation_error(&cache.save_response("", "q", "a", Vec::<String>::new()).await);
        assert_validation_error(&cache.clear_session("\t").await);
    }

    #[tokio::test]
    async fn test_new_conversation_writes_nothing() {
        let log = Arc::new(InMemoryMessageLog::new());
        let (cache, memory) = memory_and_log(log);
        assert!(cache.get_history("123").await.unwrap().is_empty());
        assert_eq!(memory.session_count(), 0);

        let stats = cache.stats().await;
        assert_eq!(stats.new_conversations, 1);
        assert_eq!(stats.total_requests, 1);
    }

    #[tokio::test]
    async fn test_log_hit_backfills_memory() {
        let log = Arc::new(InMemoryMessageLog::new());
        log.append_exchange(42, "Q1", "A1");
        let (cache, memory) = memory_and_log(log.clone());

        let first = cache.get_history("42").await.unwrap();
        assert_eq!(memory.session_count(), 1);
        let second = cache.get_history("42").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(log.fetch_count(), 1);

        let stats = cache.stats().await;
        assert_eq!(stats.tier_hits["durable_log"], 1);
        assert_eq!(stats.tier_hits["memory"], 1);
    }

    #[tokio::test]
    async fn test_save_skips_read_only_tier() {
        let log = Arc::new(InMemoryMessageLog::new());
        let (cache, _memory) = memory_and_log(log.clone());
        cache
            .save_response("42", "Q", "A", ["notes", "notes", "labs"])
            .await
            .unwrap();

        let turns = cache.get_history("42").await.unwrap();
        assert_eq!(turns[0].used_resources, vec!["notes", "labs"]);
        assert_eq!(log.fetch_count(), 0);
    }

    #[tokio::test]
    async fn test_refresh_reloads_from_log() {
        let log = Arc::new(InMemoryMessageLog::new());
        log.append_exchange(42, "Q1", "A1");
        let (cache, _memory) = memory_and_log(log.clone());
        cache.save_response("42", "Q2", "A2", Vec::<String>::new()).await.unwrap();

        let turns = cache.refresh("42").await.unwrap();
        assert_eq!(pairs(&turns), vec![("Q1".to_string(), "A1".to_string())]);
        assert_eq!(log.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_entries_shape() {
        let cache = memory_only();
        cache.save_response("s", "Q", "A", Vec::<String>::new()).await.unwrap();
        let entries = cache.get_history_entries("s").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].question, "Q");
        assert_eq!(entries[0].is_summary, None);
    }

    #[tokio::test]
    async fn test_cleared_session_not_reloaded_from_log() {
        let log = Arc::new(InMemoryMessageLog::new());
        log.append_exchange(42, "Q1", "A1");
        let (cache, _memory) = memory_and_log(log.clone());
        assert_eq!(cache.get_history("42").await.unwrap().len(), 1);

        cache.clear_session("42").await.unwrap();
        assert!(cache.get_history("42").await.unwrap().is_empty());
        assert_eq!(log.fetch_count(), 1);

        cache.save_response("42", "Q2", "A2", Vec::<String>::new()).await.unwrap();
        let turns = cache.get_history("42").await.unwrap();
        assert_eq!(pairs(&turns), vec![("Q2".to_string(), "A2".to_string())]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_mark_expires() {
        let log = Arc::new(InMemoryMessageLog::new());
        log.append_exchange(42, "Q1", "A1");
        let (cache, _memory) = memory_and_log(log.clone());
        let cache = cache.with_clear_ttl(Duration::from_secs(60));

        cache.clear_session("42").await.unwrap();
        assert!(cache.get_history("42").await.unwrap().is_empty());
        assert_eq!(log.fetch_count(), 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(cache.get_history("42").await.unwrap().len(), 1);
        assert_eq!(log.fetch_count(), 1);
        assert_eq!(cache.cleared_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_prunes_expired_marks() {
        let cache = memory_only().with_clear_ttl(Duration::from_secs(60));
        cache.clear_session("a").await.unwrap();
        cache.clear_session("b").await.unwrap();
        assert_eq!(cache.cleared_count(), 2);

        tokio::time::advance(Duration::from_secs(61)).await;
        cache.clear_session("c").await.unwrap();
        assert_eq!(cache.cleared_count(), 1);
    }

    #[test]
    fn test_tier_names_in_read_order() {
        let log = Arc::new(InMemoryMessageLog::new());
        let (cache, _) = memory_and_log(log);
        assert_eq!(cache.tier_names(), vec!["memory", "durable_log"]);
    }
}
