//! Process-local history tier.
//!
//! Each conversation owns a bounded buffer behind its own mutex, so appends
//! to different conversations never contend while appends and reads on the
//! same conversation are serialized.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use clinichat_core::{
    ClinichatResult, ConversationTurn, StorageError, TierStats, DEFAULT_MAX_TURNS,
};
use dashmap::DashMap;

use super::traits::CacheBackend;

/// Bounded turn buffer for one conversation.
///
/// A summary turn is pinned in front of the raw turns and does not count
/// toward the capacity.
#[derive(Debug, Default)]
struct ConversationBuffer {
    summary: Option<ConversationTurn>,
    turns: VecDeque<ConversationTurn>,
}

impl ConversationBuffer {
    /// Push a turn, returning how many raw turns were evicted.
    fn push(&mut self, turn: ConversationTurn, capacity: usize) -> u64 {
        if turn.is_summary() {
            self.summary = Some(turn);
            return 0;
        }
        self.turns.push_back(turn);
        let mut evicted = 0;
        while self.turns.len() > capacity {
            self.turns.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Put `loaded` in front of the held turns, skipping any already held.
    ///
    /// A held summary is newer than anything loaded and is kept.
    fn merge_front(&mut self, loaded: Vec<ConversationTurn>, capacity: usize) -> u64 {
        let mut merged = ConversationBuffer {
            summary: self.summary.take(),
            turns: VecDeque::with_capacity(loaded.len() + self.turns.len()),
        };
        for turn in loaded {
            if turn.is_summary() {
                merged.summary.get_or_insert(turn);
            } else if !self.turns.contains(&turn) {
                merged.turns.push_back(turn);
            }
        }
        merged.turns.append(&mut self.turns);

        let mut evicted = 0;
        while merged.turns.len() > capacity {
            merged.turns.pop_front();
            evicted += 1;
        }
        *self = merged;
        evicted
    }

    fn snapshot(&self) -> Vec<ConversationTurn> {
        self.summary
            .iter()
            .chain(self.turns.iter())
            .cloned()
            .collect()
    }

    fn len(&self) -> usize {
        self.turns.len() + usize::from(self.summary.is_some())
    }

    fn estimated_size(&self) -> usize {
        self.summary
            .iter()
            .chain(self.turns.iter())
            .map(ConversationTurn::estimated_size)
            .sum()
    }
}

type SharedBuffer = Arc<Mutex<ConversationBuffer>>;

/// In-memory tier: always available, lost on restart.
pub struct InMemoryTier {
    buffers: DashMap<String, SharedBuffer>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl InMemoryTier {
    pub const NAME: &'static str = "memory";

    /// Create a tier keeping at most `capacity` raw turns per conversation.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: DashMap::new(),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of conversations currently held.
    pub fn session_count(&self) -> usize {
        self.buffers.len()
    }

    fn buffer(&self, conversation_id: &str) -> Option<SharedBuffer> {
        // Clone the Arc so the map shard lock is released before locking the buffer.
        self.buffers.get(conversation_id).map(|b| Arc::clone(b.value()))
    }

    fn buffer_or_insert(&self, conversation_id: &str) -> SharedBuffer {
        Arc::clone(
            self.buffers
                .entry(conversation_id.to_string())
                .or_default()
                .value(),
        )
    }
}

impl Default for InMemoryTier {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS)
    }
}

#[async_trait]
impl CacheBackend for InMemoryTier {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn supports_write(&self) -> bool {
        true
    }

    async fn get(&self, conversation_id: &str) -> ClinichatResult<Option<Vec<ConversationTurn>>> {
        let Some(buffer) = self.buffer(conversation_id) else {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };
        let turns = buffer
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?
            .snapshot();
        self.hits.fetch_add(1, Ordering::Relaxed);
        Ok(Some(turns))
    }

    async fn add(&self, conversation_id: &str, turn: ConversationTurn) -> ClinichatResult<()> {
        let buffer = self.buffer_or_insert(conversation_id);
        let evicted = buffer
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?
            .push(turn, self.capacity);
        if evicted > 0 {
            self.evictions.fetch_add(evicted, Ordering::Relaxed);
            tracing::debug!(
                conversation_id,
                tier = Self::NAME,
                evicted,
                "evicted oldest turns over capacity"
            );
        }
        Ok(())
    }

    async fn backfill(
        &self,
        conversation_id: &str,
        turns: Vec<ConversationTurn>,
    ) -> ClinichatResult<()> {
        let buffer = self.buffer_or_insert(conversation_id);
        let evicted = buffer
            .lock()
            .map_err(|_| StorageError::LockPoisoned)?
            .merge_front(turns, self.capacity);
        self.evictions.fetch_add(evicted, Ordering::Relaxed);
        Ok(())
    }

    async fn clear(&self, conversation_id: &str) -> ClinichatResult<()> {
        self.buffers.remove(conversation_id);
        Ok(())
    }

    async fn stats(&self) -> TierStats {
        let mut turns = 0u64;
        let mut bytes = 0u64;
        let mut poisoned = 0usize;
        for entry in self.buffers.iter() {
            match entry.value().lock() {
                Ok(buffer) => {
                    turns += buffer.len() as u64;
                    bytes += buffer.estimated_size() as u64;
                }
                Err(_) => poisoned += 1,
            }
        }

        let mut stats = TierStats {
            sessions: self.buffers.len() as u64,
            turns,
            estimated_bytes: bytes,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            ..TierStats::new(Self::NAME)
        }
        .with_detail("capacity", self.capacity as u64);
        if poisoned > 0 {
            stats.error = Some(format!("{} conversation buffers poisoned", poisoned));
        }
        stats
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn turn(i: usize) -> ConversationTurn {
        ConversationTurn::new("c1", format!("Q{}", i), format!("A{}", i))
    }

    #[tokio::test]
    async fn test_unknown_conversation_is_absent() {
        let tier = InMemoryTier::new(3);
        assert_eq!(tier.get("nope").await.unwrap(), None);
        assert_eq!(tier.stats().await.misses, 1);
    }

    #[tokio::test]
    async fn test_add_then_get_preserves_order() {
        let tier = InMemoryTier::new(5);
        for i in 0..3 {
            tier.add("c1", turn(i)).await.unwrap();
        }
        let turns = tier.get("c1").await.unwrap().unwrap();
        let queries: Vec<_> = turns.iter().map(|t| t.query.as_str()).collect();
        assert_eq!(queries, vec!["Q0", "Q1", "Q2"]);
    }

    #[tokio::test]
    async fn test_oldest_evicted_over_capacity() {
        let tier = InMemoryTier::new(3);
        for i in 0..5 {
            tier.add("c1", turn(i)).await.unwrap();
        }
        let turns = tier.get("c1").await.unwrap().unwrap();
        let queries: Vec<_> = turns.iter().map(|t| t.query.as_str()).collect();
        assert_eq!(queries, vec!["Q2", "Q3", "Q4"]);
        assert_eq!(tier.stats().await.evictions, 2);
    }

    #[tokio::test]
    async fn test_summary_pinned_in_front() {
        let tier = InMemoryTier::new(2);
        tier.backfill(
            "c1",
            vec![ConversationTurn::summary("c1", "earlier", 25), turn(0), turn(1)],
        )
        .await
        .unwrap();
        tier.add("c1", turn(2)).await.unwrap();

        let turns = tier.get("c1").await.unwrap().unwrap();
        assert_eq!(turns.len(), 3);
        assert!(turns[0].is_summary());
        assert_eq!(turns[1].query, "Q1");
        assert_eq!(turns[2].query, "Q2");
    }

    #[tokio::test]
    async fn test_backfill_keeps_turns_added_after_miss() {
        let tier = InMemoryTier::new(5);
        let loaded = vec![turn(0), turn(1)];
        tier.add("c1", turn(2)).await.unwrap();
        tier.backfill("c1", loaded.clone()).await.unwrap();

        let turns = tier.get("c1").await.unwrap().unwrap();
        let queries: Vec<_> = turns.iter().map(|t| t.query.as_str()).collect();
        assert_eq!(queries, vec!["Q0", "Q1", "Q2"]);

        // A second reader back-filling the same snapshot adds nothing.
        tier.backfill("c1", loaded).await.unwrap();
        assert_eq!(tier.get("c1").await.unwrap().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_backfill_keeps_held_summary_and_capacity() {
        let tier = InMemoryTier::new(2);
        tier.add("c1", ConversationTurn::summary("c1", "newer", 30))
            .await
            .unwrap();
        tier.add("c1", turn(5)).await.unwrap();
        tier.backfill(
            "c1",
            vec![ConversationTurn::summary("c1", "older", 20), turn(3), turn(4)],
        )
        .await
        .unwrap();

        let turns = tier.get("c1").await.unwrap().unwrap();
        assert_eq!(turns[0].response, "newer");
        let queries: Vec<_> = turns[1..].iter().map(|t| t.query.as_str()).collect();
        assert_eq!(queries, vec!["Q4", "Q5"]);
        assert_eq!(tier.stats().await.evictions, 1);
    }

    #[tokio::test]
    async fn test_clear_only_touches_one_conversation() {
        let tier = InMemoryTier::new(3);
        tier.add("c1", turn(0)).await.unwrap();
        tier.add("c2", turn(0)).await.unwrap();
        tier.clear("c1").await.unwrap();
        assert_eq!(tier.get("c1").await.unwrap(), None);
        assert!(tier.get("c2").await.unwrap().is_some());
        assert_eq!(tier.session_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_appends_are_not_lost() {
        let tier = Arc::new(InMemoryTier::new(1000));
        let mut handles = Vec::new();
        for worker in 0..8 {
            let tier = Arc::clone(&tier);
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    let t = ConversationTurn::new("shared", format!("w{}-{}", worker, i), "a");
                    tier.add("shared", t).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(tier.get("shared").await.unwrap().unwrap().len(), 200);
    }

    #[tokio::test]
    async fn test_stats_count_sessions_and_turns() {
        let tier = InMemoryTier::new(3);
        tier.add("c1", turn(0)).await.unwrap();
        tier.add("c1", turn(1)).await.unwrap();
        tier.add("c2", turn(0)).await.unwrap();
        let stats = tier.stats().await;
        assert_eq!(stats.sessions, 2);
        assert_eq!(stats.turns, 3);
        assert!(stats.estimated_bytes > 0);
        assert!(stats.error.is_none());
    }

    proptest! {
        #[test]
        fn prop_never_exceeds_capacity(capacity in 1usize..40, adds in 0usize..120) {
            let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
            rt.block_on(async {
                let tier = InMemoryTier::new(capacity);
                for i in 0..adds {
                    tier.add("c1", turn(i)).await.unwrap();
                }
                let held = tier.get("c1").await.unwrap().map(|t| t.len()).unwrap_or(0);
                prop_assert_eq!(held, adds.min(capacity));
                if adds > 0 {
                    let turns = tier.get("c1").await.unwrap().unwrap();
                    let last = turns.last().map(|t| t.query.clone());
                    prop_assert_eq!(last, Some(format!("Q{}", adds - 1)));
                }
                Ok(())
            })?;
        }
    }
}
