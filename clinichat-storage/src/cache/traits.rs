//! Cache backend contract shared by every history tier.

use async_trait::async_trait;
use clinichat_core::{ClinichatResult, ConversationTurn, TierStats};

/// One storage tier in the history cache's fallback chain.
///
/// Implementations must be thread-safe and confine side effects to their own
/// storage. Errors returned here are tier-local: the orchestrator logs them
/// and treats the tier as a miss (reads) or skips it (writes).
///
/// # Absent vs empty
///
/// `get` returns `Ok(None)` when the tier has never seen the conversation (or
/// it expired), which is distinct from `Ok(Some(vec![]))`.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Tier name used in logs and statistics.
    fn name(&self) -> &str;

    /// Whether `add`, `backfill` and `clear` change anything.
    ///
    /// Read-only tiers still accept those calls, log them, and do nothing.
    fn supports_write(&self) -> bool;

    /// Ordered turns for a conversation, summary first when present.
    async fn get(&self, conversation_id: &str) -> ClinichatResult<Option<Vec<ConversationTurn>>>;

    /// Append one turn.
    async fn add(&self, conversation_id: &str, turn: ConversationTurn) -> ClinichatResult<()>;

    /// Merge a sequence read from a slower tier in front of what this tier holds.
    ///
    /// Turns already held are not duplicated, and turns added since this tier
    /// reported a miss stay after the loaded ones. An already held summary
    /// wins over the loaded one. Must be atomic for the conversation.
    async fn backfill(
        &self,
        conversation_id: &str,
        turns: Vec<ConversationTurn>,
    ) -> ClinichatResult<()>;

    /// Remove everything this tier holds for the conversation.
    async fn clear(&self, conversation_id: &str) -> ClinichatResult<()>;

    /// Current statistics. Never fails; problems go into `TierStats::error`.
    async fn stats(&self) -> TierStats;

    /// Release pooled connections. Called once at shutdown.
    async fn close(&self) {}
}

// ============================================================================
// TESTS
// ============================================================================
