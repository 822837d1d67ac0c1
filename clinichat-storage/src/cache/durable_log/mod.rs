//! Durable-log reader tier.
//!
//! Read-only view over the externally populated message log. Reads fetch a
//! conversation's rows, rebuild turns from them, and either summarize or cap
//! the result. The tier never writes turns; the only write it performs is
//! appending a generated summary through [`MessageLog::insert_summary`].
//!
//! The log is keyed by numeric conversation ids. A non-numeric id resolves
//! to "no data" without touching the log.

pub mod log;
pub mod postgres;
pub mod reconstruct;

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clinichat_core::{
    ClinichatResult, ConversationTurn, DurableLogConfig, ReconstructionStrategy, StorageError,
    TierStats,
};
use dashmap::DashMap;
use tokio::sync::Mutex;

use super::summarizer::ConversationSummarizer;
use super::traits::CacheBackend;

pub use log::{
    InMemoryMessageLog, LogStats, MessageLog, MessageRole, MessageRow, SummaryMeta, SummaryRecord,
    SUMMARY_ROW_QUERY,
};
pub use postgres::{create_pool, PostgresLogError, PostgresMessageLog};
pub use reconstruct::{reconstruct, LoggedTurn, Reconstruction, StoredSummary};

/// History tier reading from a [`MessageLog`].
pub struct DurableLogTier {
    log: Arc<dyn MessageLog>,
    summarizer: Option<Arc<ConversationSummarizer>>,
    strategy: ReconstructionStrategy,
    max_turns: usize,
    io_timeout: Duration,
    persist_summaries: bool,
    /// One reader per log conversation at a time, so a summary is generated once
    in_flight: DashMap<i64, Arc<Mutex<()>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    summaries_generated: AtomicU64,
    summaries_reused: AtomicU64,
}

impl DurableLogTier {
    pub const NAME: &'static str = "durable_log";

    pub fn new(log: Arc<dyn MessageLog>, config: &DurableLogConfig) -> Self {
        Self {
            log,
            summarizer: None,
            strategy: config.strategy,
            max_turns: config.max_turns.max(1),
            io_timeout: config.io_timeout,
            persist_summaries: config.persist_summaries,
            in_flight: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            summaries_generated: AtomicU64::new(0),
            summaries_reused: AtomicU64::new(0),
        }
    }

    pub fn with_summarizer(mut self, summarizer: Arc<ConversationSummarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn summarizer(&self) -> Option<&Arc<ConversationSummarizer>> {
        self.summarizer.as_ref()
    }

    async fn timed<T, F>(&self, operation: &'static str, fut: F) -> ClinichatResult<T>
    where
        F: Future<Output = ClinichatResult<T>> + Send,
    {
        tokio::time::timeout(self.io_timeout, fut)
            .await
            .map_err(|_| StorageError::Timeout {
                tier: Self::NAME.to_string(),
                operation: operation.to_string(),
                after_ms: self.io_timeout.as_millis() as u64,
            })?
    }

    /// Turn a reconstruction into the sequence handed back to callers.
    async fn condense(
        &self,
        conversation_id: &str,
        log_id: i64,
        rec: Reconstruction,
    ) -> Vec<ConversationTurn> {
        let previous = rec.summary.as_ref().map(|s| s.to_turn(conversation_id));
        if previous.is_some() {
            self.summaries_reused.fetch_add(1, Ordering::Relaxed);
        }

        let summarizer = self
            .summarizer
            .as_ref()
            .filter(|s| s.should_summarize(rec.turns.len()));
        let Some(summarizer) = summarizer else {
            let skip = rec.turns.len().saturating_sub(self.max_turns);
            return previous
                .into_iter()
                .chain(rec.turns.into_iter().skip(skip).map(|t| t.turn))
                .collect();
        };

        let split = summarizer.split_point(rec.turns.len());
        let (older, recent) = rec.turns.split_at(split);
        let recent: Vec<ConversationTurn> = recent.iter().map(|t| t.turn.clone()).collect();
        let older_turns: Vec<ConversationTurn> = older.iter().map(|t| t.turn.clone()).collect();

        let summary = match summarizer
            .summarize(conversation_id, previous.as_ref(), &older_turns)
            .await
        {
            Ok(summary) => summary,
            Err(e) => {
                tracing::warn!(
                    conversation_id,
                    tier = Self::NAME,
                    operation = "summarize",
                    error = %e,
                    kept = recent.len(),
                    "summarization failed, returning recent turns only"
                );
                return recent;
            }
        };
        self.summaries_generated.fetch_add(1, Ordering::Relaxed);

        if self.persist_summaries {
            if let Some(last) = older.last() {
                self.persist(conversation_id, log_id, &summary, last.row_id)
                    .await;
            }
        }

        let mut out = Vec::with_capacity(recent.len() + 1);
        out.push(summary);
        out.extend(recent);
        out
    }

    async fn persist(
        &self,
        conversation_id: &str,
        log_id: i64,
        summary: &ConversationTurn,
        covers_through_id: i64,
    ) {
        let record = SummaryRecord {
            conversation_id: log_id,
            text: summary.response.clone(),
            summarized_turn_count: summary.summarized_turn_count().unwrap_or(0),
            covers_through_id,
            created_at: summary.timestamp,
        };
        match self
            .timed("insert_summary", self.log.insert_summary(&record))
            .await
        {
            Ok(()) => tracing::debug!(
                conversation_id,
                tier = Self::NAME,
                covers_through_id,
                "summary written to log"
            ),
            Err(e) => tracing::warn!(
                conversation_id,
                tier = Self::NAME,
                operation = "insert_summary",
                error = %e,
                "failed to persist summary"
            ),
        }
    }

    /// Fetch, rebuild and condense one conversation.
    ///
    /// Runs with the conversation's in-flight gate held, so a concurrent
    /// reader waits and then finds the summary this one persisted.
    async fn load(
        &self,
        conversation_id: &str,
        log_id: i64,
    ) -> ClinichatResult<Option<Vec<ConversationTurn>>> {
        let rows = self.timed("fetch_rows", self.log.fetch_rows(log_id)).await?;
        let rec = reconstruct(conversation_id, &rows, self.strategy);
        if rec.is_empty() {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        }

        self.hits.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            conversation_id,
            tier = Self::NAME,
            rows = rows.len(),
            turns = rec.turns.len(),
            dropped = rec.dropped,
            has_summary = rec.summary.is_some(),
            "reconstructed history from log"
        );
        Ok(Some(self.condense(conversation_id, log_id, rec).await))
    }

    fn read_only(&self, conversation_id: &str, operation: &'static str) {
        tracing::debug!(
            conversation_id,
            tier = Self::NAME,
            operation,
            "durable log is read-only, ignoring write"
        );
    }
}

#[async_trait]
impl CacheBackend for DurableLogTier {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn supports_write(&self) -> bool {
        false
    }

    async fn get(&self, conversation_id: &str) -> ClinichatResult<Option<Vec<ConversationTurn>>> {
        let Ok(log_id) = conversation_id.trim().parse::<i64>() else {
            tracing::debug!(
                conversation_id,
                tier = Self::NAME,
                operation = "get",
                "non-numeric conversation id, no log lookup"
            );
            self.misses.fetch_add(1, Ordering::Relaxed);
            return Ok(None);
        };

        let gate = Arc::clone(self.in_flight.entry(log_id).or_default().value());
        let result = {
            let _guard = gate.lock().await;
            self.load(conversation_id, log_id).await
        };
        drop(gate);
        self.in_flight
            .remove_if(&log_id, |_, gate| Arc::strong_count(gate) == 1);
        result
    }

    async fn add(&self, conversation_id: &str, _turn: ConversationTurn) -> ClinichatResult<()> {
        self.read_only(conversation_id, "add");
        Ok(())
    }

    async fn backfill(
        &self,
        conversation_id: &str,
        _turns: Vec<ConversationTurn>,
    ) -> ClinichatResult<()> {
        self.read_only(conversation_id, "backfill");
        Ok(())
    }

    async fn clear(&self, conversation_id: &str) -> ClinichatResult<()> {
        self.read_only(conversation_id, "clear");
        Ok(())
    }

    async fn stats(&self) -> TierStats {
        let log_stats = match self.timed("stats", self.log.stats()).await {
            Ok(stats) => stats,
            Err(e) => return TierStats::failed(Self::NAME, e),
        };

        let mut stats = TierStats::new(Self::NAME)
            .with_detail("table", self.log.describe())
            .with_detail("read_only", true)
            .with_detail("strategy", format!("{:?}", self.strategy))
            .with_detail("max_turns", self.max_turns as u64)
            .with_detail("summaries_stored", log_stats.summary_rows)
            .with_detail(
                "summaries_generated",
                self.summaries_generated.load(Ordering::Relaxed),
            )
            .with_detail(
                "summaries_reused",
                self.summaries_reused.load(Ordering::Relaxed),
            )
            .with_detail("user_rows", log_stats.user_rows);
        if let Some(summarizer) = &self.summarizer {
            stats = stats
                .with_detail("summarizer", summarizer.provider_name())
                .with_detail("summarizer_failures", summarizer.failures());
        }
        if let Some(oldest) = log_stats.oldest {
            stats = stats.with_detail("oldest", oldest.to_rfc3339());
        }
        if let Some(newest) = log_stats.newest {
            stats = stats.with_detail("newest", newest.to_rfc3339());
        }

        stats.sessions = log_stats.conversations;
        stats.turns = log_stats.assistant_rows;
        stats.estimated_bytes = log_stats.total_bytes;
        stats.hits = self.hits.load(Ordering::Relaxed);
        stats.misses = self.misses.load(Ordering::Relaxed);
        stats
    }

    async fn close(&self) {
        self.log.close().await;
    }
}
