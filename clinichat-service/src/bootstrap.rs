//! Assemble the history cache from configuration.
//!
//! The cache is built once at startup and handed to request handlers as an
//! `Arc`. Network backends connect lazily, so building never blocks on Redis
//! or PostgreSQL being reachable.

use std::sync::Arc;

use clinichat_core::{ClinichatConfig, ClinichatResult};
use clinichat_llm::{AnthropicSummarizationProvider, SummarizationProvider};
use clinichat_storage::{
    CacheBackend, ConversationSummarizer, DurableLogTier, HistoryCache, InMemoryTier, MessageLog,
    PostgresMessageLog, RedisListStore, SharedListStore, SharedTier,
};

/// Backend overrides. Anything left `None` is created from configuration
/// when its tier is enabled.
#[derive(Clone, Default)]
pub struct Backends {
    pub list_store: Option<Arc<dyn SharedListStore>>,
    pub message_log: Option<Arc<dyn MessageLog>>,
    pub summarizer: Option<Arc<dyn SummarizationProvider>>,
}

impl Backends {
    pub fn with_list_store(mut self, store: Arc<dyn SharedListStore>) -> Self {
        self.list_store = Some(store);
        self
    }

    pub fn with_message_log(mut self, log: Arc<dyn MessageLog>) -> Self {
        self.message_log = Some(log);
        self
    }

    pub fn with_summarizer(mut self, provider: Arc<dyn SummarizationProvider>) -> Self {
        self.summarizer = Some(provider);
        self
    }
}

/// Build the tier chain `[shared?, memory, durable_log?]` described by `config`.
pub fn build_history_cache(config: &ClinichatConfig, backends: Backends) -> ClinichatResult<HistoryCache> {
    config.validate()?;
    let max_turns = config.cache.max_turns_per_conversation;
    let mut tiers: Vec<Arc<dyn CacheBackend>> = Vec::with_capacity(3);

    if config.cache.shared_tier_enabled {
        let store: Arc<dyn SharedListStore> = match backends.list_store {
            Some(store) => store,
            None => Arc::new(RedisListStore::new(&config.shared.url)?),
        };
        tiers.push(Arc::new(SharedTier::new(store, &config.shared, max_turns)));
    }

    tiers.push(Arc::new(InMemoryTier::new(max_turns)));

    if config.cache.durable_log_enabled {
        let log: Arc<dyn MessageLog> = match backends.message_log {
            Some(log) => log,
            None => Arc::new(PostgresMessageLog::from_config(
                &config.durable_log.db,
                &config.durable_log.schema,
            )?),
        };
        let mut durable = DurableLogTier::new(log, &config.durable_log);

        if config.cache.summarization_enabled {
            let provider: Arc<dyn SummarizationProvider> = match backends.summarizer {
                Some(provider) => provider,
                None => Arc::new(AnthropicSummarizationProvider::from_config(&config.anthropic)?),
            };
            let summarizer = ConversationSummarizer::new(provider, config.summarizer.clone());
            durable = durable.with_summarizer(Arc::new(summarizer));
        }
        tiers.push(Arc::new(durable));
    }

    // A clear stays in force as long as a cached copy could have lived.
    Ok(HistoryCache::new(tiers).with_clear_ttl(config.shared.ttl))
}

/// Owns the history cache for the lifetime of the process.
#[derive(Debug, Clone)]
pub struct CacheRuntime {
    cache: Arc<HistoryCache>,
}

impl CacheRuntime {
    /// Start hook: build the cache and log its composition.
    pub fn start(config: &ClinichatConfig, backends: Backends) -> ClinichatResult<Self> {
        let cache = build_history_cache(config, backends)?;
        tracing::info!(
            tiers = ?cache.tier_names(),
            max_turns = config.cache.max_turns_per_conversation,
            summarization = config.cache.summarization_enabled,
            "history cache started"
        );
        Ok(Self {
            cache: Arc::new(cache),
        })
    }

    pub fn cache(&self) -> Arc<HistoryCache> {
        Arc::clone(&self.cache)
    }

    /// Stop hook: release pooled connections.
    pub async fn shutdown(&self) {
        let stats = self.cache.stats().await;
        tracing::info!(
            total_requests = stats.total_requests,
            new_conversations = stats.new_conversations,
            hit_rate = stats.overall_hit_rate(),
            "history cache stopping"
        );
        self.cache.shutdown().await;
    }
}
