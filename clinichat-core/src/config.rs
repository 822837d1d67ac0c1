//! Configuration types
//!
//! Every section has a `Default` carrying the production defaults, a
//! `from_env()` constructor reading `CLINICHAT_*` variables (unset or
//! unparsable values fall back to the default) and a `validate()` check.

use crate::{ClinichatResult, ConfigError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Default per-conversation cap on raw turns.
pub const DEFAULT_MAX_TURNS: usize = 30;

// ============================================================================
// ENV HELPERS
// ============================================================================

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.trim().to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default)
}

fn env_secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_parse(key, default.as_secs()))
}

fn invalid(field: &str, value: impl ToString, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

fn require_positive(field: &str, value: Duration) -> Result<(), ConfigError> {
    if value.is_zero() {
        return Err(invalid(field, format!("{:?}", value), "must be positive"));
    }
    Ok(())
}

// ============================================================================
// TIER SELECTION
// ============================================================================

/// Which tiers are composed into the history cache.
///
/// The in-memory tier is always present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryCacheConfig {
    /// Raw turns kept per conversation in the fast tiers (K)
    pub max_turns_per_conversation: usize,
    pub shared_tier_enabled: bool,
    pub durable_log_enabled: bool,
    /// Only meaningful with the durable log, which is where it runs
    pub summarization_enabled: bool,
}

impl Default for HistoryCacheConfig {
    fn default() -> Self {
        Self {
            max_turns_per_conversation: DEFAULT_MAX_TURNS,
            shared_tier_enabled: false,
            durable_log_enabled: false,
            summarization_enabled: false,
        }
    }
}

impl HistoryCacheConfig {
    /// Environment variables:
    /// - `CLINICHAT_MAX_TURNS` (default: 30)
    /// - `CLINICHAT_SHARED_TIER_ENABLED` (default: false)
    /// - `CLINICHAT_DURABLE_LOG_ENABLED` (default: false)
    /// - `CLINICHAT_SUMMARIZATION_ENABLED` (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_turns_per_conversation: env_parse(
                "CLINICHAT_MAX_TURNS",
                defaults.max_turns_per_conversation,
            ),
            shared_tier_enabled: env_bool("CLINICHAT_SHARED_TIER_ENABLED", false),
            durable_log_enabled: env_bool("CLINICHAT_DURABLE_LOG_ENABLED", false),
            summarization_enabled: env_bool("CLINICHAT_SUMMARIZATION_ENABLED", false),
        }
    }

    pub fn with_max_turns(mut self, max: usize) -> Self {
        self.max_turns_per_conversation = max;
        self
    }

    pub fn with_shared_tier(mut self, enabled: bool) -> Self {
        self.shared_tier_enabled = enabled;
        self
    }

    pub fn with_durable_log(mut self, enabled: bool) -> Self {
        self.durable_log_enabled = enabled;
        self
    }

    pub fn with_summarization(mut self, enabled: bool) -> Self {
        self.summarization_enabled = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_turns_per_conversation == 0 {
            return Err(invalid(
                "max_turns_per_conversation",
                self.max_turns_per_conversation,
                "must be greater than 0",
            ));
        }
        if self.summarization_enabled && !self.durable_log_enabled {
            return Err(ConfigError::IncompatibleOptions {
                option_a: "summarization_enabled".to_string(),
                option_b: "durable_log_enabled=false".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// SHARED FAST TIER
// ============================================================================

/// Network-shared list store settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedTierConfig {
    pub url: String,
    pub key_prefix: String,
    /// Refreshed on every read and write
    pub ttl: Duration,
    pub io_timeout: Duration,
}

impl Default for SharedTierConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "chatbot:session:".to_string(),
            ttl: Duration::from_secs(3600),
            io_timeout: Duration::from_secs(5),
        }
    }
}

impl SharedTierConfig {
    /// Environment variables:
    /// - `CLINICHAT_REDIS_URL` (default: redis://localhost:6379)
    /// - `CLINICHAT_SHARED_KEY_PREFIX` (default: chatbot:session:)
    /// - `CLINICHAT_CACHE_TTL_SECONDS` (default: 3600)
    /// - `CLINICHAT_SHARED_TIMEOUT_SECS` (default: 5)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: env_string("CLINICHAT_REDIS_URL", &defaults.url),
            key_prefix: env_string("CLINICHAT_SHARED_KEY_PREFIX", &defaults.key_prefix),
            ttl: env_secs("CLINICHAT_CACHE_TTL_SECONDS", defaults.ttl),
            io_timeout: env_secs("CLINICHAT_SHARED_TIMEOUT_SECS", defaults.io_timeout),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "shared.url".to_string(),
            });
        }
        if self.key_prefix.is_empty() {
            return Err(invalid("shared.key_prefix", "", "must not be empty"));
        }
        require_positive("shared.ttl", self.ttl)?;
        require_positive("shared.io_timeout", self.io_timeout)
    }
}

// ============================================================================
// DURABLE LOG
// ============================================================================

/// PostgreSQL connection pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbConfig {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    #[serde(default, skip_serializing)]
    pub password: String,
    pub max_size: usize,
    /// Wait limit when checking a connection out of the pool
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            dbname: "chatbot".to_string(),
            user: "postgres".to_string(),
            password: String::new(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: env_string("CLINICHAT_DB_HOST", &defaults.host),
            port: env_parse("CLINICHAT_DB_PORT", defaults.port),
            dbname: env_string("CLINICHAT_DB_NAME", &defaults.dbname),
            user: env_string("CLINICHAT_DB_USER", &defaults.user),
            password: std::env::var("CLINICHAT_DB_PASSWORD").unwrap_or_default(),
            max_size: env_parse("CLINICHAT_DB_POOL_SIZE", defaults.max_size),
            timeout: env_secs("CLINICHAT_DB_TIMEOUT", defaults.timeout),
        }
    }
}

/// Table and column names of the externally owned message log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogSchema {
    pub table: String,
    pub id_column: String,
    pub conversation_column: String,
    pub role_column: String,
    pub query_column: String,
    pub response_column: String,
    pub parent_column: String,
    pub meta_column: String,
    pub created_at_column: String,
    /// Soft-delete marker; rows with a non-null value are never read
    pub deleted_at_column: String,
}

impl Default for LogSchema {
    fn default() -> Self {
        Self {
            table: "chatbot_messages".to_string(),
            id_column: "id".to_string(),
            conversation_column: "conversation_id".to_string(),
            role_column: "role".to_string(),
            query_column: "query".to_string(),
            response_column: "response".to_string(),
            parent_column: "parent_id".to_string(),
            meta_column: "meta".to_string(),
            created_at_column: "created_at".to_string(),
            deleted_at_column: "deleted_at".to_string(),
        }
    }
}

impl LogSchema {
    /// Only `CLINICHAT_LOG_TABLE` is read from the environment; column
    /// overrides are set programmatically.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            table: env_string("CLINICHAT_LOG_TABLE", &defaults.table),
            ..defaults
        }
    }

    fn identifiers(&self) -> [(&'static str, &str); 10] {
        [
            ("table", &self.table),
            ("id_column", &self.id_column),
            ("conversation_column", &self.conversation_column),
            ("role_column", &self.role_column),
            ("query_column", &self.query_column),
            ("response_column", &self.response_column),
            ("parent_column", &self.parent_column),
            ("meta_column", &self.meta_column),
            ("created_at_column", &self.created_at_column),
            ("deleted_at_column", &self.deleted_at_column),
        ]
    }

    /// Names are spliced into SQL, so each must be a plain identifier
    /// (optionally schema-qualified for the table).
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ident = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$")
            .map_err(|e| invalid("log_schema", "identifier pattern", &e.to_string()))?;

        for (field, value) in self.identifiers() {
            let ok = if field == "table" {
                let parts: Vec<&str> = value.split('.').collect();
                parts.len() <= 2 && parts.iter().all(|p| ident.is_match(p))
            } else {
                ident.is_match(value)
            };
            if !ok {
                return Err(invalid(
                    &format!("log_schema.{}", field),
                    value,
                    "not a plain SQL identifier",
                ));
            }
        }
        Ok(())
    }
}

/// How durable-log rows are turned into question/answer pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReconstructionStrategy {
    /// Only assistant rows carrying both query and response
    AssistantRows,
    /// Pair user rows with the assistant rows that answer them
    Paired,
    /// Self-contained assistant rows first, pairing for the rest
    #[default]
    Auto,
}

impl FromStr for ReconstructionStrategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "assistant_rows" | "assistant" => Ok(Self::AssistantRows),
            "paired" => Ok(Self::Paired),
            "auto" => Ok(Self::Auto),
            other => Err(invalid(
                "reconstruction_strategy",
                other,
                "expected assistant_rows, paired or auto",
            )),
        }
    }
}

/// Durable-log reader settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DurableLogConfig {
    pub db: DbConfig,
    pub schema: LogSchema,
    /// Cap on reconstructed turns when no summarizer is active
    pub max_turns: usize,
    pub strategy: ReconstructionStrategy,
    pub io_timeout: Duration,
    /// Write generated summaries back to the log
    pub persist_summaries: bool,
}

impl Default for DurableLogConfig {
    fn default() -> Self {
        Self {
            db: DbConfig::default(),
            schema: LogSchema::default(),
            max_turns: DEFAULT_MAX_TURNS,
            strategy: ReconstructionStrategy::Auto,
            io_timeout: Duration::from_secs(5),
            persist_summaries: true,
        }
    }
}

impl DurableLogConfig {
    /// Environment variables, besides the `CLINICHAT_DB_*` pool settings:
    /// - `CLINICHAT_LOG_MAX_TURNS` (default: 30)
    /// - `CLINICHAT_LOG_STRATEGY` (default: auto)
    /// - `CLINICHAT_LOG_TIMEOUT_SECS` (default: 5)
    /// - `CLINICHAT_PERSIST_SUMMARIES` (default: true)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            db: DbConfig::from_env(),
            schema: LogSchema::from_env(),
            max_turns: env_parse("CLINICHAT_LOG_MAX_TURNS", defaults.max_turns),
            strategy: env_parse("CLINICHAT_LOG_STRATEGY", defaults.strategy),
            io_timeout: env_secs("CLINICHAT_LOG_TIMEOUT_SECS", defaults.io_timeout),
            persist_summaries: env_bool("CLINICHAT_PERSIST_SUMMARIES", true),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_turns == 0 {
            return Err(invalid("durable_log.max_turns", 0, "must be greater than 0"));
        }
        require_positive("durable_log.io_timeout", self.io_timeout)?;
        self.schema.validate()
    }
}

// ============================================================================
// SUMMARIZATION
// ============================================================================

/// Conversation summarizer policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummarizerConfig {
    /// Summarize once more than this many turns are reconstructed
    pub threshold: usize,
    /// Most recent turns kept verbatim (R)
    pub keep_recent: usize,
    pub max_tokens: i32,
    pub temperature: f32,
    /// Bound on the LLM call
    pub timeout: Duration,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            threshold: 30,
            keep_recent: 10,
            max_tokens: 1000,
            temperature: 0.3,
            timeout: Duration::from_secs(60),
        }
    }
}

impl SummarizerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            threshold: env_parse("CLINICHAT_SUMMARY_THRESHOLD", defaults.threshold),
            keep_recent: env_parse("CLINICHAT_SUMMARY_KEEP_RECENT", defaults.keep_recent),
            max_tokens: env_parse("CLINICHAT_SUMMARY_MAX_TOKENS", defaults.max_tokens),
            temperature: env_parse("CLINICHAT_SUMMARY_TEMPERATURE", defaults.temperature),
            timeout: env_secs("CLINICHAT_SUMMARY_TIMEOUT_SECS", defaults.timeout),
        }
    }

    pub fn with_threshold(mut self, threshold: usize) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn with_keep_recent(mut self, keep_recent: usize) -> Self {
        self.keep_recent = keep_recent;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.keep_recent >= self.threshold {
            return Err(ConfigError::IncompatibleOptions {
                option_a: format!("summarizer.keep_recent={}", self.keep_recent),
                option_b: format!("summarizer.threshold={}", self.threshold),
            });
        }
        if self.max_tokens <= 0 {
            return Err(invalid(
                "summarizer.max_tokens",
                self.max_tokens,
                "must be greater than 0",
            ));
        }
        if !(0.0..=1.0).contains(&self.temperature) {
            return Err(invalid(
                "summarizer.temperature",
                self.temperature,
                "must be between 0.0 and 1.0",
            ));
        }
        require_positive("summarizer.timeout", self.timeout)
    }
}

/// Anthropic provider settings for the summarizer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnthropicConfig {
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub requests_per_minute: u32,
    pub request_timeout: Duration,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: "claude-3-5-haiku-20241022".to_string(),
            base_url: "https://api.anthropic.com/v1".to_string(),
            requests_per_minute: 50,
            request_timeout: Duration::from_secs(60),
        }
    }
}

impl AnthropicConfig {
    /// Reads `CLINICHAT_ANTHROPIC_API_KEY`, falling back to `ANTHROPIC_API_KEY`.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_key: std::env::var("CLINICHAT_ANTHROPIC_API_KEY")
                .or_else(|_| std::env::var("ANTHROPIC_API_KEY"))
                .ok()
                .filter(|k| !k.trim().is_empty()),
            model: env_string("CLINICHAT_ANTHROPIC_MODEL", &defaults.model),
            base_url: env_string("CLINICHAT_ANTHROPIC_BASE_URL", &defaults.base_url),
            requests_per_minute: env_parse(
                "CLINICHAT_ANTHROPIC_RPM",
                defaults.requests_per_minute,
            ),
            request_timeout: env_secs(
                "CLINICHAT_ANTHROPIC_TIMEOUT_SECS",
                defaults.request_timeout,
            ),
        }
    }
}

// ============================================================================
// MASTER CONFIG
// ============================================================================

/// Everything needed to assemble the history cache.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ClinichatConfig {
    pub cache: HistoryCacheConfig,
    pub shared: SharedTierConfig,
    pub durable_log: DurableLogConfig,
    pub summarizer: SummarizerConfig,
    pub anthropic: AnthropicConfig,
}

impl ClinichatConfig {
    pub fn from_env() -> Self {
        Self {
            cache: HistoryCacheConfig::from_env(),
            shared: SharedTierConfig::from_env(),
            durable_log: DurableLogConfig::from_env(),
            summarizer: SummarizerConfig::from_env(),
            anthropic: AnthropicConfig::from_env(),
        }
    }

    /// Validate the sections that the selected tiers will use.
    pub fn validate(&self) -> ClinichatResult<()> {
        self.cache.validate()?;
        if self.cache.shared_tier_enabled {
            self.shared.validate()?;
        }
        if self.cache.durable_log_enabled {
            self.durable_log.validate()?;
        }
        if self.cache.summarization_enabled {
            self.summarizer.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = ClinichatConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache.max_turns_per_conversation, 30);
        assert_eq!(config.shared.ttl, Duration::from_secs(3600));
        assert_eq!(config.shared.key_prefix, "chatbot:session:");
        assert_eq!(config.summarizer.threshold, 30);
        assert_eq!(config.summarizer.keep_recent, 10);
        assert_eq!(config.durable_log.schema.table, "chatbot_messages");
    }

    #[test]
    fn test_all_tiers_enabled_validates() {
        let config = ClinichatConfig {
            cache: HistoryCacheConfig::default()
                .with_shared_tier(true)
                .with_durable_log(true)
                .with_summarization(true),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_max_turns_rejected() {
        let config = HistoryCacheConfig::default().with_max_turns(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "max_turns_per_conversation"
        ));
    }

    #[test]
    fn test_summarization_requires_durable_log() {
        let config = HistoryCacheConfig::default().with_summarization(true);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::IncompatibleOptions { .. })
        ));
    }

    #[test]
    fn test_keep_recent_must_be_below_threshold() {
        let config = SummarizerConfig::default()
            .with_threshold(10)
            .with_keep_recent(10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_schema_rejects_injection() {
        let schema = LogSchema {
            table: "chatbot_messages; DROP TABLE x".to_string(),
            ..Default::default()
        };
        assert!(schema.validate().is_err());

        let schema = LogSchema {
            role_column: "role-name".to_string(),
            ..Default::default()
        };
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_schema_accepts_qualified_table() {
        let schema = LogSchema {
            table: "chat.chatbot_messages".to_string(),
            ..Default::default()
        };
        assert!(schema.validate().is_ok());

        let schema = LogSchema {
            table: "a.b.c".to_string(),
            ..Default::default()
        };
        assert!(schema.validate().is_err());
    }

    #[test]
    fn test_strategy_from_str() {
        assert_eq!(
            "paired".parse::<ReconstructionStrategy>().ok(),
            Some(ReconstructionStrategy::Paired)
        );
        assert_eq!(
            " AUTO ".parse::<ReconstructionStrategy>().ok(),
            Some(ReconstructionStrategy::Auto)
        );
        assert!("nearest".parse::<ReconstructionStrategy>().is_err());
    }

    #[test]
    fn test_temperature_range() {
        let config = SummarizerConfig {
            temperature: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_db_password_not_serialized() {
        let db = DbConfig {
            password: "hunter2".to_string(),
            ..Default::default()
        };
        let json = serde_json::to_string(&db).unwrap();
        assert!(!json.contains("hunter2"));
    }
}
