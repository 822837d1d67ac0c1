//! Error types for clinichat operations

use thiserror::Error;

/// Storage tier errors.
///
/// None of these cross the history cache boundary; the orchestrator turns
/// them into a miss or a no-op and logs them.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Tier {tier} unavailable: {reason}")]
    TierUnavailable { tier: String, reason: String },

    #[error("Malformed entry in {tier}: {reason}")]
    MalformedEntry { tier: String, reason: String },

    #[error("Tier {tier} timed out during {operation} after {after_ms}ms")]
    Timeout {
        tier: String,
        operation: String,
        after_ms: u64,
    },

    #[error("Query failed on {tier}: {reason}")]
    QueryFailed { tier: String, reason: String },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// LLM provider errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("No LLM provider configured")]
    ProviderNotConfigured,

    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: i32,
        message: String,
    },

    #[error("Rate limited by {provider}, retry after {retry_after_ms}ms")]
    RateLimited {
        provider: String,
        retry_after_ms: i64,
    },

    #[error("Invalid API key for {provider}")]
    InvalidApiKey { provider: String },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Request to {provider} timed out after {after_ms}ms")]
    Timeout { provider: String, after_ms: u64 },

    #[error("Summarization failed: {reason}")]
    SummarizationFailed { reason: String },
}

/// Validation errors for caller-supplied input.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Incompatible options: {option_a} and {option_b}")]
    IncompatibleOptions { option_a: String, option_b: String },
}

/// Master error type for all clinichat errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClinichatError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl ClinichatError {
    /// Whether this error was caused by the caller's input.
    ///
    /// Only caller errors are allowed to propagate out of the history cache.
    pub fn is_caller_error(&self) -> bool {
        matches!(self, ClinichatError::Validation(_))
    }
}

/// Result type alias for clinichat operations.
pub type ClinichatResult<T> = Result<T, ClinichatError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_error_display_tier_unavailable() {
        let err = StorageError::TierUnavailable {
            tier: "shared".to_string(),
            reason: "connection refused".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("shared"));
        assert!(msg.contains("connection refused"));
    }

    #[test]
    fn test_storage_error_display_timeout() {
        let err = StorageError::Timeout {
            tier: "durable_log".to_string(),
            operation: "get".to_string(),
            after_ms: 5000,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("durable_log"));
        assert!(msg.contains("get"));
        assert!(msg.contains("5000"));
    }

    #[test]
    fn test_llm_error_display_rate_limited() {
        let err = LlmError::RateLimited {
            provider: "anthropic".to_string(),
            retry_after_ms: 1500,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("Rate limited"));
        assert!(msg.contains("anthropic"));
        assert!(msg.contains("1500"));
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "log_schema.table".to_string(),
            value: "messages;drop".to_string(),
            reason: "not a plain identifier".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("log_schema.table"));
        assert!(msg.contains("messages;drop"));
        assert!(msg.contains("not a plain identifier"));
    }

    #[test]
    fn test_clinichat_error_from_variants() {
        let storage = ClinichatError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, ClinichatError::Storage(_)));

        let llm = ClinichatError::from(LlmError::ProviderNotConfigured);
        assert!(matches!(llm, ClinichatError::Llm(_)));

        let validation = ClinichatError::from(ValidationError::RequiredFieldMissing {
            field: "conversation_id".to_string(),
        });
        assert!(matches!(validation, ClinichatError::Validation(_)));

        let config = ClinichatError::from(ConfigError::MissingRequired {
            field: "redis_url".to_string(),
        });
        assert!(matches!(config, ClinichatError::Config(_)));
    }

    #[test]
    fn test_only_validation_is_caller_error() {
        let caller = ClinichatError::from(ValidationError::RequiredFieldMissing {
            field: "session_id".to_string(),
        });
        assert!(caller.is_caller_error());

        let storage = ClinichatError::from(StorageError::TierUnavailable {
            tier: "shared".to_string(),
            reason: "down".to_string(),
        });
        assert!(!storage.is_caller_error());
        assert!(!ClinichatError::from(LlmError::ProviderNotConfigured).is_caller_error());
    }

    #[test]
    fn test_storage_error_display_lock_poisoned() {
        let msg = format!("{}", StorageError::LockPoisoned);
        assert!(msg.contains("lock poisoned"));
    }
}
