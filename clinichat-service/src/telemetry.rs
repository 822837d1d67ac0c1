//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` and either a
//! JSON or a plain-text fmt layer. `RUST_LOG` overrides the default filter.

use std::str::FromStr;

use clinichat_core::{ClinichatResult, ConfigError};
use serde::{Deserialize, Serialize};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "clinichat=debug,info";

/// Output format of the fmt layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Text,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" | "pretty" | "plain" => Ok(Self::Text),
            other => Err(ConfigError::InvalidValue {
                field: "CLINICHAT_LOG_FORMAT".to_string(),
                value: other.to_string(),
                reason: "expected json or text".to_string(),
            }),
        }
    }
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    pub format: LogFormat,
    /// Filter used when `RUST_LOG` is unset
    pub default_filter: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            default_filter: DEFAULT_FILTER.to_string(),
        }
    }
}

impl TelemetryConfig {
    /// Reads `CLINICHAT_LOG_FORMAT` (json | text) and `CLINICHAT_LOG_FILTER`.
    pub fn from_env() -> ClinichatResult<Self> {
        let format = match std::env::var("CLINICHAT_LOG_FORMAT") {
            Ok(raw) => raw.parse::<LogFormat>()?,
            Err(_) => LogFormat::default(),
        };
        let default_filter =
            std::env::var("CLINICHAT_LOG_FILTER").unwrap_or_else(|_| DEFAULT_FILTER.to_string());
        Ok(Self {
            format,
            default_filter,
        })
    }

    fn filter(&self) -> ClinichatResult<EnvFilter> {
        if let Ok(filter) = EnvFilter::try_from_default_env() {
            return Ok(filter);
        }
        EnvFilter::try_new(&self.default_filter).map_err(|e| {
            ConfigError::InvalidValue {
                field: "default_filter".to_string(),
                value: self.default_filter.clone(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

/// Install the global subscriber.
///
/// Returns `Ok(false)` when a subscriber was already installed, which is
/// expected in tests that initialise more than once.
pub fn init_tracing(config: &TelemetryConfig) -> ClinichatResult<bool> {
    let filter = config.filter()?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .is_ok(),
        LogFormat::Text => registry
            .with(tracing_subscriber::fmt::layer())
            .try_init()
            .is_ok(),
    };

    if installed {
        tracing::info!(format = ?config.format, "Telemetry initialized");
    }
    Ok(installed)
}
