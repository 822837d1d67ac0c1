//! Clinichat history cache entry point
//!
//! Loads configuration from the environment, starts the cache runtime and
//! holds it until a shutdown signal arrives. Request handling lives in the
//! HTTP layer that embeds `ConversationService`.

use clinichat_core::{ClinichatConfig, ClinichatResult};
use clinichat_service::{init_tracing, Backends, CacheRuntime, TelemetryConfig};

#[tokio::main]
async fn main() -> ClinichatResult<()> {
    let telemetry = TelemetryConfig::from_env()?;
    init_tracing(&telemetry)?;

    let config = ClinichatConfig::from_env();
    let runtime = CacheRuntime::start(&config, Backends::default())?;

    let report_every = std::env::var("CLINICHAT_STATS_INTERVAL_SECS")
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(300);
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(report_every.max(1)));

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let stats = runtime.cache().stats().await;
                match serde_json::to_value(&stats) {
                    Ok(snapshot) => tracing::info!(stats = %snapshot, "history cache statistics"),
                    Err(e) => tracing::warn!(error = %e, "failed to serialize statistics"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    runtime.shutdown().await;
    Ok(())
}
