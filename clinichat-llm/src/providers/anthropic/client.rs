//! Anthropic HTTP client with rate limiting

use super::types::ApiError;
use clinichat_core::{AnthropicConfig, ClinichatError, ClinichatResult, ConfigError, LlmError};
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

const PROVIDER: &str = "anthropic";
const API_VERSION: &str = "2023-06-01";

/// Anthropic API client with rate limiting.
pub struct AnthropicClient {
    client: Client,
    api_key: String,
    base_url: String,
    rate_limiter: Arc<Semaphore>,
    /// Reference point for `last_request_ms`
    started: Instant,
    last_request_ms: Arc<AtomicU64>,
    min_request_interval_ms: u64,
    request_timeout: Duration,
}

impl AnthropicClient {
    /// Create a new Anthropic client.
    ///
    /// # Arguments
    /// * `api_key` - Anthropic API key
    /// * `requests_per_minute` - Maximum requests per minute (default: 50)
    pub fn new(api_key: impl Into<String>, requests_per_minute: u32) -> ClinichatResult<Self> {
        let config = AnthropicConfig {
            api_key: Some(api_key.into()),
            requests_per_minute,
            ..Default::default()
        };
        Self::from_config(&config)
    }

    /// Create a client from configuration. Fails when no API key is set.
    pub fn from_config(config: &AnthropicConfig) -> ClinichatResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingRequired {
                field: "anthropic.api_key".to_string(),
            })?;

        let rpm = config.requests_per_minute.max(1);
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                field: "anthropic.http_client".to_string(),
                value: config.base_url.clone(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            rate_limiter: Arc::new(Semaphore::new(rpm as usize)),
            started: Instant::now(),
            last_request_ms: Arc::new(AtomicU64::new(0)),
            min_request_interval_ms: (60_000 / rpm as u64).max(10),
            request_timeout: config.request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Make an API request with automatic rate limiting.
    pub async fn request<Req: Serialize, Res: DeserializeOwned>(
        &self,
        endpoint: &str,
        body: Req,
    ) -> ClinichatResult<Res> {
        let _permit = self.rate_limiter.acquire().await.map_err(|e| {
            ClinichatError::Llm(LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                status: 0,
                message: format!("Rate limiter error: {}", e),
            })
        })?;

        self.wait_for_slot().await;

        let url = format!("{}/{}", self.base_url, endpoint);
        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClinichatError::Llm(LlmError::Timeout {
                        provider: PROVIDER.to_string(),
                        after_ms: self.request_timeout.as_millis() as u64,
                    })
                } else {
                    ClinichatError::Llm(LlmError::RequestFailed {
                        provider: PROVIDER.to_string(),
                        status: 0,
                        message: format!("HTTP request failed: {}", e),
                    })
                }
            })?;

        let status = response.status();

        if status.is_success() {
            return response.json().await.map_err(|e| {
                ClinichatError::Llm(LlmError::InvalidResponse {
                    provider: PROVIDER.to_string(),
                    reason: format!("Failed to parse response: {}", e),
                })
            });
        }

        let retry_after_ms = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<i64>().ok())
            .map(|secs| secs * 1000)
            .unwrap_or(0);

        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        let error_msg = match serde_json::from_str::<ApiError>(&error_text) {
            Ok(api_error) => api_error.error.message,
            Err(_) => error_text,
        };

        Err(match status {
            StatusCode::TOO_MANY_REQUESTS => ClinichatError::Llm(LlmError::RateLimited {
                provider: PROVIDER.to_string(),
                retry_after_ms,
            }),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                ClinichatError::Llm(LlmError::InvalidApiKey {
                    provider: PROVIDER.to_string(),
                })
            }
            _ => ClinichatError::Llm(LlmError::RequestFailed {
                provider: PROVIDER.to_string(),
                status: status.as_u16() as i32,
                message: error_msg,
            }),
        })
    }

    /// Enforce the minimum spacing between consecutive requests.
    async fn wait_for_slot(&self) {
        let now_ms = self.started.elapsed().as_millis() as u64;
        let last_ms = self.last_request_ms.load(Ordering::Relaxed);

        if last_ms > 0 {
            let elapsed = now_ms.saturating_sub(last_ms);
            if elapsed < self.min_request_interval_ms {
                let wait_ms = self.min_request_interval_ms - elapsed;
                tokio::time::sleep(Duration::from_millis(wait_ms)).await;
            }
        }

        let sent_at = (self.started.elapsed().as_millis() as u64).max(1);
        self.last_request_ms.store(sent_at, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for AnthropicClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicClient")
            .field("base_url", &self.base_url)
            .field("api_key", &"[REDACTED]")
            .field("min_request_interval_ms", &self.min_request_interval_ms)
            .finish()
    }
}
