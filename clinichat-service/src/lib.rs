//! Clinichat Service - History Cache Wiring
//!
//! Builds the history cache from configuration, exposes the request-level
//! load/record calls used around the LLM step, and sets up structured
//! logging.

pub mod bootstrap;
pub mod conversation;
pub mod telemetry;

pub use bootstrap::{build_history_cache, Backends, CacheRuntime};
pub use conversation::ConversationService;
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};
