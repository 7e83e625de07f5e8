#![allow(clippy::must_use_candidate)]

mod env;
pub mod health;
pub mod llm;
mod loader;
pub mod mapping;
pub mod server;
pub mod telemetry;

use serde::Deserialize;

pub use health::*;
pub use llm::*;
pub use mapping::ModelMapping;
pub use server::*;
pub use telemetry::{OtlpConfig, OtlpProtocol, TelemetryConfig};

/// Top-level claude-proxy configuration
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Upstream provider configuration
    #[serde(default)]
    pub llm: LlmConfig,
    /// Telemetry configuration
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
}
