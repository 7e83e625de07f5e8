//! Programmatic configuration builder for integration tests

use std::net::SocketAddr;
use std::time::Duration;

use claude_proxy_config::{Config, HealthConfig, LlmConfig, ProviderConfig, ProviderKind, ServerConfig, TimeoutConfig};
use secrecy::SecretString;

/// Builder for constructing test configurations
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder with minimal defaults
    pub fn new() -> Self {
        Self {
            config: Config {
                server: ServerConfig {
                    listen_address: Some(SocketAddr::from(([127, 0, 0, 1], 0))),
                    health: HealthConfig::default(),
                },
                llm: LlmConfig::default(),
                telemetry: None,
            },
        }
    }

    /// Add a provider of `kind` pointed at a mock backend
    pub fn with_provider(mut self, name: &str, kind: ProviderKind, base_url: &str) -> Self {
        self.config.llm.providers.insert(
            name.to_owned(),
            ProviderConfig {
                kind,
                base_url: Some(base_url.parse().expect("valid URL")),
                api_key: Some(SecretString::from("test-key")),
                default_model: None,
                model_mapping: Default::default(),
                tools: None,
                timeouts: TimeoutConfig::default(),
            },
        );
        self
    }

    /// Set a provider's `claude:provider` mapping string
    pub fn with_model_mapping(mut self, name: &str, mapping: &str) -> Self {
        self.provider(name).model_mapping = mapping.parse().expect("valid mapping");
        self
    }

    pub fn with_default_model(mut self, name: &str, model: &str) -> Self {
        self.provider(name).default_model = Some(model.to_owned());
        self
    }

    pub fn with_idle_timeout(mut self, name: &str, idle: Duration) -> Self {
        self.provider(name).timeouts.idle = idle;
        self
    }

    pub fn with_first_byte_timeout(mut self, name: &str, first_byte: Duration) -> Self {
        self.provider(name).timeouts.first_byte = first_byte;
        self
    }

    pub fn with_default_provider(mut self, name: &str) -> Self {
        self.config.llm.default_provider = Some(name.to_owned());
        self
    }

    /// Disable health endpoint
    pub fn without_health(mut self) -> Self {
        self.config.server.health.enabled = false;
        self
    }

    /// Build the final config
    pub fn build(self) -> Config {
        self.config
    }

    fn provider(&mut self, name: &str) -> &mut ProviderConfig {
        self.config
            .llm
            .providers
            .get_mut(name)
            .expect("provider added before it is configured")
    }
}
