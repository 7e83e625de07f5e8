//! Provider registry and model mapping
//!
//! Built once from configuration and shared read-only by every request.
//! Resolution never touches the network.

use std::sync::Arc;

use claude_proxy_config::{LlmConfig, ModelMapping, ProviderConfig, ProviderKind, TimeoutConfig};
use indexmap::IndexMap;
use secrecy::SecretString;
use url::Url;

use crate::error::LlmError;
use crate::provider::{self, ProviderAdapter};
use crate::types::MessagesRequest;

/// A configured upstream, ready to be called
pub struct RegisteredProvider {
    pub name: String,
    pub kind: ProviderKind,
    pub base_url: Url,
    pub(crate) api_key: Option<SecretString>,
    pub default_model: Option<String>,
    pub model_mapping: ModelMapping,
    pub timeouts: TimeoutConfig,
    pub(crate) adapter: Box<dyn ProviderAdapter>,
    pub(crate) client: reqwest::Client,
}

impl std::fmt::Debug for RegisteredProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredProvider")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("base_url", &self.base_url.as_str())
            .field("default_model", &self.default_model)
            .finish_non_exhaustive()
    }
}

impl RegisteredProvider {
    fn from_config(name: &str, config: &ProviderConfig) -> Result<Self, LlmError> {
        let adapter = provider::adapter(config.kind, config.tools);

        let base_url = match &config.base_url {
            Some(url) => url.clone(),
            None => Url::parse(adapter.default_base_url())
                .map_err(|e| LlmError::Config(format!("invalid default base URL for '{name}': {e}")))?,
        };

        // No overall client timeout: streams may legitimately run for minutes
        let client = reqwest::Client::builder()
            .connect_timeout(config.timeouts.connect)
            .build()
            .map_err(|e| LlmError::Internal(anyhow::anyhow!("failed to build HTTP client for '{name}': {e}")))?;

        Ok(Self {
            name: name.to_owned(),
            kind: config.kind,
            base_url,
            api_key: config.api_key.clone(),
            default_model: config.default_model.clone(),
            model_mapping: config.model_mapping.clone(),
            timeouts: config.timeouts.clone(),
            adapter,
            client,
        })
    }

    /// Provider model id for a canonical model id
    ///
    /// Mapping entry first, then the provider default model. Without either
    /// the canonical id passes through unchanged.
    pub fn resolve_model<'a>(&'a self, canonical: &'a str) -> &'a str {
        self.model_mapping
            .get(canonical)
            .or(self.default_model.as_deref())
            .unwrap_or(canonical)
    }

    pub fn adapter(&self) -> &dyn ProviderAdapter {
        self.adapter.as_ref()
    }
}

/// Outcome of routing one request
#[derive(Debug, Clone)]
pub struct Selection {
    pub provider: Arc<RegisteredProvider>,
    /// Canonical model id with any `provider/` prefix removed
    pub canonical_model: String,
    /// Model id sent upstream
    pub provider_model: String,
}

/// All configured providers, keyed by name in configuration order
#[derive(Debug, Default)]
pub struct ProviderRegistry {
    providers: IndexMap<String, Arc<RegisteredProvider>>,
    default_provider: Option<String>,
}

impl ProviderRegistry {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let mut providers = IndexMap::with_capacity(config.providers.len());

        for (name, provider_config) in &config.providers {
            let provider = RegisteredProvider::from_config(name, provider_config)?;

            tracing::debug!(
                provider = %name,
                kind = %provider.kind,
                base_url = %provider.base_url,
                mappings = provider.model_mapping.len(),
                "registered provider"
            );

            providers.insert(name.clone(), Arc::new(provider));
        }

        let default_provider = match &config.default_provider {
            Some(name) if !providers.contains_key(name) => {
                return Err(LlmError::Config(format!("default provider '{name}' is not configured")));
            }
            Some(name) => Some(name.clone()),
            // A sole provider stands in for an unset default
            None if providers.len() == 1 => providers.keys().next().cloned(),
            None => None,
        };

        Ok(Self {
            providers,
            default_provider,
        })
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<RegisteredProvider>> {
        self.providers.get(name)
    }

    /// Providers in configuration order
    pub fn iter(&self) -> impl Iterator<Item = &Arc<RegisteredProvider>> {
        self.providers.values()
    }

    /// Named provider, or the default when no name is given
    pub fn resolve_provider(&self, name: Option<&str>) -> Result<Arc<RegisteredProvider>, LlmError> {
        let name = match name {
            Some(name) => name,
            None => self.default_provider.as_deref().ok_or_else(|| {
                LlmError::Config("no provider selected and no default provider is configured".to_owned())
            })?,
        };

        self.providers
            .get(name)
            .cloned()
            .ok_or_else(|| LlmError::Config(format!("unknown provider '{name}'")))
    }

    /// Pick the provider and model for a request
    ///
    /// Precedence: explicit header, `metadata.provider`, a `provider/model`
    /// prefix naming a registered provider, then the default provider.
    pub fn select(&self, header: Option<&str>, request: &MessagesRequest) -> Result<Selection, LlmError> {
        let prefixed = request
            .model
            .split_once('/')
            .filter(|(prefix, rest)| !rest.is_empty() && self.providers.contains_key(*prefix));

        let explicit = header.or_else(|| request.metadata_provider());

        let (provider, canonical_model) = match (explicit, prefixed) {
            (Some(name), Some((prefix, rest))) if name == prefix => (self.resolve_provider(Some(name))?, rest),
            (Some(name), _) => (self.resolve_provider(Some(name))?, request.model.as_str()),
            (None, Some((prefix, rest))) => (self.resolve_provider(Some(prefix))?, rest),
            (None, None) => (self.resolve_provider(None)?, request.model.as_str()),
        };

        let provider_model = provider.resolve_model(canonical_model).to_owned();

        Ok(Selection {
            canonical_model: canonical_model.to_owned(),
            provider_model,
            provider,
        })
    }

    /// Canonical model ids named in mapping tables, with their provider
    pub fn models(&self) -> Vec<(String, String)> {
        self.providers
            .values()
            .flat_map(|provider| {
                provider
                    .model_mapping
                    .iter()
                    .map(|(canonical, _)| (canonical.to_owned(), provider.name.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn registry(toml: &str) -> ProviderRegistry {
        let config: LlmConfig = toml::from_str(toml).unwrap();
        ProviderRegistry::from_config(&config).unwrap()
    }

    fn request(model: &str, metadata: serde_json::Value) -> MessagesRequest {
        serde_json::from_value(json!({
            "model": model,
            "messages": [{"role": "user", "content": "hi"}],
            "metadata": metadata
        }))
        .unwrap()
    }

    const TWO_PROVIDERS: &str = r#"
        default_provider = "ollama"

        [providers.ollama]
        type = "ollama"
        default_model = "llama3.1"
        model_mapping = "claude-3-haiku:llama2,claude-3-sonnet:llama2:13b"

        [providers.openai]
        type = "openai"
        base_url = "http://127.0.0.1:9/v1"
    "#;

    #[test]
    fn mapped_and_default_models() {
        let registry = registry(TWO_PROVIDERS);
        let ollama = registry.resolve_provider(Some("ollama")).unwrap();

        assert_eq!(ollama.resolve_model("claude-3-haiku"), "llama2");
        assert_eq!(ollama.resolve_model("claude-3-sonnet"), "llama2:13b");
        assert_eq!(ollama.resolve_model("claude-3-opus"), "llama3.1");
    }

    #[test]
    fn canonical_id_passes_through_without_default() {
        let registry = registry(TWO_PROVIDERS);
        let openai = registry.resolve_provider(Some("openai")).unwrap();

        assert_eq!(openai.resolve_model("claude-3-5-sonnet"), "claude-3-5-sonnet");
        assert_eq!(openai.base_url.as_str(), "http://127.0.0.1:9/v1");
    }

    #[test]
    fn base_url_falls_back_to_kind_default() {
        let registry = registry(TWO_PROVIDERS);
        let ollama = registry.get("ollama").unwrap();

        assert_eq!(ollama.base_url.as_str(), "http://localhost:11434/");
    }

    #[test]
    fn unknown_provider_is_a_config_error() {
        let err = registry(TWO_PROVIDERS).resolve_provider(Some("bedrock")).unwrap_err();

        assert!(matches!(err, LlmError::Config(_)));
        assert_eq!(err.to_string(), "configuration error: unknown provider 'bedrock'");
    }

    #[test]
    fn single_provider_is_the_default() {
        let registry = registry(
            r#"
            [providers.local]
            type = "vllm"
            "#,
        );

        assert_eq!(registry.resolve_provider(None).unwrap().name, "local");
    }

    #[test]
    fn no_default_with_several_providers() {
        let registry = registry(
            r#"
            [providers.a]
            type = "vllm"

            [providers.b]
            type = "ollama"
            "#,
        );

        let err = registry.resolve_provider(None).unwrap_err();
        assert!(matches!(err, LlmError::Config(_)));
    }

    #[test]
    fn default_provider_must_exist() {
        let config: LlmConfig = toml::from_str(
            r#"
            default_provider = "missing"

            [providers.a]
            type = "vllm"
            "#,
        )
        .unwrap();

        assert!(ProviderRegistry::from_config(&config).is_err());
    }

    #[test]
    fn selection_precedence() {
        let registry = registry(TWO_PROVIDERS);

        let selection = registry.select(None, &request("claude-3-haiku", json!({}))).unwrap();
        assert_eq!((selection.provider.name.as_str(), selection.provider_model.as_str()), ("ollama", "llama2"));

        let selection = registry
            .select(None, &request("openai/claude-3-haiku", json!({})))
            .unwrap();
        assert_eq!(selection.provider.name, "openai");
        assert_eq!(selection.canonical_model, "claude-3-haiku");

        let selection = registry
            .select(None, &request("claude-3-haiku", json!({"provider": "openai"})))
            .unwrap();
        assert_eq!(selection.provider.name, "openai");

        let selection = registry
            .select(Some("ollama"), &request("claude-3-haiku", json!({"provider": "openai"})))
            .unwrap();
        assert_eq!(selection.provider.name, "ollama");
    }

    #[test]
    fn unregistered_prefix_is_part_of_the_model() {
        let registry = registry(TWO_PROVIDERS);
        let selection = registry
            .select(None, &request("meta-llama/Llama-3.1-8B", json!({})))
            .unwrap();

        assert_eq!(selection.provider.name, "ollama");
        assert_eq!(selection.canonical_model, "meta-llama/Llama-3.1-8B");
    }

    #[test]
    fn lists_mapped_models() {
        let models = registry(TWO_PROVIDERS).models();

        assert_eq!(
            models,
            [
                ("claude-3-haiku".to_owned(), "ollama".to_owned()),
                ("claude-3-sonnet".to_owned(), "ollama".to_owned()),
            ]
        );
    }
}
