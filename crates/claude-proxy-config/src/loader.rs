use std::path::Path;

use crate::Config;

impl Config {
    /// Read, expand and validate a TOML configuration file
    ///
    /// # Errors
    ///
    /// Fails when the file is unreadable, a placeholder cannot be expanded,
    /// the TOML does not match the schema, or validation rejects it
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        Self::from_toml(&raw)
    }

    /// Parse configuration from TOML text
    ///
    /// # Errors
    ///
    /// Same as [`Config::load`], minus the file access
    pub fn from_toml(raw: &str) -> anyhow::Result<Self> {
        let expanded =
            crate::env::expand_env(raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self = toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Check cross-field constraints that serde cannot express
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.llm.providers.is_empty() {
            anyhow::bail!("at least one provider must be configured under [llm.providers]");
        }

        if let Some(ref name) = self.llm.default_provider
            && !self.llm.providers.contains_key(name)
        {
            anyhow::bail!("default_provider '{name}' does not name a configured provider");
        }

        for (name, provider) in &self.llm.providers {
            if name.is_empty() || name.contains('/') {
                anyhow::bail!("provider name '{name}' must be non-empty and must not contain '/'");
            }

            let timeouts = &provider.timeouts;

            for (field, value) in [
                ("connect", timeouts.connect),
                ("first_byte", timeouts.first_byte),
                ("idle", timeouts.idle),
                ("request", timeouts.request),
            ] {
                if value.is_zero() {
                    anyhow::bail!("provider '{name}': timeouts.{field} must be greater than zero");
                }
            }
        }

        if let Some(ref telemetry) = self.telemetry
            && !(0.0..=1.0).contains(&telemetry.sampling_ratio)
        {
            anyhow::bail!("telemetry.sampling_ratio must be between 0.0 and 1.0");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::{Config, ProviderKind};

    #[test]
    fn full_example() {
        let raw = r#"
            [server]
            listen_address = "127.0.0.1:8082"

            [llm]
            default_provider = "ollama"

            [llm.providers.ollama]
            type = "ollama"
            base_url = "http://localhost:11434"
            default_model = "llama3.1"
            model_mapping = "claude-3-haiku:llama2,claude-3-sonnet:llama2:13b"

            [llm.providers.ollama.timeouts]
            connect = "5s"
            first_byte = "60s"
            idle = "30s"
            request = "5m"

            [llm.providers.openai]
            type = "openai"
            api_key = "sk-test"

            [telemetry]
            service_name = "claude-proxy"
        "#;

        let config = Config::from_toml(raw).unwrap();

        assert_eq!(config.server.listen_address.unwrap().port(), 8082);
        assert_eq!(config.llm.default_provider.as_deref(), Some("ollama"));

        let ollama = &config.llm.providers["ollama"];
        assert_eq!(ollama.kind, ProviderKind::Ollama);
        assert_eq!(ollama.model_mapping.get("claude-3-sonnet"), Some("llama2:13b"));
        assert_eq!(ollama.timeouts.request, Duration::from_secs(300));

        let names: Vec<_> = config.llm.providers.keys().map(String::as_str).collect();
        assert_eq!(names, ["ollama", "openai"]);
    }

    #[test]
    fn mapping_from_environment() {
        let raw = r#"
            [llm.providers.local]
            type = "ollama"
            model_mapping = "{{ env.CLAUDE_PROXY_TEST_LOADER_MAPPING | default(\"\") }}"
        "#;

        temp_env::with_var("CLAUDE_PROXY_TEST_LOADER_MAPPING", Some("claude-3-haiku:phi3"), || {
            let config = Config::from_toml(raw).unwrap();
            assert_eq!(config.llm.providers["local"].model_mapping.get("claude-3-haiku"), Some("phi3"));
        });

        temp_env::with_var_unset("CLAUDE_PROXY_TEST_LOADER_MAPPING", || {
            let config = Config::from_toml(raw).unwrap();
            assert!(config.llm.providers["local"].model_mapping.is_empty());
        });
    }

    #[test]
    fn no_providers() {
        let err = Config::from_toml("[server]").unwrap_err();
        insta::assert_snapshot!(err, @"at least one provider must be configured under [llm.providers]");
    }

    #[test]
    fn unknown_default_provider() {
        let raw = r#"
            [llm]
            default_provider = "gemini"

            [llm.providers.local]
            type = "ollama"
        "#;

        let err = Config::from_toml(raw).unwrap_err();
        insta::assert_snapshot!(err, @"default_provider 'gemini' does not name a configured provider");
    }

    #[test]
    fn zero_idle_timeout() {
        let raw = r#"
            [llm.providers.local]
            type = "vllm"

            [llm.providers.local.timeouts]
            idle = "0s"
        "#;

        let err = Config::from_toml(raw).unwrap_err();
        insta::assert_snapshot!(err, @"provider 'local': timeouts.idle must be greater than zero");
    }

    #[test]
    fn every_zero_timeout_is_rejected() {
        for field in ["connect", "first_byte", "idle", "request"] {
            let raw = format!(
                r#"
                [llm.providers.local]
                type = "ollama"

                [llm.providers.local.timeouts]
                {field} = "0s"
                "#
            );

            let err = Config::from_toml(&raw).unwrap_err();
            assert_eq!(
                err.to_string(),
                format!("provider 'local': timeouts.{field} must be greater than zero")
            );
        }
    }

    #[test]
    fn malformed_mapping() {
        let raw = r#"
            [llm.providers.local]
            type = "ollama"
            model_mapping = "claude-3-haiku"
        "#;

        let err = Config::from_toml(raw).unwrap_err();
        assert!(err.to_string().contains("model mapping entry 'claude-3-haiku' is missing ':'"));
    }

    #[test]
    fn unknown_fields_rejected() {
        let raw = r#"
            [llm.providers.local]
            type = "ollama"
            fallback = "openai"
        "#;

        assert!(Config::from_toml(raw).is_err());
    }
}
