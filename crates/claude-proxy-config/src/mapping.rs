use indexmap::IndexMap;
use serde::Deserialize;

/// Canonical model id to provider model id table
///
/// Written in configuration as `claudeA:providerA,claudeB:providerB`. Each
/// entry splits on its first `:`, so provider ids may themselves contain
/// colons (`claude-3-sonnet:llama2:13b`). Later entries override earlier
/// ones with the same key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct ModelMapping(IndexMap<String, String>);

impl ModelMapping {
    /// Provider model id mapped to `canonical`, if any
    pub fn get(&self, canonical: &str) -> Option<&str> {
        self.0.get(canonical).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Entries in configuration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl std::str::FromStr for ModelMapping {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut entries = IndexMap::new();

        for entry in raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
            let Some((canonical, provider)) = entry.split_once(':') else {
                return Err(format!("model mapping entry '{entry}' is missing ':'"));
            };

            let (canonical, provider) = (canonical.trim(), provider.trim());

            if canonical.is_empty() || provider.is_empty() {
                return Err(format!("model mapping entry '{entry}' has an empty side"));
            }

            if let Some(previous) = entries.insert(canonical.to_owned(), provider.to_owned()) {
                tracing::debug!(model = canonical, previous, "model mapping entry overridden by a later one");
            }
        }

        Ok(Self(entries))
    }
}

impl TryFrom<String> for ModelMapping {
    type Error = String;

    fn try_from(raw: String) -> Result<Self, Self::Error> {
        raw.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_first_colon() {
        let mapping: ModelMapping = "claude-3-haiku:llama2,claude-3-sonnet:llama2:13b".parse().unwrap();

        assert_eq!(mapping.get("claude-3-haiku"), Some("llama2"));
        assert_eq!(mapping.get("claude-3-sonnet"), Some("llama2:13b"));
        assert_eq!(mapping.get("claude-3-opus"), None);
    }

    #[test]
    fn whitespace_and_empty_entries() {
        let mapping: ModelMapping = " claude-3-haiku : llama2 ,, ,claude-3-opus:qwen2.5:72b ,".parse().unwrap();

        let entries: Vec<_> = mapping.iter().collect();
        assert_eq!(entries, [("claude-3-haiku", "llama2"), ("claude-3-opus", "qwen2.5:72b")]);
    }

    #[test]
    fn empty_string_is_empty_mapping() {
        let mapping: ModelMapping = "".parse().unwrap();
        assert!(mapping.is_empty());
    }

    #[test]
    fn last_duplicate_wins() {
        let mapping: ModelMapping = "claude-3-haiku:llama2,claude-3-haiku:mistral".parse().unwrap();

        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.get("claude-3-haiku"), Some("mistral"));
    }

    #[test]
    fn entry_without_separator_is_rejected() {
        let err = "claude-3-haiku:llama2,claude-3-opus".parse::<ModelMapping>().unwrap_err();
        insta::assert_snapshot!(err, @"model mapping entry 'claude-3-opus' is missing ':'");
    }

    #[test]
    fn entry_with_empty_side_is_rejected() {
        let err = ":llama2".parse::<ModelMapping>().unwrap_err();
        insta::assert_snapshot!(err, @"model mapping entry ':llama2' has an empty side");

        let err = "claude-3-haiku: ".parse::<ModelMapping>().unwrap_err();
        insta::assert_snapshot!(err, @"model mapping entry 'claude-3-haiku:' has an empty side");
    }

    #[test]
    fn deserializes_from_toml_string() {
        #[derive(Deserialize)]
        struct Holder {
            model_mapping: ModelMapping,
        }

        let holder: Holder = toml::from_str(r#"model_mapping = "claude-3-5-sonnet:gpt-4o""#).unwrap();
        assert_eq!(holder.model_mapping.get("claude-3-5-sonnet"), Some("gpt-4o"));

        let err = toml::from_str::<Holder>(r#"model_mapping = "broken""#).err().unwrap();
        assert!(err.to_string().contains("model mapping entry 'broken' is missing ':'"));
    }
}
