// Provider Factory
//
// Creates Provider instances from a ProviderType plus configuration, so hosts
// can select the vendor at runtime from an environment value. Unknown
// identifiers and missing credentials fail here, at startup, never mid-loop.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::mock::MockProvider;
use crate::provider::Provider;
use crate::providers::anthropic::AnthropicProvider;
use crate::providers::openai::OpenAiProvider;

/// Provider type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Anthropic,
    OpenAi,
    Mock,
}

impl std::str::FromStr for ProviderType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "anthropic" | "claude" => Ok(ProviderType::Anthropic),
            "openai" | "gpt" => Ok(ProviderType::OpenAi),
            "mock" => Ok(ProviderType::Mock),
            _ => Err(format!("Unknown provider type: {}", s)),
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderType::Anthropic => write!(f, "anthropic"),
            ProviderType::OpenAi => write!(f, "openai"),
            ProviderType::Mock => write!(f, "mock"),
        }
    }
}

/// Configuration for creating a provider
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    /// Type of provider
    pub provider_type: ProviderType,
    /// API key for authentication
    pub api_key: Option<String>,
    /// Base URL override (optional)
    pub base_url: Option<String>,
    /// Model override; each adapter has a vendor default
    pub model: Option<String>,
    /// Per-reply output token cap (adapter default when unset)
    pub max_tokens: Option<u32>,
    /// Sampling temperature (vendor default when unset)
    pub temperature: Option<f32>,
}

impl ProviderConfig {
    /// Create a new provider config
    pub fn new(provider_type: ProviderType) -> Self {
        Self {
            provider_type,
            api_key: None,
            base_url: None,
            model: None,
            max_tokens: None,
            temperature: None,
        }
    }

    /// Read configuration from the environment.
    ///
    /// `OPSLOOP_PROVIDER` selects the vendor (default: anthropic);
    /// `OPSLOOP_MODEL` overrides the model; the API key comes from the
    /// vendor's conventional variable (`ANTHROPIC_API_KEY` / `OPENAI_API_KEY`).
    pub fn from_env() -> Result<Self> {
        let provider_type = match std::env::var("OPSLOOP_PROVIDER") {
            Ok(raw) => raw.parse::<ProviderType>().map_err(Error::Configuration)?,
            Err(_) => ProviderType::Anthropic,
        };

        let api_key = match provider_type {
            ProviderType::Anthropic => std::env::var("ANTHROPIC_API_KEY").ok(),
            ProviderType::OpenAi => std::env::var("OPENAI_API_KEY").ok(),
            ProviderType::Mock => None,
        };

        Ok(Self {
            provider_type,
            api_key,
            base_url: None,
            model: std::env::var("OPSLOOP_MODEL").ok(),
            max_tokens: None,
            temperature: None,
        })
    }

    /// Set the API key
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the base URL
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set the model
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Cap the output tokens per reply
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the sampling temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::new(ProviderType::Anthropic)
    }
}

/// Boxed provider for dynamic dispatch
pub type BoxedProvider = Box<dyn Provider>;

/// Create a provider based on configuration
///
/// The HTTP adapters require an API key in the config; `ProviderType::Mock`
/// yields a canned provider for dry runs and needs no credentials.
pub fn create_provider(config: &ProviderConfig) -> Result<BoxedProvider> {
    match config.provider_type {
        ProviderType::Anthropic => {
            let api_key = require_api_key(config, "ANTHROPIC_API_KEY")?;
            let mut provider = match &config.base_url {
                Some(url) => AnthropicProvider::with_base_url(api_key, url),
                None => AnthropicProvider::new(api_key),
            };
            if let Some(model) = &config.model {
                provider = provider.with_model(model);
            }
            if let Some(max_tokens) = config.max_tokens {
                provider = provider.with_max_tokens(max_tokens);
            }
            if let Some(temperature) = config.temperature {
                provider = provider.with_temperature(temperature);
            }
            Ok(Box::new(provider))
        }
        ProviderType::OpenAi => {
            let api_key = require_api_key(config, "OPENAI_API_KEY")?;
            let mut provider = match &config.base_url {
                Some(url) => OpenAiProvider::with_base_url(api_key, url),
                None => OpenAiProvider::new(api_key),
            };
            if let Some(model) = &config.model {
                provider = provider.with_model(model);
            }
            if let Some(max_tokens) = config.max_tokens {
                provider = provider.with_max_tokens(max_tokens);
            }
            if let Some(temperature) = config.temperature {
                provider = provider.with_temperature(temperature);
            }
            Ok(Box::new(provider))
        }
        ProviderType::Mock => Ok(Box::new(MockProvider::canned(
            r#"{"analysis": "dry run complete", "findings": []}"#,
        ))),
    }
}

fn require_api_key<'a>(config: &'a ProviderConfig, env_hint: &str) -> Result<&'a str> {
    config.api_key.as_deref().ok_or_else(|| {
        Error::config(format!(
            "{} provider requires an API key; set {} or use with_api_key",
            config.provider_type, env_hint
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_type_parsing() {
        assert_eq!(
            "anthropic".parse::<ProviderType>().unwrap(),
            ProviderType::Anthropic
        );
        assert_eq!(
            "claude".parse::<ProviderType>().unwrap(),
            ProviderType::Anthropic
        );
        assert_eq!(
            "OpenAI".parse::<ProviderType>().unwrap(),
            ProviderType::OpenAi
        );
        assert_eq!("gpt".parse::<ProviderType>().unwrap(), ProviderType::OpenAi);
        assert_eq!("mock".parse::<ProviderType>().unwrap(), ProviderType::Mock);

        assert!("ollama".parse::<ProviderType>().is_err());
        assert!("".parse::<ProviderType>().is_err());
    }

    #[test]
    fn test_provider_type_display() {
        assert_eq!(ProviderType::Anthropic.to_string(), "anthropic");
        assert_eq!(ProviderType::OpenAi.to_string(), "openai");
        assert_eq!(ProviderType::Mock.to_string(), "mock");
    }

    #[test]
    fn test_provider_config_builder() {
        let config = ProviderConfig::new(ProviderType::Anthropic)
            .with_api_key("test-key")
            .with_base_url("https://llm-gateway.internal")
            .with_model("claude-jumbo-99")
            .with_max_tokens(2048)
            .with_temperature(0.5);

        assert_eq!(config.provider_type, ProviderType::Anthropic);
        assert_eq!(config.api_key, Some("test-key".to_string()));
        assert_eq!(config.base_url, Some("https://llm-gateway.internal".to_string()));
        assert_eq!(config.model, Some("claude-jumbo-99".to_string()));
        assert_eq!(config.max_tokens, Some(2048));
        assert_eq!(config.temperature, Some(0.5));
    }

    #[test]
    fn test_default_provider_is_anthropic() {
        assert_eq!(ProviderConfig::default().provider_type, ProviderType::Anthropic);
    }

    #[test]
    fn test_create_provider_requires_api_key() {
        let config = ProviderConfig::new(ProviderType::OpenAi);
        let err = create_provider(&config).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("OPENAI_API_KEY"));

        let config_with_key = ProviderConfig::new(ProviderType::OpenAi).with_api_key("test-key");
        assert!(create_provider(&config_with_key).is_ok());
    }

    #[test]
    fn test_create_provider_respects_model_override() {
        let config = ProviderConfig::new(ProviderType::Anthropic)
            .with_api_key("test-key")
            .with_model("claude-jumbo-99");

        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.model(), "claude-jumbo-99");
        assert_ne!(provider.model(), provider.default_model());
    }

    #[test]
    fn test_create_mock_provider_needs_no_key() {
        let provider = create_provider(&ProviderConfig::new(ProviderType::Mock)).unwrap();
        assert_eq!(provider.provider_type(), ProviderType::Mock);
    }
}
