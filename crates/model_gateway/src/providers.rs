//! Provider name → client factory.

use reqwest::Client;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;

use orchestra_core::{config::LlmSettings, traits::LlmClient, Error, Result};

use crate::anthropic::{self, AnthropicClient};
use crate::openai::OpenAiClient;

/// Built-in base URLs of the OpenAI-wire providers.
const OPENAI_WIRE_PROVIDERS: &[(&str, &str)] = &[
    ("openai", "https://api.openai.com/v1"),
    ("deepseek", "https://api.deepseek.com/v1"),
    ("mistral", "https://api.mistral.ai/v1"),
    ("google", "https://generativelanguage.googleapis.com/v1beta/openai"),
];

pub struct ProviderFactory {
    http: Client,
    settings: LlmSettings,
}

impl ProviderFactory {
    pub fn new(settings: LlmSettings) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| Error::configuration(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http, settings })
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Base URL for an OpenAI-wire provider, honouring config overrides.
    pub fn base_url(&self, provider: &str) -> Option<String> {
        if let Some(url) = self.settings.base_urls.get(provider) {
            return Some(url.clone());
        }
        OPENAI_WIRE_PROVIDERS
            .iter()
            .find(|(name, _)| *name == provider)
            .map(|(_, url)| url.to_string())
    }

    pub fn is_supported(&self, provider: &str) -> bool {
        provider == "anthropic" || self.base_url(provider).is_some()
    }

    /// Build a client for `provider` authenticated with `api_key`.
    pub fn create(&self, provider: &str, api_key: SecretString) -> Result<Arc<dyn LlmClient>> {
        let provider = provider.to_ascii_lowercase();
        if provider == "anthropic" {
            let base = self
                .settings
                .anthropic_base_url
                .clone()
                .unwrap_or_else(|| anthropic::DEFAULT_BASE_URL.to_string());
            return Ok(Arc::new(AnthropicClient::new(self.http.clone(), base, api_key)));
        }

        let base = self
            .base_url(&provider)
            .ok_or_else(|| Error::configuration(format!("Unsupported LLM provider '{}'", provider)))?;
        Ok(Arc::new(OpenAiClient::new(self.http.clone(), provider, base, api_key)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::Secret;

    #[test]
    fn test_factory_maps_providers() {
        let mut settings = LlmSettings::default();
        settings
            .base_urls
            .insert("deepseek".into(), "http://localhost:9999/v1".into());
        let factory = ProviderFactory::new(settings).unwrap();

        assert_eq!(factory.base_url("deepseek").unwrap(), "http://localhost:9999/v1");
        assert!(factory.base_url("google").unwrap().contains("generativelanguage.googleapis.com/v1beta"));

        let key = || Secret::new("k".to_string());
        assert_eq!(factory.create("Anthropic", key()).unwrap().provider(), "anthropic");
        assert_eq!(factory.create("mistral", key()).unwrap().provider(), "mistral");
        assert!(factory.create("cohere", key()).is_err());
        assert!(!factory.is_supported("cohere"));
    }
}
