//! Backend construction from configuration.

use std::sync::Arc;

use reqwest::Client;
use tracing::info;

use super::backend::{InferenceBackend, Provider};
use super::error::LLMError;
use super::openai::OpenAICompatibleBackend;
use crate::config::BackendConfig;

/// Default base URLs for each provider.
pub mod defaults {
    pub const OLLAMA: &str = "http://localhost:11434/v1";
    pub const OPENAI: &str = "https://api.openai.com/v1";
    pub const OPENROUTER: &str = "https://openrouter.ai/api/v1";
}

/// Build the configured backend, reading API keys from the environment.
///
/// `OPENAI_API_KEY` and `OPENROUTER_API_KEY` are required for their providers.
/// Ollama needs no key. Any other provider name requires an explicit
/// `base_url` and uses `OPENAI_API_KEY` when it is set.
pub fn build_backend(config: &BackendConfig) -> Result<Arc<dyn InferenceBackend>, LLMError> {
    build_backend_with(config, |name| std::env::var(name).ok())
}

fn build_backend_with(
    config: &BackendConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Arc<dyn InferenceBackend>, LLMError> {
    let (default_url, api_key) = match &config.provider {
        Provider::Ollama => (Some(defaults::OLLAMA), None),
        Provider::OpenAI => (
            Some(defaults::OPENAI),
            Some(require_key(&config.provider, "OPENAI_API_KEY", &lookup)?),
        ),
        Provider::OpenRouter => (
            Some(defaults::OPENROUTER),
            Some(require_key(&config.provider, "OPENROUTER_API_KEY", &lookup)?),
        ),
        Provider::Other(_) => (None, lookup("OPENAI_API_KEY")),
    };

    let base_url = config
        .base_url
        .as_deref()
        .or(default_url)
        .ok_or_else(|| LLMError::UnsupportedProvider(config.provider.to_string()))?;

    info!(
        provider = %config.provider,
        model = %config.model,
        base_url,
        "Configured inference backend"
    );

    let backend = OpenAICompatibleBackend::new(Client::new(), base_url, api_key, &config.model)
        .with_system_prompt(&config.system_prompt)
        .with_max_tokens(config.max_tokens)
        .with_temperature(config.temperature);

    Ok(Arc::new(backend))
}

fn require_key(
    provider: &Provider,
    env_var: &'static str,
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<String, LLMError> {
    lookup(env_var)
        .filter(|key| !key.is_empty())
        .ok_or_else(|| LLMError::MissingApiKey {
            provider: provider.clone(),
            env_var,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: Provider) -> BackendConfig {
        BackendConfig {
            provider,
            ..BackendConfig::default()
        }
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn ollama_needs_no_key() {
        assert!(build_backend_with(&config(Provider::Ollama), no_env).is_ok());
    }

    #[test]
    fn openai_requires_key() {
        let err = build_backend_with(&config(Provider::OpenAI), no_env).err();
        match err {
            Some(LLMError::MissingApiKey { env_var, .. }) => assert_eq!(env_var, "OPENAI_API_KEY"),
            other => panic!("expected MissingApiKey, got {other:?}"),
        }
    }

    #[test]
    fn openrouter_uses_its_own_key() {
        let lookup = |name: &str| (name == "OPENROUTER_API_KEY").then(|| "sk-or".to_string());
        assert!(build_backend_with(&config(Provider::OpenRouter), lookup).is_ok());
        assert!(build_backend_with(&config(Provider::OpenAI), lookup).is_err());
    }

    #[test]
    fn unknown_provider_requires_base_url() {
        let provider = Provider::Other("vllm".into());
        let err = build_backend_with(&config(provider.clone()), no_env).err();
        assert!(matches!(err, Some(LLMError::UnsupportedProvider(name)) if name == "vllm"));

        let with_url = BackendConfig {
            provider,
            base_url: Some("http://localhost:8000/v1".into()),
            ..BackendConfig::default()
        };
        assert!(build_backend_with(&with_url, no_env).is_ok());
    }
}
