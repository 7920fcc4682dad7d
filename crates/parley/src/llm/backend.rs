//! Backend trait and provider selection.

use std::str::FromStr;

use async_trait::async_trait;
use serde::Deserialize;

use super::error::LLMError;
use super::types::Turn;

// ============================================================================
// Provider Enum
// ============================================================================

/// Supported backend providers. All speak the OpenAI chat completions API.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(from = "String")]
pub enum Provider {
    Ollama,
    #[default]
    OpenAI,
    OpenRouter,
    Other(String),
}

impl Provider {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Provider::Ollama => "ollama",
            Provider::OpenAI => "openai",
            Provider::OpenRouter => "openrouter",
            Provider::Other(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Provider {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Provider::from(s.to_string()))
    }
}

impl From<String> for Provider {
    fn from(s: String) -> Self {
        match s.as_str() {
            "ollama" => Provider::Ollama,
            "openai" => Provider::OpenAI,
            "openrouter" => Provider::OpenRouter,
            _ => Provider::Other(s),
        }
    }
}

// ============================================================================
// InferenceBackend Trait
// ============================================================================

/// An opaque text-generation capability.
///
/// Implementations own their transport, latency and failure modes. The relay
/// applies its own timeout around `generate` and turns every error into a
/// deliverable exchange, so implementations should simply return errors.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Generate reply text for `input`.
    async fn generate(&self, input: &str) -> Result<String, LLMError>;

    /// Generate reply text for `input` as the next turn after `history`,
    /// oldest turn first.
    ///
    /// Backends without conversational context ignore `history`.
    async fn generate_with_history(
        &self,
        history: &[Turn],
        input: &str,
    ) -> Result<String, LLMError> {
        let _ = history;
        self.generate(input).await
    }
}
