//! OpenAI-compatible backend.
//!
//! Works with OpenAI, OpenRouter, Ollama, and other compatible APIs.

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::backend::InferenceBackend;
use super::error::LLMError;
use super::types::{ChatRequest, ChatResponse, Message, Role, Turn};

/// Chat completion backend.
///
/// Every call sends the configured system prompt, then the given history as
/// alternating user and assistant messages, then the input. The backend
/// itself is stateless; callers own the history.
pub struct OpenAICompatibleBackend {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    system_prompt: String,
    max_tokens: u32,
    temperature: Option<f32>,
}

impl OpenAICompatibleBackend {
    #[must_use]
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            system_prompt: String::new(),
            max_tokens: 1024,
            temperature: None,
        }
    }

    #[must_use]
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    #[must_use]
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    #[must_use]
    pub fn with_temperature(mut self, temperature: Option<f32>) -> Self {
        self.temperature = temperature;
        self
    }

    fn build_request(&self, history: &[Turn], input: &str) -> ChatRequest {
        let mut messages = Vec::with_capacity(2 + history.len() * 2);
        if !self.system_prompt.is_empty() {
            messages.push(Message::text(Role::System, &self.system_prompt));
        }
        for turn in history {
            messages.push(Message::text(Role::User, &turn.input));
            messages.push(Message::text(Role::Assistant, &turn.reply));
        }
        messages.push(Message::text(Role::User, input));

        ChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_tokens: Some(self.max_tokens),
        }
    }
}

#[async_trait]
impl InferenceBackend for OpenAICompatibleBackend {
    async fn generate(&self, input: &str) -> Result<String, LLMError> {
        self.generate_with_history(&[], input).await
    }

    async fn generate_with_history(
        &self,
        history: &[Turn],
        input: &str,
    ) -> Result<String, LLMError> {
        let url = format!("{}/chat/completions", self.base_url);

        let mut req = self
            .client
            .post(&url)
            .header("Content-Type", "application/json");

        if let Some(ref key) = self.api_key {
            req = req.header("Authorization", format!("Bearer {}", key));
        }

        let response = req.json(&self.build_request(history, input)).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response.text().await.unwrap_or_default();
            return Err(LLMError::Api { status, message });
        }

        let body = response.text().await?;
        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| LLMError::MalformedResponse(e.to_string()))?;

        let content = parsed
            .first_content()
            .ok_or_else(|| LLMError::MalformedResponse("no message content".to_string()))?;

        debug!(
            model = %self.model,
            turns = history.len(),
            chars = content.len(),
            "Backend reply received"
        );
        Ok(content.to_string())
    }
}
