//! Backend error types.

use std::time::Duration;

use thiserror::Error;

use super::backend::Provider;

/// Errors produced while invoking or constructing a backend.
#[derive(Debug, Error)]
pub enum LLMError {
    /// HTTP request failed
    #[error("http request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// API returned an error response
    #[error("api error (status {status}): {message}")]
    Api { status: u16, message: String },

    /// API answered but the body was not a usable reply
    #[error("malformed backend response: {0}")]
    MalformedResponse(String),

    /// The call did not complete within the configured timeout
    #[error("backend timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("no API key for provider '{provider}' (set {env_var})")]
    MissingApiKey {
        provider: Provider,
        env_var: &'static str,
    },

    #[error("unsupported provider '{0}'")]
    UnsupportedProvider(String),
}
