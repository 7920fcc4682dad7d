use std::io::ErrorKind;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tokio::fs;

use crate::llm::Provider;
use crate::session::ConversationHistory;

// ============================================================================
// Config (root)
// ============================================================================

/// Default config file name, looked up relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "parley.yaml";

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Yaml(#[from] serde_saphyr::Error),

    #[error("environment variable '{0}' is not set")]
    MissingEnvVar(String),

    #[error("unclosed variable reference '${{' (missing '}}')")]
    UnclosedVarReference,
}

impl Config {
    /// Load configuration from a YAML file.
    ///
    /// A missing file yields the defaults. Environment variable references are
    /// expanded before parsing.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = match fs::read_to_string(path.as_ref()).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Io(e)),
        };
        Self::parse(&contents)
    }

    /// Parse configuration from YAML text.
    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;
        Ok(serde_saphyr::from_str(&expanded)?)
    }
}

// ============================================================================
// Private Helpers (Serde Defaults)
// ============================================================================

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_connections() -> usize {
    1024
}

fn default_request_timeout() -> u64 {
    30
}

fn default_keep_alive_interval() -> u64 {
    15
}

fn default_subscriber_buffer() -> usize {
    64
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_system_prompt() -> String {
    "You are a helpful assistant.".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_backend_timeout() -> u64 {
    60
}

fn default_max_concurrent_requests() -> usize {
    16
}

fn default_history_turns() -> usize {
    20
}

fn default_history_sessions() -> usize {
    1024
}

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supported syntax:
/// - `${VAR}` - required variable, errors if not set
/// - `${VAR:-default}` - optional variable with default value
/// - `${VAR:-}` - optional variable, empty string if not set
/// - `$$` - escaped `$`
///
/// Nested references such as `${VAR:-${OTHER}}` are not supported.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                result.push('$');
            }
            Some('{') => {
                chars.next();
                result.push_str(&parse_var_reference(&mut chars)?);
            }
            _ => result.push('$'),
        }
    }

    Ok(result)
}

/// Parse a variable reference after `${`, consuming through the closing `}`.
fn parse_var_reference(
    chars: &mut std::iter::Peekable<std::str::Chars>,
) -> Result<String, ConfigError> {
    let mut body = String::new();
    let mut closed = false;

    for c in chars.by_ref() {
        if c == '}' {
            closed = true;
            break;
        }
        body.push(c);
    }

    if !closed {
        return Err(ConfigError::UnclosedVarReference);
    }

    let (name, default) = match body.split_once(":-") {
        Some((name, default)) => (name, Some(default)),
        None => (body.as_str(), None),
    };

    match (std::env::var(name), default) {
        (Ok(value), _) => Ok(value),
        (Err(_), Some(default)) => Ok(default.to_string()),
        (Err(_), None) => Err(ConfigError::MissingEnvVar(name.to_string())),
    }
}

// ============================================================================
// ServerConfig
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Concurrent requests served under `/api/v1`, open Push streams included.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Timeout for regular (non-streaming) API requests.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    /// Interval between keep-alive comments on Push streams.
    #[serde(default = "default_keep_alive_interval")]
    pub keep_alive_interval_seconds: u64,
    /// Exchanges buffered per subscriber before deliveries to it are dropped.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_connections: default_max_connections(),
            request_timeout_seconds: default_request_timeout(),
            keep_alive_interval_seconds: default_keep_alive_interval(),
            subscriber_buffer: default_subscriber_buffer(),
        }
    }
}

// ============================================================================
// BackendConfig
// ============================================================================

/// Text-generation backend settings.
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub provider: Provider,
    #[serde(default = "default_model")]
    pub model: String,
    /// Overrides the provider's default endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
    /// A backend call running longer than this is reported as a failure.
    #[serde(default = "default_backend_timeout")]
    pub timeout_seconds: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            model: default_model(),
            base_url: None,
            system_prompt: default_system_prompt(),
            max_tokens: default_max_tokens(),
            temperature: None,
            timeout_seconds: default_backend_timeout(),
        }
    }
}

// ============================================================================
// DispatcherConfig
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct DispatcherConfig {
    /// Upper bound on backend calls running at the same time.
    #[serde(default = "default_max_concurrent_requests")]
    pub max_concurrent_requests: usize,
    /// Completed turns replayed to the backend per session. 0 disables context.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
    /// Sessions whose context is kept; the least recently used is evicted.
    #[serde(default = "default_history_sessions")]
    pub history_sessions: usize,
}

impl DispatcherConfig {
    pub fn conversation_history(&self) -> ConversationHistory {
        ConversationHistory::new(self.history_turns, self.history_sessions)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent_requests(),
            history_turns: default_history_turns(),
            history_sessions: default_history_sessions(),
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.max_connections, 1024);
        assert_eq!(config.server.request_timeout_seconds, 30);
        assert_eq!(config.server.keep_alive_interval_seconds, 15);
        assert_eq!(config.server.subscriber_buffer, 64);
        assert_eq!(config.backend.provider, Provider::OpenAI);
        assert_eq!(config.backend.max_tokens, 1024);
        assert_eq!(config.backend.timeout_seconds, 60);
        assert_eq!(config.backend.system_prompt, "You are a helpful assistant.");
        assert_eq!(config.dispatcher.max_concurrent_requests, 16);
        assert_eq!(config.dispatcher.history_turns, 20);
        assert_eq!(config.dispatcher.history_sessions, 1024);
    }

    #[tokio::test]
    async fn test_load_missing_file_returns_defaults() {
        let tmp_dir = TempDir::new().unwrap();
        let config = Config::load(tmp_dir.path().join("missing.yaml"))
            .await
            .unwrap();
        assert_eq!(config.server.port, 8080);
    }

    #[tokio::test]
    async fn test_load_valid_yaml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
server:
  host: "127.0.0.1"
  port: 3000
  keep_alive_interval_seconds: 5
backend:
  provider: ollama
  model: llama3.2
  base_url: "http://localhost:11434/v1"
  timeout_seconds: 10
dispatcher:
  max_concurrent_requests: 4
  history_turns: 0
"#
        )
        .unwrap();

        let config = Config::load(file.path()).await.unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.keep_alive_interval_seconds, 5);
        assert_eq!(config.server.request_timeout_seconds, 30);
        assert_eq!(config.backend.provider, Provider::Ollama);
        assert_eq!(config.backend.model, "llama3.2");
        assert_eq!(
            config.backend.base_url.as_deref(),
            Some("http://localhost:11434/v1")
        );
        assert_eq!(config.backend.timeout_seconds, 10);
        assert_eq!(config.backend.max_tokens, 1024);
        assert_eq!(config.dispatcher.max_concurrent_requests, 4);
        assert_eq!(config.dispatcher.history_turns, 0);
        assert_eq!(config.dispatcher.history_sessions, 1024);
        assert!(!config.dispatcher.conversation_history().is_enabled());
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let result = Config::parse("server: [unclosed");
        assert!(matches!(result, Err(ConfigError::Yaml(_))));
    }

    #[test]
    fn test_parse_expands_env_vars() {
        // SAFETY: variable name is unique to this test
        unsafe { std::env::set_var("PARLEY_TEST_PORT", "9191") };
        let config = Config::parse("server:\n  port: ${PARLEY_TEST_PORT}\n").unwrap();
        assert_eq!(config.server.port, 9191);
        unsafe { std::env::remove_var("PARLEY_TEST_PORT") };
    }

    #[test]
    fn test_expand_env_vars_no_vars() {
        let input = "plain string, costs $100";
        assert_eq!(expand_env_vars(input).unwrap(), input);
    }

    #[test]
    fn test_expand_env_vars_escaped_dollar() {
        assert_eq!(expand_env_vars("$${NOT_A_VAR}").unwrap(), "${NOT_A_VAR}");
    }

    #[test]
    fn test_expand_env_vars_missing_required_var() {
        // SAFETY: variable name is unique to this test
        unsafe { std::env::remove_var("PARLEY_MISSING_VAR") };
        match expand_env_vars("value: ${PARLEY_MISSING_VAR}") {
            Err(ConfigError::MissingEnvVar(name)) => assert_eq!(name, "PARLEY_MISSING_VAR"),
            other => panic!("expected MissingEnvVar, got {other:?}"),
        }
    }

    #[test]
    fn test_expand_env_vars_with_default() {
        // SAFETY: variable name is unique to this test
        unsafe { std::env::remove_var("PARLEY_UNSET_WITH_DEFAULT") };
        let result = expand_env_vars("value: ${PARLEY_UNSET_WITH_DEFAULT:-fallback}").unwrap();
        assert_eq!(result, "value: fallback");
    }

    #[test]
    fn test_expand_env_vars_with_empty_default() {
        // SAFETY: variable name is unique to this test
        unsafe { std::env::remove_var("PARLEY_UNSET_EMPTY") };
        let result = expand_env_vars("value: ${PARLEY_UNSET_EMPTY:-}").unwrap();
        assert_eq!(result, "value: ");
    }

    #[test]
    fn test_expand_env_vars_unclosed_brace() {
        assert!(matches!(
            expand_env_vars("value: ${UNCLOSED"),
            Err(ConfigError::UnclosedVarReference)
        ));
    }
}
