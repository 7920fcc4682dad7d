//! Client side of the relay.
//!
//! [`RelayClient`] speaks the HTTP/SSE protocol to a remote server,
//! [`LocalRelay`] calls an in-process registry and dispatcher directly. Both
//! implement [`RelayTransport`], which [`ClientSessionController`] drives.

mod controller;
mod error;
mod local;
mod stream;
mod transport;

pub use controller::{ClientSessionController, ControllerError, ControllerState};
pub use error::{ClientError, Result};
pub use local::LocalRelay;
pub use transport::{ExchangeStream, RelayTransport};

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;

use crate::protocol::{SessionId, SubmitRequest, SubmitResponse};

/// Response from the /readyz health check endpoint.
#[derive(Debug, Deserialize)]
pub struct ReadyzResponse {
    pub status: String,
    #[serde(default)]
    pub sessions: usize,
    #[serde(default)]
    pub subscribers: usize,
    #[serde(default)]
    pub in_flight: usize,
}

/// HTTP client for a parley server.
#[derive(Debug, Clone)]
pub struct RelayClient {
    base_url: String,
    http: Client,
}

impl RelayClient {
    /// Create a new client pointing to the given base URL.
    ///
    /// Example: `RelayClient::new("http://localhost:8080")`
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http: Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if the server is ready. Calls GET /readyz.
    pub async fn health(&self) -> Result<ReadyzResponse> {
        let url = format!("{}/readyz", self.base_url);
        let response = self.http.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(ClientError::ServerUnhealthy {
                status: response.status().as_u16(),
            });
        }

        Ok(response.json().await?)
    }

    /// `{base}/api/v1/sessions/{id}/{leaf}`, with the id percent-encoded as a
    /// single path segment.
    fn session_url(&self, session_id: &SessionId, leaf: &str) -> Result<Url> {
        let mut url =
            Url::parse(&self.base_url).map_err(|e| ClientError::InvalidUrl(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|()| ClientError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(["api", "v1", "sessions", session_id.as_str(), leaf]);
        Ok(url)
    }

    /// Parse an error response into a ClientError.
    async fn parse_error(&self, response: reqwest::Response) -> ClientError {
        let status = response.status().as_u16();

        // Try to parse as problem+json
        match response.json::<ProblemDetails>().await {
            Ok(problem) => ClientError::ApiError {
                status,
                message: problem.detail.unwrap_or(problem.title),
            },
            Err(_) => ClientError::ApiError {
                status,
                message: format!("HTTP {}", status),
            },
        }
    }
}

#[async_trait]
impl RelayTransport for RelayClient {
    async fn subscribe(&self, session_id: &SessionId) -> Result<ExchangeStream> {
        let url = self.session_url(session_id, "events")?;
        let response = self
            .http
            .get(url)
            .header("Accept", "text/event-stream")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.parse_error(response).await);
        }
        stream::open_exchange_stream(response, session_id).await
    }

    async fn submit(&self, session_id: &SessionId, message: &str) -> Result<SubmitResponse> {
        let url = self.session_url(session_id, "messages")?;
        let body = SubmitRequest {
            message: message.to_string(),
        };

        let response = self.http.post(url).json(&body).send().await?;
        if response.status().is_success() {
            Ok(response.json().await?)
        } else {
            Err(self.parse_error(response).await)
        }
    }
}

/// RFC 7807 Problem Details response.
#[derive(Deserialize)]
struct ProblemDetails {
    title: String,
    detail: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_new_trims_trailing_slash() {
        let client = RelayClient::new("http://localhost:8080/");
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[test]
    fn session_urls_follow_api_layout() {
        let client = RelayClient::new("http://localhost:8080");
        let id = SessionId::parse("session-1").unwrap();
        assert_eq!(
            client.session_url(&id, "messages").unwrap().as_str(),
            "http://localhost:8080/api/v1/sessions/session-1/messages"
        );
        assert_eq!(
            client.session_url(&id, "events").unwrap().as_str(),
            "http://localhost:8080/api/v1/sessions/session-1/events"
        );
    }

    #[test]
    fn session_urls_encode_reserved_characters() {
        let client = RelayClient::new("http://localhost:8080/relay/");
        let cases = [
            ("a/b", "a%2Fb"),
            ("x%41", "x%2541"),
            ("q?x", "q%3Fx"),
            ("h#1", "h%231"),
        ];
        for (raw, encoded) in cases {
            let url = client
                .session_url(&SessionId::parse(raw).unwrap(), "events")
                .unwrap();
            assert_eq!(
                url.as_str(),
                format!("http://localhost:8080/relay/api/v1/sessions/{encoded}/events")
            );
        }
    }

    #[test]
    fn unparseable_base_url_is_reported() {
        let client = RelayClient::new("not a url");
        let err = client
            .session_url(&SessionId::parse("s").unwrap(), "events")
            .unwrap_err();
        assert!(matches!(err, ClientError::InvalidUrl(_)));
    }
}
