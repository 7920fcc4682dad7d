//! Wire types shared by the parley relay server and its clients.
//!
//! The relay exposes two operations:
//!
//! - **Submit** (client → server): a message tagged with a [`SessionId`].
//!   The call is acknowledged immediately; it carries no reply.
//! - **Push** (server → client): a stream of [`Exchange`] records, scoped so a
//!   subscriber only ever sees exchanges for the session it registered.
//!
//! Over HTTP, Submit is `POST /api/v1/sessions/{session_id}/messages` and Push
//! is a Server-Sent Events stream at `GET /api/v1/sessions/{session_id}/events`.
//!
//! # Example
//!
//! ```
//! use parley_protocol::{Exchange, SessionId};
//!
//! let session_id = SessionId::parse("session-1").unwrap();
//! let exchange = Exchange::reply(session_id, "Hello", "Hi there");
//! assert!(!exchange.is_error());
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

// ============================================================================
// Constants
// ============================================================================

/// Prefix for generated session identifiers.
pub const SESSION_ID_PREFIX: &str = "session-";

/// Prefix for exchange identifiers.
pub const EXCHANGE_ID_PREFIX: &str = "msg_";

/// Prefix of the reply text carried by an exchange that reports a backend failure.
pub const ERROR_PREFIX: &str = "Error:";

/// Maximum accepted length of a session identifier, in bytes.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Length of the random suffix in generated session identifiers.
const SESSION_ID_SUFFIX_LEN: usize = 9;

/// SSE event names used on the Push stream.
pub mod sse {
    /// Emitted once, after the subscription is registered.
    pub const READY: &str = "ready";
    /// Emitted for every exchange delivered to the subscription.
    pub const EXCHANGE: &str = "exchange";
}

// ============================================================================
// Session Identifier
// ============================================================================

/// Errors produced when validating a session identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionIdError {
    #[error("session id must not be empty")]
    Empty,

    #[error("session id is {len} bytes long (max {max})")]
    TooLong { len: usize, max: usize },

    #[error("session id contains invalid character {0:?}")]
    InvalidChar(char),
}

/// Opaque identifier scoping which exchanges a subscriber may receive.
///
/// A client generates one with [`SessionId::generate`] at startup and keeps it
/// for its whole lifetime. Identifiers received over the wire go through
/// [`SessionId::parse`], so a `SessionId` value is always well-formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh identifier of the form `session-<unix-millis>-<random>`.
    ///
    /// The random suffix is nine base-36 characters, which makes collisions
    /// between clients started in the same millisecond practically impossible.
    #[must_use]
    pub fn generate() -> Self {
        let millis = Utc::now().timestamp_millis();
        let mut rng = rand::rng();
        let suffix: String = (0..SESSION_ID_SUFFIX_LEN)
            .filter_map(|_| char::from_digit(rng.random_range(0..36), 36))
            .collect();
        Self(format!("{SESSION_ID_PREFIX}{millis}-{suffix}"))
    }

    /// Validate a raw identifier.
    ///
    /// Accepts any non-empty string up to [`MAX_SESSION_ID_LEN`] bytes that
    /// contains no whitespace or control characters.
    pub fn parse(raw: impl Into<String>) -> Result<Self, SessionIdError> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            return Err(SessionIdError::Empty);
        }
        if raw.len() > MAX_SESSION_ID_LEN {
            return Err(SessionIdError::TooLong {
                len: raw.len(),
                max: MAX_SESSION_ID_LEN,
            });
        }
        if let Some(c) = raw.chars().find(|c| c.is_whitespace() || c.is_control()) {
            return Err(SessionIdError::InvalidChar(c));
        }
        Ok(Self(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for SessionId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for SessionId {
    type Error = SessionIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SessionId> for String {
    fn from(id: SessionId) -> Self {
        id.0
    }
}

// ============================================================================
// Exchange
// ============================================================================

/// Who produced the reply text of an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sender {
    /// A normal reply generated by the backend.
    Assistant,
    /// A backend failure surfaced as content.
    System,
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sender::Assistant => write!(f, "assistant"),
            Sender::System => write!(f, "system"),
        }
    }
}

/// Generate a fresh, unique exchange identifier.
#[must_use]
pub fn new_exchange_id() -> String {
    format!("{EXCHANGE_ID_PREFIX}{}", Ulid::new())
}

/// One submitted message paired with its generated reply.
///
/// Exchanges are immutable once built. The relay builds exactly one per
/// dispatched message, after the backend call has completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exchange {
    pub id: String,
    pub session_id: SessionId,
    pub message: String,
    pub response: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
}

impl Exchange {
    /// Build an exchange carrying a backend reply, timestamped now.
    pub fn reply(
        session_id: SessionId,
        message: impl Into<String>,
        response: impl Into<String>,
    ) -> Self {
        Self::build(session_id, message.into(), response.into(), Sender::Assistant)
    }

    /// Build an exchange reporting a backend failure, timestamped now.
    ///
    /// The reply text is `Error: <error>`.
    pub fn failure(
        session_id: SessionId,
        message: impl Into<String>,
        error: impl fmt::Display,
    ) -> Self {
        Self::build(
            session_id,
            message.into(),
            format!("{ERROR_PREFIX} {error}"),
            Sender::System,
        )
    }

    /// Replace the identifier, for exchanges whose id was handed out before
    /// the reply existed.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    fn build(session_id: SessionId, message: String, response: String, sender: Sender) -> Self {
        Self {
            id: new_exchange_id(),
            session_id,
            message,
            response,
            sender,
            timestamp: Utc::now(),
        }
    }

    /// Whether this exchange reports a backend failure.
    pub fn is_error(&self) -> bool {
        self.sender == Sender::System
    }
}

// ============================================================================
// Submit
// ============================================================================

/// Body of a Submit request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub message: String,
}

/// Acknowledgment of a Submit request.
///
/// `accepted` is false when the message was empty and nothing was dispatched.
/// The reply itself is delivered on the Push stream, never here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub session_id: SessionId,
    pub accepted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exchange_id: Option<String>,
}

// ============================================================================
// Push
// ============================================================================

/// Payload of the `ready` SSE event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadyEvent {
    pub session_id: SessionId,
}

// ============================================================================
// Tests
// ============================================================================
