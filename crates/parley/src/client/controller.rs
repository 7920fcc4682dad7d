//! Client-side owner of one session.

use std::fmt;

use futures::StreamExt;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::error::ClientError;
use super::transport::{ExchangeStream, RelayTransport};
use crate::protocol::{Exchange, SessionId};
use crate::session::SubmitOutcome;

/// Lifecycle of a [`ClientSessionController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Created, no subscription opened yet.
    Uninitialized,
    /// Waiting for the transport to register the subscription.
    Subscribing,
    /// Subscription live; submits allowed.
    Active,
    /// Subscription failed or was lost. Call `resubscribe()` to recover.
    Degraded,
    /// Terminal.
    Closed,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControllerState::Uninitialized => "uninitialized",
            ControllerState::Subscribing => "subscribing",
            ControllerState::Active => "active",
            ControllerState::Degraded => "degraded",
            ControllerState::Closed => "closed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("session is {0}, not active")]
    NotActive(ControllerState),

    #[error("session is closed")]
    Closed,

    #[error(transparent)]
    Transport(#[from] ClientError),
}

/// Owns one session identifier, its single subscription, and the exchanges
/// received on it.
///
/// The identifier is fixed at construction. Received exchanges are appended
/// to [`history`](Self::history) in arrival order.
pub struct ClientSessionController<T> {
    transport: T,
    session_id: SessionId,
    state: ControllerState,
    stream: Option<ExchangeStream>,
    history: Vec<Exchange>,
}

impl<T: RelayTransport> ClientSessionController<T> {
    /// Create a controller with a freshly generated session identifier.
    pub fn new(transport: T) -> Self {
        Self::with_session_id(transport, SessionId::generate())
    }

    pub fn with_session_id(transport: T, session_id: SessionId) -> Self {
        Self {
            transport,
            session_id,
            state: ControllerState::Uninitialized,
            stream: None,
            history: Vec::new(),
        }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn history(&self) -> &[Exchange] {
        &self.history
    }

    /// Open the session's subscription. A no-op when already active.
    ///
    /// On transport failure the controller becomes [`ControllerState::Degraded`]
    /// and the error is returned.
    pub async fn connect(&mut self) -> Result<(), ControllerError> {
        match self.state {
            ControllerState::Closed => return Err(ControllerError::Closed),
            ControllerState::Active => return Ok(()),
            _ => {}
        }

        self.state = ControllerState::Subscribing;
        match self.transport.subscribe(&self.session_id).await {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state = ControllerState::Active;
                info!(session_id = %self.session_id, "Subscription active");
                Ok(())
            }
            Err(e) => {
                self.degrade(&e);
                Err(e.into())
            }
        }
    }

    /// Re-open the subscription after it was lost.
    pub async fn resubscribe(&mut self) -> Result<(), ControllerError> {
        self.connect().await
    }

    /// Submit a message for this session.
    ///
    /// Empty and whitespace-only messages return [`SubmitOutcome::Skipped`]
    /// without contacting the transport.
    pub async fn submit(&self, message: &str) -> Result<SubmitOutcome, ControllerError> {
        if message.trim().is_empty() {
            return Ok(SubmitOutcome::Skipped);
        }
        self.ensure_active()?;

        let response = self.transport.submit(&self.session_id, message).await?;
        debug!(session_id = %self.session_id, accepted = response.accepted, "Message submitted");

        Ok(match response.exchange_id {
            Some(exchange_id) if response.accepted => SubmitOutcome::Dispatched { exchange_id },
            _ => SubmitOutcome::Skipped,
        })
    }

    /// Wait for the next exchange and append it to the history.
    ///
    /// A stream error or end moves the controller to
    /// [`ControllerState::Degraded`].
    pub async fn next_exchange(&mut self) -> Result<Exchange, ControllerError> {
        self.ensure_active()?;

        loop {
            let next = match self.stream.as_mut() {
                Some(stream) => stream.next().await,
                None => None,
            };

            match next {
                Some(Ok(exchange)) if exchange.session_id != self.session_id => {
                    warn!(
                        session_id = %self.session_id,
                        foreign = %exchange.session_id,
                        "Ignoring exchange for another session"
                    );
                }
                Some(Ok(exchange)) => {
                    self.history.push(exchange.clone());
                    return Ok(exchange);
                }
                Some(Err(e)) => {
                    self.degrade(&e);
                    return Err(e.into());
                }
                None => {
                    let e = ClientError::SseStreamEnded;
                    self.degrade(&e);
                    return Err(e.into());
                }
            }
        }
    }

    /// Release the subscription. Idempotent; the controller cannot be reused.
    pub fn close(&mut self) {
        if self.state != ControllerState::Closed {
            self.stream = None;
            self.state = ControllerState::Closed;
            debug!(session_id = %self.session_id, "Session closed");
        }
    }

    fn ensure_active(&self) -> Result<(), ControllerError> {
        match self.state {
            ControllerState::Active => Ok(()),
            ControllerState::Closed => Err(ControllerError::Closed),
            other => Err(ControllerError::NotActive(other)),
        }
    }

    fn degrade(&mut self, error: &ClientError) {
        self.stream = None;
        self.state = ControllerState::Degraded;
        warn!(session_id = %self.session_id, error = %error, "Subscription degraded");
    }
}
