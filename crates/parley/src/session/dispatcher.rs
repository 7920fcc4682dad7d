//! Fire-and-forget dispatch of submitted messages to the backend.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::history::ConversationHistory;
use super::publisher::ResponsePublisher;
use crate::background::BackgroundTasks;
use crate::llm::{InferenceBackend, LLMError, Turn};
use crate::protocol::{Exchange, SessionId, new_exchange_id};

/// Result of [`ExchangeDispatcher::submit`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The backend call was started. Its exchange will carry `exchange_id`.
    Dispatched { exchange_id: String },
    /// The message was empty; nothing was started.
    Skipped,
}

impl SubmitOutcome {
    pub fn exchange_id(&self) -> Option<&str> {
        match self {
            SubmitOutcome::Dispatched { exchange_id } => Some(exchange_id),
            SubmitOutcome::Skipped => None,
        }
    }
}

/// Turns submitted messages into published exchanges.
///
/// Each accepted message gets its own task: wait for a concurrency permit,
/// call the backend under a timeout with the session's recent turns, build
/// the exchange, publish it. Backend failures and timeouts become `system`
/// exchanges and never reach the submitter or the history. Replies within a
/// session are published in completion order.
#[derive(Clone)]
pub struct ExchangeDispatcher {
    backend: Arc<dyn InferenceBackend>,
    publisher: ResponsePublisher,
    history: ConversationHistory,
    limiter: Arc<Semaphore>,
    timeout: Duration,
    tasks: BackgroundTasks,
}

impl ExchangeDispatcher {
    #[must_use]
    pub fn new(
        backend: Arc<dyn InferenceBackend>,
        publisher: ResponsePublisher,
        max_concurrent: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            backend,
            publisher,
            history: ConversationHistory::default(),
            limiter: Arc::new(Semaphore::new(max_concurrent.max(1))),
            timeout,
            tasks: BackgroundTasks::new(),
        }
    }

    /// Replace the default conversation store.
    #[must_use]
    pub fn with_history(mut self, history: ConversationHistory) -> Self {
        self.history = history;
        self
    }

    pub fn history(&self) -> &ConversationHistory {
        &self.history
    }

    /// Accept a message for `session_id` and return without waiting for the backend.
    ///
    /// Empty and whitespace-only messages are skipped.
    pub fn submit(&self, message: impl Into<String>, session_id: SessionId) -> SubmitOutcome {
        let message = message.into();
        if message.trim().is_empty() {
            debug!(session_id = %session_id, "Empty message skipped");
            return SubmitOutcome::Skipped;
        }

        let exchange_id = new_exchange_id();
        info!(session_id = %session_id, exchange_id = %exchange_id, "Message accepted");

        let this = self.clone();
        let id = exchange_id.clone();
        self.tasks.spawn(async move {
            let exchange = this.run(message, session_id).await.with_id(id);
            this.publisher.deliver(exchange);
        });

        SubmitOutcome::Dispatched { exchange_id }
    }

    async fn run(&self, message: String, session_id: SessionId) -> Exchange {
        // The semaphore is never closed.
        let _permit = self.limiter.acquire().await.ok();

        let turns = self.history.turns(&session_id);
        let call = self.backend.generate_with_history(&turns, &message);
        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(LLMError::Timeout(self.timeout)),
        };

        match result {
            Ok(reply) => {
                self.history
                    .record(&session_id, Turn::new(message.as_str(), reply.as_str()));
                Exchange::reply(session_id, message, reply)
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Backend call failed");
                Exchange::failure(session_id, message, e)
            }
        }
    }

    /// Number of dispatched messages whose exchange has not been published yet.
    pub fn in_flight(&self) -> usize {
        self.tasks.pending_count()
    }

    /// Wait for every in-flight dispatch to publish its exchange.
    pub async fn shutdown(&self) {
        self.tasks.shutdown().await;
    }
}

// ============================================================================
// Tests
// ============================================================================
