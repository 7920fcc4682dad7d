use async_trait::async_trait;
use futures::StreamExt;

use super::error::Result;
use super::transport::{ExchangeStream, RelayTransport};
use crate::protocol::{SessionId, SubmitResponse};
use crate::session::{ExchangeDispatcher, SubmitOutcome, SubscriptionRegistry};

/// In-process transport talking to a registry and dispatcher directly.
#[derive(Clone)]
pub struct LocalRelay {
    registry: SubscriptionRegistry,
    dispatcher: ExchangeDispatcher,
}

impl LocalRelay {
    #[must_use]
    pub fn new(registry: SubscriptionRegistry, dispatcher: ExchangeDispatcher) -> Self {
        Self {
            registry,
            dispatcher,
        }
    }
}

#[async_trait]
impl RelayTransport for LocalRelay {
    async fn subscribe(&self, session_id: &SessionId) -> Result<ExchangeStream> {
        Ok(self.registry.subscribe(session_id.clone()).map(Ok).boxed())
    }

    async fn submit(&self, session_id: &SessionId, message: &str) -> Result<SubmitResponse> {
        let outcome = self.dispatcher.submit(message, session_id.clone());
        Ok(SubmitResponse {
            session_id: session_id.clone(),
            accepted: matches!(outcome, SubmitOutcome::Dispatched { .. }),
            exchange_id: outcome.exchange_id().map(str::to_string),
        })
    }
}
