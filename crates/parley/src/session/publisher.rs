use tracing::debug;

use super::registry::{PublishReport, SubscriptionRegistry};
use crate::protocol::Exchange;

/// Hands completed exchanges to the subscribers of their session.
#[derive(Clone)]
pub struct ResponsePublisher {
    registry: SubscriptionRegistry,
}

impl ResponsePublisher {
    #[must_use]
    pub fn new(registry: SubscriptionRegistry) -> Self {
        Self { registry }
    }

    pub fn deliver(&self, exchange: Exchange) -> PublishReport {
        let session_id = exchange.session_id.clone();
        let exchange_id = exchange.id.clone();
        let report = self.registry.publish(&session_id, exchange);

        if report.is_unobserved() {
            debug!(session_id = %session_id, exchange_id = %exchange_id, "No subscribers, exchange dropped");
        } else {
            debug!(
                session_id = %session_id,
                exchange_id = %exchange_id,
                delivered = report.delivered,
                dropped = report.dropped,
                "Exchange published"
            );
        }
        report
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }
}
