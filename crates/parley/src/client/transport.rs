use async_trait::async_trait;
use futures::stream::BoxStream;

use super::error::Result;
use crate::protocol::{Exchange, SessionId, SubmitResponse};

/// Exchanges delivered to one subscription. An `Err` item ends the stream.
pub type ExchangeStream = BoxStream<'static, Result<Exchange>>;

/// The two relay operations a client session needs.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Open the Push stream for `session_id`.
    ///
    /// Returns once the subscription is registered, so exchanges for
    /// messages submitted afterwards are not missed.
    async fn subscribe(&self, session_id: &SessionId) -> Result<ExchangeStream>;

    /// Submit a message. The reply arrives on the Push stream.
    async fn submit(&self, session_id: &SessionId, message: &str) -> Result<SubmitResponse>;
}
