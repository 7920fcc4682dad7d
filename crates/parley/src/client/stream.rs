//! Push stream consumer.
//!
//! Reads the `ready` event synchronously so the caller knows the subscription
//! is registered, then forwards `exchange` events through a channel.

use futures::StreamExt;
use reqwest::Response;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use super::error::{ClientError, Result};
use super::transport::ExchangeStream;
use crate::protocol::{Exchange, ReadyEvent, SessionId, sse};
use crate::sse_parser::{SseEvent, SseEventStream};

/// Channel buffer size between the reader task and the consumer.
const EXCHANGE_CHANNEL_BUFFER: usize = 32;

/// Wait for `ready`, then return the remaining exchanges as a stream.
///
/// The stream yields [`ClientError::SseStreamEnded`] if the server closes the
/// connection, since a Push stream never ends on its own.
pub(super) async fn open_exchange_stream(
    response: Response,
    session_id: &SessionId,
) -> Result<ExchangeStream> {
    let mut events = SseEventStream::new(response.bytes_stream());

    let first = events
        .next()
        .await
        .ok_or(ClientError::SseStreamEnded)?
        .map_err(ClientError::Http)?;
    let ready = parse_ready(&first)?;
    if &ready.session_id != session_id {
        return Err(ClientError::SseParseError(format!(
            "ready event for session '{}', expected '{}'",
            ready.session_id, session_id
        )));
    }
    debug!(session_id = %session_id, "Push stream ready");

    let (tx, rx) = mpsc::channel(EXCHANGE_CHANNEL_BUFFER);
    tokio::spawn(async move {
        loop {
            // Stop reading, and release the connection, once the consumer is gone
            let result = tokio::select! {
                _ = tx.closed() => return,
                next = events.next() => match next {
                    Some(result) => result,
                    None => break,
                },
            };
            let item = match result {
                Ok(event) => match parse_exchange(&event) {
                    Ok(Some(exchange)) => Ok(exchange),
                    Ok(None) => continue,
                    Err(e) => Err(e),
                },
                Err(e) => Err(ClientError::Http(e)),
            };
            let failed = item.is_err();
            if tx.send(item).await.is_err() || failed {
                // Receiver dropped, or the error already ended the stream
                return;
            }
        }
        let _ = tx.send(Err(ClientError::SseStreamEnded)).await;
    });

    Ok(ReceiverStream::new(rx).boxed())
}

fn parse_ready(event: &SseEvent) -> Result<ReadyEvent> {
    match event.event.as_deref() {
        Some(sse::READY) => serde_json::from_str(&event.data)
            .map_err(|e| ClientError::SseParseError(e.to_string())),
        other => Err(ClientError::SseParseError(format!(
            "expected '{}' event, got {:?}",
            sse::READY,
            other
        ))),
    }
}

/// Parse an `exchange` event. Events with other names are skipped.
fn parse_exchange(event: &SseEvent) -> Result<Option<Exchange>> {
    if event.event.as_deref() != Some(sse::EXCHANGE) {
        return Ok(None);
    }
    serde_json::from_str(&event.data)
        .map(Some)
        .map_err(|e| ClientError::SseParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str, data: &str) -> SseEvent {
        SseEvent {
            event: Some(name.to_string()),
            id: None,
            data: data.to_string(),
        }
    }

    #[test]
    fn parse_ready_accepts_ready_event() {
        let ready = parse_ready(&event("ready", r#"{"session_id":"session-1"}"#)).unwrap();
        assert_eq!(ready.session_id.as_str(), "session-1");
    }

    #[test]
    fn parse_ready_rejects_other_events() {
        let err = parse_ready(&event("exchange", "{}")).unwrap_err();
        assert!(matches!(err, ClientError::SseParseError(_)));
    }

    #[test]
    fn parse_exchange_decodes_record() {
        let exchange = Exchange::reply(SessionId::parse("s").unwrap(), "Hello", "Hi there");
        let data = serde_json::to_string(&exchange).unwrap();

        let parsed = parse_exchange(&event("exchange", &data)).unwrap();
        assert_eq!(parsed, Some(exchange));
    }

    #[test]
    fn parse_exchange_skips_unknown_events() {
        assert_eq!(parse_exchange(&event("something-else", "{}")).unwrap(), None);
    }

    #[test]
    fn parse_exchange_rejects_bad_json() {
        let err = parse_exchange(&event("exchange", "{not json")).unwrap_err();
        assert!(matches!(err, ClientError::SseParseError(_)));
    }
}
