//! Server-Sent Events decoding for the Push stream client.
//!
//! Turns a byte stream into assembled events: `data:` lines are joined with
//! `\n` until a blank line, `event:` and `id:` set the event's name and id,
//! comment lines (keep-alives) are skipped.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::{Buf, Bytes, BytesMut};
use futures::Stream;

/// One assembled SSE event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: String,
}

#[derive(Default)]
struct PendingEvent {
    event: Option<String>,
    id: Option<String>,
    data: Vec<String>,
}

impl PendingEvent {
    /// Apply one line. Returns a finished event on a blank line.
    fn feed(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.finish();
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        match field {
            "data" => self.data.push(value.to_string()),
            "event" => self.event = Some(value.to_string()),
            "id" => self.id = Some(value.to_string()),
            // retry and unknown fields are irrelevant here
            _ => {}
        }
        None
    }

    fn finish(&mut self) -> Option<SseEvent> {
        let pending = std::mem::take(self);
        if pending.data.is_empty() && pending.event.is_none() && pending.id.is_none() {
            return None;
        }
        Some(SseEvent {
            event: pending.event,
            id: pending.id,
            data: pending.data.join("\n"),
        })
    }
}

/// Stream adapter yielding [`SseEvent`]s from a byte stream.
///
/// Lines may end in `\n` or `\r\n` and may be split across chunks, including
/// in the middle of a multi-byte character.
pub struct SseEventStream<S> {
    inner: S,
    buffer: BytesMut,
    pending: PendingEvent,
    done: bool,
}

impl<S> SseEventStream<S> {
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            buffer: BytesMut::new(),
            pending: PendingEvent::default(),
            done: false,
        }
    }

    fn next_buffered(&mut self) -> Option<SseEvent> {
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line = self.buffer.split_to(pos);
            self.buffer.advance(1);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.pending.feed(&line) {
                return Some(event);
            }
        }
        None
    }
}

impl<S, E> Stream for SseEventStream<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
{
    type Item = Result<SseEvent, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            if let Some(event) = self.next_buffered() {
                return Poll::Ready(Some(Ok(event)));
            }
            if self.done {
                return Poll::Ready(None);
            }

            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => self.buffer.extend_from_slice(&chunk),
                Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
                Poll::Ready(None) => {
                    self.done = true;
                    // Flush an unterminated final line and event
                    let rest = std::mem::take(&mut self.buffer);
                    let line = String::from_utf8_lossy(&rest).into_owned();
                    let this = &mut *self;
                    let event = match this.pending.feed(&line) {
                        Some(event) => Some(event),
                        None => this.pending.finish(),
                    };
                    return Poll::Ready(event.map(Ok));
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::{StreamExt, stream};
    use std::convert::Infallible;

    async fn collect(chunks: &[&'static [u8]]) -> Vec<SseEvent> {
        let input = stream::iter(
            chunks
                .iter()
                .map(|c| Ok::<_, Infallible>(Bytes::from_static(*c))),
        );
        SseEventStream::new(input)
            .map(|r| r.unwrap())
            .collect()
            .await
    }

    #[tokio::test]
    async fn parses_named_events() {
        let events = collect(&[
            b"event: ready\ndata: {\"session_id\":\"s\"}\n\n",
            b"event: exchange\nid: msg_1\ndata: {}\n\n",
        ])
        .await;

        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event.as_deref(), Some("ready"));
        assert_eq!(events[0].data, r#"{"session_id":"s"}"#);
        assert_eq!(events[1].event.as_deref(), Some("exchange"));
        assert_eq!(events[1].id.as_deref(), Some("msg_1"));
    }

    #[tokio::test]
    async fn skips_keep_alive_comments() {
        let events = collect(&[b": keep-alive\n\n", b"data: x\n\n", b":keep-alive\n\n"]).await;
        assert_eq!(
            events,
            vec![SseEvent {
                data: "x".into(),
                ..Default::default()
            }]
        );
    }

    #[tokio::test]
    async fn joins_multiline_data_and_handles_crlf() {
        let events = collect(&[b"data: one\r\ndata: two\r\n\r\n"]).await;
        assert_eq!(events[0].data, "one\ntwo");
    }

    #[tokio::test]
    async fn reassembles_lines_split_across_chunks() {
        // "é" is split between the two chunks
        let events = collect(&[b"event: exch", b"ange\ndata: caf\xc3", b"\xa9\n\n"]).await;
        assert_eq!(events[0].event.as_deref(), Some("exchange"));
        assert_eq!(events[0].data, "café");
    }

    #[tokio::test]
    async fn flushes_unterminated_event_at_end() {
        let events = collect(&[b"data: tail"]).await;
        assert_eq!(events[0].data, "tail");
    }
}
