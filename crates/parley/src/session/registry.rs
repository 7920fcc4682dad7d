//! In-memory registry of live subscribers, keyed by session.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use dashmap::DashMap;
use futures::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::protocol::{Exchange, SessionId};

/// Default number of exchanges buffered per subscriber.
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

// ============================================================================
// Types
// ============================================================================

/// Identifies one registration, returned by [`SubscriptionRegistry::register`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    session_id: SessionId,
    id: u64,
}

impl SubscriptionHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

/// Outcome of a single publish.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Subscribers the exchange was queued for.
    pub delivered: usize,
    /// Subscribers whose buffer was full; the exchange was dropped for them.
    pub dropped: usize,
    /// Subscribers found closed and removed.
    pub pruned: usize,
}

impl PublishReport {
    /// No live subscriber was registered for the session.
    pub fn is_unobserved(&self) -> bool {
        self.delivered == 0 && self.dropped == 0
    }
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Exchange>,
}

struct Inner {
    sessions: DashMap<SessionId, Vec<Subscriber>>,
    next_id: AtomicU64,
    buffer: usize,
    closed: AtomicBool,
}

// ============================================================================
// SubscriptionRegistry
// ============================================================================

/// Tracks, per session, the subscribers that should receive its exchanges.
///
/// Cheap to clone; clones share the same state. Publishing never blocks:
/// each subscriber has its own bounded channel, so a slow subscriber only
/// loses its own deliveries.
#[derive(Clone)]
pub struct SubscriptionRegistry {
    inner: Arc<Inner>,
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_BUFFER)
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry whose [`subscribe`](Self::subscribe) channels
    /// buffer up to `buffer` exchanges.
    #[must_use]
    pub fn new(buffer: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                sessions: DashMap::new(),
                next_id: AtomicU64::new(1),
                buffer: buffer.max(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Register a delivery channel for `session_id`.
    ///
    /// Subscribers of one session are kept in registration order. Once the
    /// registry is [closed](Self::close) the channel is dropped instead, so
    /// its receiver ends immediately.
    pub fn register(
        &self,
        session_id: SessionId,
        channel: mpsc::Sender<Exchange>,
    ) -> SubscriptionHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let accepted = {
            // Checked under the shard lock so a concurrent close() cannot miss it.
            let mut subscribers = self.inner.sessions.entry(session_id.clone()).or_default();
            let open = !self.inner.closed.load(Ordering::SeqCst);
            if open {
                subscribers.push(Subscriber { id, tx: channel });
            }
            open
        };

        if accepted {
            debug!(session_id = %session_id, subscriber = id, "Subscriber registered");
        } else {
            self.inner
                .sessions
                .remove_if(&session_id, |_, subs| subs.is_empty());
            debug!(session_id = %session_id, subscriber = id, "Registry closed, subscriber rejected");
        }
        SubscriptionHandle { session_id, id }
    }

    /// Stop accepting registrations and drop every delivery channel.
    ///
    /// Open subscriptions still yield the exchanges already queued for them,
    /// then end.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.sessions.clear();
        debug!("Subscription registry closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Create a bounded channel, register it, and return the receiving side.
    ///
    /// The registration lasts until the returned [`Subscription`] is dropped.
    pub fn subscribe(&self, session_id: SessionId) -> Subscription {
        let (tx, rx) = mpsc::channel(self.inner.buffer);
        let handle = self.register(session_id, tx);
        Subscription {
            handle,
            rx,
            registry: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a registration. Returns false if it was already gone.
    pub fn unregister(&self, handle: &SubscriptionHandle) -> bool {
        remove(&self.inner, handle)
    }

    /// Deliver `exchange` to every subscriber of `session_id`.
    ///
    /// With no subscribers the exchange is dropped.
    pub fn publish(&self, session_id: &SessionId, exchange: Exchange) -> PublishReport {
        let mut report = PublishReport::default();

        let now_empty = {
            let Some(mut subscribers) = self.inner.sessions.get_mut(session_id) else {
                return report;
            };

            subscribers.retain(|sub| match sub.tx.try_send(exchange.clone()) {
                Ok(()) => {
                    report.delivered += 1;
                    true
                }
                Err(TrySendError::Full(_)) => {
                    report.dropped += 1;
                    warn!(
                        session_id = %session_id,
                        subscriber = sub.id,
                        exchange_id = %exchange.id,
                        "Subscriber buffer full, dropping exchange"
                    );
                    true
                }
                Err(TrySendError::Closed(_)) => {
                    report.pruned += 1;
                    debug!(session_id = %session_id, subscriber = sub.id, "Pruned closed subscriber");
                    false
                }
            });

            subscribers.is_empty()
        };

        if now_empty {
            self.inner
                .sessions
                .remove_if(session_id, |_, subs| subs.is_empty());
        }

        report
    }

    /// Number of live registrations for `session_id`.
    pub fn subscriber_count(&self, session_id: &SessionId) -> usize {
        self.inner
            .sessions
            .get(session_id)
            .map_or(0, |subs| subs.len())
    }

    /// Number of sessions with at least one registration.
    pub fn session_count(&self) -> usize {
        self.inner.sessions.len()
    }

    pub fn total_subscribers(&self) -> usize {
        self.inner.sessions.iter().map(|entry| entry.len()).sum()
    }
}

fn remove(inner: &Inner, handle: &SubscriptionHandle) -> bool {
    let (removed, now_empty) = {
        let Some(mut subscribers) = inner.sessions.get_mut(&handle.session_id) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|sub| sub.id != handle.id);
        (subscribers.len() != before, subscribers.is_empty())
    };

    if now_empty {
        inner
            .sessions
            .remove_if(&handle.session_id, |_, subs| subs.is_empty());
    }
    if removed {
        debug!(session_id = %handle.session_id, subscriber = handle.id, "Subscriber unregistered");
    }
    removed
}

// ============================================================================
// Subscription
// ============================================================================

/// Receiving side of a registration created by [`SubscriptionRegistry::subscribe`].
///
/// Yields exchanges for one session. Dropping it unregisters.
pub struct Subscription {
    handle: SubscriptionHandle,
    rx: mpsc::Receiver<Exchange>,
    registry: Weak<Inner>,
}

impl Subscription {
    pub fn session_id(&self) -> &SessionId {
        &self.handle.session_id
    }

    pub fn handle(&self) -> &SubscriptionHandle {
        &self.handle
    }

    /// Wait for the next exchange. Returns `None` once unregistered and drained.
    pub async fn recv(&mut self) -> Option<Exchange> {
        self.rx.recv().await
    }

    /// Take an already-queued exchange without waiting.
    pub fn try_recv(&mut self) -> Option<Exchange> {
        self.rx.try_recv().ok()
    }
}

impl Stream for Subscription {
    type Item = Exchange;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Exchange>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.registry.upgrade() {
            remove(&inner, &self.handle);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    fn sid(raw: &str) -> SessionId {
        SessionId::parse(raw).unwrap()
    }

    fn exchange(session: &str, message: &str) -> Exchange {
        Exchange::reply(sid(session), message, format!("re: {message}"))
    }

    #[tokio::test]
    async fn publish_reaches_only_matching_session() {
        let registry = SubscriptionRegistry::default();
        let mut one = registry.subscribe(sid("session-1"));
        let mut two = registry.subscribe(sid("session-2"));

        let report = registry.publish(&sid("session-1"), exchange("session-1", "Hello"));
        assert_eq!(report.delivered, 1);

        assert_eq!(one.recv().await.unwrap().message, "Hello");
        assert!(two.try_recv().is_none());
    }

    #[tokio::test]
    async fn publish_fans_out_in_registration_order() {
        let registry = SubscriptionRegistry::default();
        let (tx_a, mut rx_a) = mpsc::channel(4);
        let (tx_b, mut rx_b) = mpsc::channel(4);
        registry.register(sid("s"), tx_a);
        registry.register(sid("s"), tx_b);

        let report = registry.publish(&sid("s"), exchange("s", "hi"));
        assert_eq!(report.delivered, 2);
        assert_eq!(rx_a.recv().await.unwrap().message, "hi");
        assert_eq!(rx_b.recv().await.unwrap().message, "hi");
    }

    #[test]
    fn publish_without_subscribers_is_silent() {
        let registry = SubscriptionRegistry::default();
        let report = registry.publish(&sid("nobody"), exchange("nobody", "x"));
        assert_eq!(report, PublishReport::default());
        assert!(report.is_unobserved());
    }

    #[tokio::test]
    async fn full_subscriber_does_not_block_others() {
        let registry = SubscriptionRegistry::default();
        let (slow_tx, mut slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        registry.register(sid("s"), slow_tx);
        registry.register(sid("s"), fast_tx);

        registry.publish(&sid("s"), exchange("s", "first"));
        let report = registry.publish(&sid("s"), exchange("s", "second"));

        assert_eq!(report.delivered, 1);
        assert_eq!(report.dropped, 1);
        assert_eq!(registry.subscriber_count(&sid("s")), 2);

        assert_eq!(slow_rx.recv().await.unwrap().message, "first");
        assert!(slow_rx.try_recv().is_err());
        assert_eq!(fast_rx.recv().await.unwrap().message, "first");
        assert_eq!(fast_rx.recv().await.unwrap().message, "second");
    }

    #[test]
    fn closed_subscriber_is_pruned_on_publish() {
        let registry = SubscriptionRegistry::default();
        let (tx, rx) = mpsc::channel(4);
        registry.register(sid("s"), tx);
        drop(rx);

        let report = registry.publish(&sid("s"), exchange("s", "x"));
        assert_eq!(report.pruned, 1);
        assert_eq!(registry.subscriber_count(&sid("s")), 0);
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = SubscriptionRegistry::default();
        let (tx, _rx) = mpsc::channel(4);
        let handle = registry.register(sid("s"), tx);

        assert!(registry.unregister(&handle));
        assert!(!registry.unregister(&handle));
        assert_eq!(registry.total_subscribers(), 0);
    }

    #[tokio::test]
    async fn publish_after_unregister_delivers_nothing() {
        let registry = SubscriptionRegistry::default();
        let (tx, mut rx) = mpsc::channel(4);
        let handle = registry.register(sid("s"), tx);
        registry.unregister(&handle);

        let report = registry.publish(&sid("s"), exchange("s", "late"));
        assert!(report.is_unobserved());
        // The registry held the only sender, so the channel is now closed.
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn dropping_subscription_unregisters() {
        let registry = SubscriptionRegistry::default();
        let sub = registry.subscribe(sid("s"));
        let _other = registry.subscribe(sid("t"));
        assert_eq!(registry.total_subscribers(), 2);
        assert_eq!(sub.session_id().as_str(), "s");

        drop(sub);
        assert_eq!(registry.subscriber_count(&sid("s")), 0);
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn subscription_outliving_registry_drops_cleanly() {
        let registry = SubscriptionRegistry::default();
        let sub = registry.subscribe(sid("s"));
        drop(registry);
        drop(sub);
    }

    #[tokio::test]
    async fn close_ends_subscriptions_after_queued_exchanges() {
        let registry = SubscriptionRegistry::new(8);
        let mut sub = registry.subscribe(sid("s"));
        registry.publish(&sid("s"), exchange("s", "queued"));

        registry.close();
        assert!(registry.is_closed());
        assert_eq!(registry.total_subscribers(), 0);

        assert_eq!(sub.recv().await.unwrap().message, "queued");
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn subscribe_after_close_ends_immediately() {
        let registry = SubscriptionRegistry::default();
        registry.close();

        let mut sub = registry.subscribe(sid("s"));
        assert!(sub.recv().await.is_none());
        assert_eq!(registry.session_count(), 0);

        let report = registry.publish(&sid("s"), exchange("s", "late"));
        assert!(report.is_unobserved());
    }

    #[tokio::test]
    async fn subscription_is_a_stream() {
        let registry = SubscriptionRegistry::new(8);
        let sub = registry.subscribe(sid("s"));
        registry.publish(&sid("s"), exchange("s", "a"));
        registry.publish(&sid("s"), exchange("s", "b"));

        let received: Vec<_> = sub.take(2).map(|e| e.message).collect().await;
        assert_eq!(received, vec!["a", "b"]);
    }
}
