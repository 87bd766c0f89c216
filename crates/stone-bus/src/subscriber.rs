//! # Subscriptions
//!
//! Broadcast side of the emitter. A subscription sees every emission made
//! after it was created that matches its filter.

use crate::events::{BusEvent, EventFilter};
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::debug;

/// Errors from subscription operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    /// The emitter was dropped.
    #[error("Event emitter closed")]
    Closed,
}

/// Stream of matching events.
pub type EventStream<E> = BoxStream<'static, E>;

/// A subscription handle for receiving events.
///
/// When dropped, the subscription is automatically cleaned up.
pub struct Subscription<E: BusEvent> {
    receiver: broadcast::Receiver<E>,
    filter: EventFilter,
    subscriptions: Arc<RwLock<HashMap<String, usize>>>,
    key: String,
}

impl<E: BusEvent> Subscription<E> {
    pub(crate) fn new(
        receiver: broadcast::Receiver<E>,
        filter: EventFilter,
        subscriptions: Arc<RwLock<HashMap<String, usize>>>,
        key: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            subscriptions,
            key,
        }
    }

    /// Receive the next matching event, or `None` once the emitter is gone.
    pub async fn recv(&mut self) -> Option<E> {
        loop {
            let event = match self.receiver.recv().await {
                Ok(e) => e,
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(count)) => {
                    debug!(lagged = count, "Subscriber lagged, some events dropped");
                    continue;
                }
            };

            if self.filter.matches(&event) {
                return Some(event);
            }
        }
    }

    /// Receive the next matching event without waiting.
    pub fn try_recv(&mut self) -> Result<Option<E>, SubscriptionError> {
        loop {
            let event = match self.receiver.try_recv() {
                Ok(e) => e,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(SubscriptionError::Closed)
                }
                Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            };

            if self.filter.matches(&event) {
                return Ok(Some(event));
            }
        }
    }

    #[must_use]
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }

    /// Turn the subscription into a stream of matching events.
    #[must_use]
    pub fn into_stream(self) -> EventStream<E> {
        stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|event| (event, sub))
        })
        .boxed()
    }
}

impl<E: BusEvent> Drop for Subscription<E> {
    fn drop(&mut self) {
        let mut subs = self.subscriptions.write();
        if let Some(count) = subs.get_mut(&self.key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                subs.remove(&self.key);
            }
        }
        debug!(names = %self.key, "Subscription dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::EventEmitter;
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Debug, Clone, PartialEq)]
    struct TestEvent(&'static str);

    impl BusEvent for TestEvent {
        fn name(&self) -> &str {
            self.0
        }
    }

    #[tokio::test]
    async fn test_subscription_recv() {
        let emitter = EventEmitter::new();
        let mut sub = emitter.subscribe(EventFilter::all());

        emitter.emit(&TestEvent("ping")).await.unwrap();

        let received = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timeout")
            .expect("event");
        assert_eq!(received, TestEvent("ping"));
    }

    #[tokio::test]
    async fn test_subscription_filter() {
        let emitter = EventEmitter::new();
        let mut sub = emitter.subscribe(EventFilter::names(["wanted"]));

        emitter.emit(&TestEvent("ignored")).await.unwrap();
        emitter.emit(&TestEvent("wanted")).await.unwrap();

        let received = timeout(Duration::from_millis(100), sub.recv())
            .await
            .expect("timeout")
            .expect("event");
        assert_eq!(received, TestEvent("wanted"));
    }

    #[tokio::test]
    async fn test_subscription_drop_cleanup() {
        let emitter = EventEmitter::<TestEvent>::new();
        {
            let _sub1 = emitter.subscribe(EventFilter::all());
            let _sub2 = emitter.subscribe(EventFilter::all());
            assert_eq!(emitter.subscriber_count(), 2);
        }
        assert_eq!(emitter.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_try_recv_empty() {
        let emitter = EventEmitter::<TestEvent>::new();
        let mut sub = emitter.subscribe(EventFilter::all());
        assert!(matches!(sub.try_recv(), Ok(None)));
    }

    #[tokio::test]
    async fn test_stream_yields_matching_events() {
        let emitter = EventEmitter::new();
        let mut stream = emitter.subscribe(EventFilter::names(["b"])).into_stream();

        emitter.emit(&TestEvent("a")).await.unwrap();
        emitter.emit(&TestEvent("b")).await.unwrap();

        let next = timeout(Duration::from_millis(100), stream.next())
            .await
            .expect("timeout");
        assert_eq!(next, Some(TestEvent("b")));
    }
}
