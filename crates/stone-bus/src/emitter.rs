//! # Event Emitter
//!
//! Two delivery paths for the same emission:
//!
//! ```text
//!   emit(event)
//!       │
//!       ├─► named listeners  (awaited in registration order, errors propagate)
//!       │
//!       └─► broadcast channel (fire-and-forget to every live Subscription)
//! ```
//!
//! Listeners run to completion before `emit` returns, so lifecycle ordering
//! holds regardless of how many listeners are attached.

use crate::events::{BusEvent, EventFilter};
use crate::subscriber::Subscription;
use crate::DEFAULT_CHANNEL_CAPACITY;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use stone_types::Result;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// A listener attached to one event name.
#[async_trait]
pub trait EventListener<E: BusEvent>: Send + Sync {
    async fn handle(&self, event: &E) -> Result<()>;
}

/// Adapts a plain closure into an `EventListener`.
pub struct FnListener<F> {
    callback: F,
}

impl<F> FnListener<F> {
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

#[async_trait]
impl<E, F> EventListener<E> for FnListener<F>
where
    E: BusEvent,
    F: Fn(&E) -> Result<()> + Send + Sync,
{
    async fn handle(&self, event: &E) -> Result<()> {
        (self.callback)(event)
    }
}

type ListenerMap<E> = HashMap<String, Vec<Arc<dyn EventListener<E>>>>;

/// In-memory event emitter.
pub struct EventEmitter<E: BusEvent> {
    /// Broadcast sender for subscriptions.
    sender: broadcast::Sender<E>,

    /// Listeners by event name.
    listeners: RwLock<ListenerMap<E>>,

    /// Active subscription count by filter key.
    subscriptions: Arc<RwLock<HashMap<String, usize>>>,

    /// Total events emitted.
    events_emitted: AtomicU64,

    capacity: usize,
}

impl<E: BusEvent> EventEmitter<E> {
    /// Create an emitter with the default broadcast capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create an emitter with a specific broadcast capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            listeners: RwLock::new(HashMap::new()),
            subscriptions: Arc::new(RwLock::new(HashMap::new())),
            events_emitted: AtomicU64::new(0),
            capacity,
        }
    }

    /// Attach a listener to an event name.
    pub fn on(&self, name: impl Into<String>, listener: Arc<dyn EventListener<E>>) {
        let name = name.into();
        debug!(event = %name, "Listener attached");
        self.listeners.write().entry(name).or_default().push(listener);
    }

    /// Attach a closure to an event name.
    pub fn on_fn<F>(&self, name: impl Into<String>, callback: F)
    where
        F: Fn(&E) -> Result<()> + Send + Sync + 'static,
    {
        self.on(name, Arc::new(FnListener::new(callback)));
    }

    /// Remove every listener attached to an event name.
    pub fn off(&self, name: &str) -> usize {
        self.listeners.write().remove(name).map_or(0, |l| l.len())
    }

    /// Emit an event.
    ///
    /// Awaits every listener for the event's name in registration order, then
    /// broadcasts to subscriptions. Returns the number of subscriptions the
    /// broadcast reached. The first listener error aborts the emission.
    pub async fn emit(&self, event: &E) -> Result<usize> {
        self.events_emitted.fetch_add(1, Ordering::Relaxed);

        // Snapshot so no lock is held across listener awaits.
        let listeners = self
            .listeners
            .read()
            .get(event.name())
            .cloned()
            .unwrap_or_default();

        for listener in &listeners {
            listener.handle(event).await?;
        }

        let receivers = self.sender.send(event.clone()).unwrap_or(0);
        trace!(
            event = %event.name(),
            listeners = listeners.len(),
            receivers,
            "Event emitted"
        );
        Ok(receivers)
    }

    /// Subscribe to every future emission matching a filter.
    #[must_use]
    pub fn subscribe(&self, filter: EventFilter) -> Subscription<E> {
        let receiver = self.sender.subscribe();
        let key = format!("{:?}", filter.names);
        *self.subscriptions.write().entry(key.clone()).or_insert(0) += 1;

        debug!(names = ?filter.names, "New subscription created");
        Subscription::new(receiver, filter, self.subscriptions.clone(), key)
    }

    /// Number of listeners attached to an event name.
    #[must_use]
    pub fn listener_count(&self, name: &str) -> usize {
        self.listeners.read().get(name).map_or(0, Vec::len)
    }

    #[must_use]
    pub fn has_listeners(&self, name: &str) -> bool {
        self.listener_count(name) > 0
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    #[must_use]
    pub fn events_emitted(&self) -> u64 {
        self.events_emitted.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl<E: BusEvent> Default for EventEmitter<E> {
    fn default() -> Self {
        Self::new()
    }
}
