//! # Bus Events
//!
//! Anything carried by the emitter must be cheap to clone and expose a
//! stable name. Listeners are keyed by that name; subscriptions filter on it.

/// An event that can travel through an `EventEmitter`.
pub trait BusEvent: Clone + Send + Sync + 'static {
    /// Stable name used for listener lookup and filtering.
    fn name(&self) -> &str;
}

/// Filter for broadcast subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Event names to include. Empty means all events.
    pub names: Vec<String>,
}

impl EventFilter {
    /// Create a filter that accepts all events.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a filter for specific event names.
    #[must_use]
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// Check if an event matches this filter.
    #[must_use]
    pub fn matches<E: BusEvent>(&self, event: &E) -> bool {
        self.names.is_empty() || self.names.iter().any(|n| n == event.name())
    }
}
