//! # Events
//!
//! The value pair that flows through the kernel: an `IncomingEvent` built by
//! the adapter from a platform message and an `OutgoingEvent` produced by the
//! handler. Both wrap an immutable `Event { type, data, timestamp }`.
//!
//! `OutgoingResponse::prepare` is the one sanctioned late mutation point: it
//! runs after the handler and before the outgoing middleware.

use crate::data::get_path;
use crate::errors::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Immutable `{ type, data, timestamp }` tuple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    event_type: String,
    data: Value,
    timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    #[must_use]
    pub fn data(&self) -> &Value {
        &self.data
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Read a dotted path out of the payload, falling back when it is
    /// missing or does not deserialize into `T`.
    pub fn get<T: DeserializeOwned>(&self, path: &str, fallback: T) -> T {
        get_path(&self.data, path)
            .filter(|v| !v.is_null())
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or(fallback)
    }
}

/// Event built from a platform message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncomingEvent {
    #[serde(flatten)]
    event: Event,
}

impl IncomingEvent {
    /// Type name used when none is supplied.
    pub const INCOMING_EVENT: &'static str = "Stone@IncomingEvent";

    pub fn new(data: Value) -> Self {
        Self::with_type(Self::INCOMING_EVENT, data)
    }

    pub fn with_type(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event: Event::new(event_type, data),
        }
    }

    #[must_use]
    pub fn event(&self) -> &Event {
        &self.event
    }

    #[must_use]
    pub fn event_type(&self) -> &str {
        self.event.event_type()
    }

    #[must_use]
    pub fn data(&self) -> &Value {
        self.event.data()
    }

    pub fn get<T: DeserializeOwned>(&self, path: &str, fallback: T) -> T {
        self.event.get(path, fallback)
    }
}

/// Event produced by the handler and mapped to a platform response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingEvent {
    #[serde(flatten)]
    event: Event,
    body: Value,
    status_code: Option<u16>,
    status_message: Option<String>,
    prepared: bool,
}

impl OutgoingEvent {
    pub const OUTGOING_RESPONSE: &'static str = "Stone@OutgoingResponse";

    pub fn new(body: Value) -> Self {
        Self {
            event: Event::new(Self::OUTGOING_RESPONSE, Value::Null),
            body,
            status_code: None,
            status_message: None,
            prepared: false,
        }
    }

    #[must_use]
    pub fn with_status(mut self, code: u16, message: impl Into<String>) -> Self {
        self.status_code = Some(code);
        self.status_message = Some(message.into());
        self
    }

    #[must_use]
    pub fn body(&self) -> &Value {
        &self.body
    }

    pub fn set_body(&mut self, body: Value) {
        self.body = body;
    }

    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    #[must_use]
    pub fn status_message(&self) -> Option<&str> {
        self.status_message.as_deref()
    }

    #[must_use]
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    #[must_use]
    pub fn event(&self) -> &Event {
        &self.event
    }
}

/// Shape every outgoing value must have for the kernel to finish a request.
#[async_trait]
pub trait OutgoingResponse<I>: Send + Sync
where
    I: Send + Sync,
{
    /// Adjust adapter-visible state (body, status) before dispatch.
    async fn prepare(&mut self, incoming: &I) -> Result<()>;
}

#[async_trait]
impl OutgoingResponse<IncomingEvent> for OutgoingEvent {
    async fn prepare(&mut self, _incoming: &IncomingEvent) -> Result<()> {
        if self.status_code.is_none() {
            self.status_code = Some(200);
            self.status_message = Some("OK".to_string());
        }
        self.prepared = true;
        Ok(())
    }
}

/// Events emitted by the kernel around response preparation, in this order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    PreparingResponse,
    ResponsePrepared,
    EventHandled,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 3] = [
        LifecycleEvent::PreparingResponse,
        LifecycleEvent::ResponsePrepared,
        LifecycleEvent::EventHandled,
    ];

    /// Stable event name, usable as a `stone.kernel.listeners.<name>` key.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::PreparingResponse => "Stone@KernelPreparingResponse",
            LifecycleEvent::ResponsePrepared => "Stone@KernelResponsePrepared",
            LifecycleEvent::EventHandled => "Stone@KernelEventHandled",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
