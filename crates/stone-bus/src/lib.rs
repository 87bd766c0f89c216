//! # Stone Bus - In-Process Event Emitter
//!
//! Carries kernel lifecycle events to listeners and subscribers.
//!
//! ## Delivery Model
//!
//! ```text
//! ┌──────────────┐    emit()     ┌──────────────┐    on(name)    ┌──────────────┐
//! │    Kernel    │ ────────────► │ EventEmitter │ ─────────────► │  Listeners   │
//! └──────────────┘               │              │                └──────────────┘
//!                                │              │   subscribe()  ┌──────────────┐
//!                                │              │ ─────────────► │ Subscriptions│
//!                                └──────────────┘                └──────────────┘
//! ```
//!
//! - **Listeners** are awaited in registration order; their errors
//!   propagate to the emitter's caller.
//! - **Subscriptions** receive a broadcast copy and never block emission.

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod emitter;
pub mod events;
pub mod subscriber;

pub use emitter::{EventEmitter, EventListener, FnListener};
pub use events::{BusEvent, EventFilter};
pub use subscriber::{EventStream, Subscription, SubscriptionError};

/// Maximum events to buffer per subscriber before lagging.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capacity() {
        assert_eq!(DEFAULT_CHANNEL_CAPACITY, 1000);
    }
}
