//! # Stone Types Crate
//!
//! The vocabulary shared by every Stone runtime crate: the error taxonomy,
//! dotted-path helpers over JSON trees, and the event types that flow
//! through the kernel.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: cross-crate types are defined here.
//! - **Fail Fast**: only `StoneError::Handling` is ever recovered; every
//!   other variant is a programmer error surfaced to the caller.
//! - **Plain Data**: configuration is a `serde_json::Value` tree; classes
//!   are referenced inside it by name.

pub mod data;
pub mod errors;
pub mod events;

pub use data::{deep_merge, get_path, has_path, merge_all, set_path, MergeStrategy};
pub use errors::*;
pub use events::{Event, IncomingEvent, LifecycleEvent, OutgoingEvent, OutgoingResponse};
