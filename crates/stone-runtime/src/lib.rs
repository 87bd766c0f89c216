//! # Stone Runtime
//!
//! Turns registered modules into a running application.
//!
//! ## Flow
//!
//! ```text
//!   modules ──► BlueprintBuilder ──► Blueprint ──► StoneApplication
//!                  (setup pipeline)                     │
//!                                                       ▼
//!                                       Adapter::run (hooks, mapper)
//!                                                       │ handle(event)
//!                                                       ▼
//!   ┌──────────────────────────── Kernel ─────────────────────────────┐
//!   │ providers: before_handle → register (once) → boot (once)        │
//!   │ incoming middleware → router | handler                          │
//!   │ PreparingResponse → prepare → ResponsePrepared                   │
//!   │ outgoing middleware → EventHandled                               │
//!   │ on_terminate: provider hooks → terminate middleware              │
//!   └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Role |
//! |--------|------|
//! | `decorators` | Registration helpers that tag classes with metadata and blueprint fragments |
//! | `builder` | Blueprint assembly: layered merge plus the builtin setup middleware |
//! | `kernel` | Event lifecycle, provider hooks, middleware pipelines, lifecycle events |
//! | `adapter` | Platform boundary: hooks, event context, context mapper |
//! | `application` | Picks the adapter from the blueprint and runs it |

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod adapter;
pub mod application;
pub mod builder;
pub mod decorators;
pub mod kernel;

pub use adapter::{
    Adapter, AdapterHook, BaseAdapter, EventContext, EventContextMapper, HandlerFactory,
    HookListener, PlatformResponse, KERNEL_HANDLER_FACTORY,
};
pub use application::StoneApplication;
pub use builder::{BlueprintBuilder, BlueprintContext, ConfigurationSource};
pub use decorators::Decorate;
pub use kernel::{
    CoreServiceProvider, ErrorHandler, EventHandler, FnHandler, Handler, Kernel, KernelContext,
    KernelEvent, KernelState, Provider, Router, Subscriber,
};

/// Container keys bound by the kernel before any user code runs.
pub mod keys {
    /// Weak handle to the kernel's own container.
    pub const CONTAINER: &str = "container";
    /// The blueprint, also reachable as `blueprint` and `config`.
    pub const BLUEPRINT: &str = "stone.blueprint";
    pub const BLUEPRINT_ALIASES: [&str; 2] = ["blueprint", "config"];
    /// The lifecycle event emitter, also reachable as `events` and `eventEmitter`.
    pub const EMITTER: &str = "stone.emitter";
    pub const EMITTER_ALIASES: [&str; 2] = ["events", "eventEmitter"];
    /// A bound router takes precedence over the configured handler.
    pub const ROUTER: &str = "router";
    /// Alias always given to the configured logger.
    pub const LOGGER: &str = "logger";
}
