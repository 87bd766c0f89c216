//! # Stone Core
//!
//! The leaf components every higher layer builds on.
//!
//! ## Components
//!
//! | Module | Role |
//! |--------|------|
//! | `metadata` | Class references, capability casts, metadata side-table, module registry |
//! | `config` | Dotted-path `ConfigStore` and the shared `Blueprint` handle |
//! | `container` | Dependency container: instance / factory / singleton bindings, aliases |
//! | `pipeline` | Priority-ordered stage executor, synchronous and suspending |
//!
//! ## Data Flow
//!
//! ```text
//! ClassRef ──► ModuleRegistry ──► Container::resolve ──► Pipeline stages
//!                    │
//!                    └──► Blueprint (class names inside the config tree)
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod config;
pub mod container;
pub mod metadata;
pub mod pipeline;

pub use config::{Blueprint, ConfigStore};
pub use container::{Container, ContainerRef, Lifetime};
pub use metadata::{
    add_blueprint_contribution, downcast_arc, erase_arc, get_blueprint_contributions, get_meta,
    has_meta, set_meta, ClassBuilder, ClassRef, Factory, Module, ModuleRegistry, Resolved,
};
pub use pipeline::{
    AsyncMiddleware, AsyncNext, Middleware, Next, PipeDefinition, Pipeline, Stage,
    DEFAULT_METHOD, DEFAULT_PRIORITY,
};
