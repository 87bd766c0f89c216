//! # Registration Helpers
//!
//! Tag a class while it is being described, the way annotations would:
//!
//! ```rust,ignore
//! let app = ClassRef::builder("Application", |_| Ok(Application))
//!     .implements::<dyn Handler<IncomingEvent, OutgoingEvent>>(|c| c)
//!     .stone_app(AppOptions { name: Some("orders".into()), ..Default::default() })
//!     .build();
//! ```
//!
//! Each helper records a metadata entry under one of the keys below and, for
//! the composing helpers, a blueprint fragment. Helpers whose capability is
//! not generic (`provider`, `logger`, `configuration`, `config_middleware`)
//! also declare the matching cast. Kernel and adapter capabilities depend on
//! the event types, so those casts are declared with `implements`.

use crate::builder::blueprints::{initialization_blueprint, integration_blueprint};
use crate::builder::{BlueprintContext, ConfigurationSource};
use crate::kernel::Provider;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use stone_core::{ClassBuilder, Middleware};
use stone_telemetry::Logger;
use stone_types::{deep_merge, MergeStrategy};

// =============================================================================
// Metadata keys
// =============================================================================

pub const STONE_APP: &str = "stone.meta.app";
pub const CONFIGURATION: &str = "stone.meta.configuration";
pub const CONFIG_MIDDLEWARE: &str = "stone.meta.configMiddleware";
pub const SERVICE: &str = "stone.meta.service";
pub const PROVIDER: &str = "stone.meta.provider";
pub const LISTENER: &str = "stone.meta.listener";
pub const SUBSCRIBER: &str = "stone.meta.subscriber";
pub const KERNEL_MIDDLEWARE: &str = "stone.meta.kernelMiddleware";
pub const KERNEL_ERROR_HANDLER: &str = "stone.meta.kernelErrorHandler";
pub const LOGGER: &str = "stone.meta.logger";
pub const ADAPTER: &str = "stone.meta.adapter";
pub const ADAPTER_MIDDLEWARE: &str = "stone.meta.adapterMiddleware";
pub const ADAPTER_ERROR_HANDLER: &str = "stone.meta.adapterErrorHandler";

// =============================================================================
// Options
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppOptions {
    pub env: Option<String>,
    pub name: Option<String>,
    pub debug: Option<bool>,
    /// Extra fragments merged into the blueprint alongside this app.
    #[serde(skip)]
    pub imports: Vec<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ServiceOptions {
    pub singleton: bool,
    pub alias: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ListenerOptions {
    pub event: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct KernelMiddlewareOptions {
    pub priority: Option<f64>,
    pub outgoing: bool,
    pub terminate: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggerOptions {
    pub alias: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AdapterOptions {
    /// Key under `stone.adapter`.
    pub name: String,
    pub alias: Option<String>,
    pub current: bool,
    pub preferred: bool,
}

impl Default for AdapterOptions {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            alias: None,
            current: false,
            preferred: false,
        }
    }
}

/// `adapter` unset means every adapter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AdapterMiddlewareOptions {
    pub adapter: Option<String>,
    pub outgoing: bool,
    pub priority: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AdapterErrorHandlerOptions {
    pub adapter: Option<String>,
}

fn options_value<T: Serialize>(options: &T) -> Value {
    serde_json::to_value(options).unwrap_or(Value::Bool(true))
}

// =============================================================================
// Helpers
// =============================================================================

/// Registration helpers available on every `ClassBuilder`.
pub trait Decorate<C>: Sized {
    /// Mark the main application class and contribute the kernel defaults.
    fn stone_app(self, options: AppOptions) -> Self;

    /// Instances serialize into a configuration layer.
    fn configuration(self) -> Self
    where
        C: Serialize;

    /// Run as a builder stage with the default priority.
    fn config_middleware(self) -> Self
    where
        C: Middleware<BlueprintContext>;

    fn service(self, options: ServiceOptions) -> Self;

    fn provider(self) -> Self
    where
        C: Provider;

    fn listener(self, options: ListenerOptions) -> Self;

    fn subscriber(self) -> Self;

    fn kernel_middleware(self, options: KernelMiddlewareOptions) -> Self;

    fn kernel_error_handler(self) -> Self;

    fn logger(self, options: LoggerOptions) -> Self
    where
        C: Logger;

    /// Declare this class as an adapter under `stone.adapter.<name>`.
    fn adapter(self, options: AdapterOptions) -> Self;

    fn adapter_middleware(self, options: AdapterMiddlewareOptions) -> Self;

    fn adapter_error_handler(self, options: AdapterErrorHandlerOptions) -> Self;

    /// Contribute `fragment` with `overrides` merged over it.
    fn compose(self, fragment: Value, overrides: Value) -> Self;
}

impl<C: Send + Sync + 'static> Decorate<C> for ClassBuilder<C> {
    fn stone_app(self, options: AppOptions) -> Self {
        let mut stone = Map::new();
        if let Some(env) = &options.env {
            stone.insert("env".to_string(), json!(env));
        }
        if let Some(name) = &options.name {
            stone.insert("name".to_string(), json!(name));
        }
        if let Some(debug) = options.debug {
            stone.insert("debug".to_string(), json!(debug));
        }

        let meta = options_value(&options);
        let imports = options.imports;
        let builder = self
            .meta(STONE_APP, meta)
            .compose(initialization_blueprint(), json!({ "stone": stone }));
        imports
            .into_iter()
            .fold(builder, |builder, fragment| builder.blueprint(fragment))
    }

    fn configuration(self) -> Self
    where
        C: Serialize,
    {
        self.implements::<dyn ConfigurationSource>(|c| c)
            .meta(CONFIGURATION, Value::Bool(true))
    }

    fn config_middleware(self) -> Self
    where
        C: Middleware<BlueprintContext>,
    {
        self.implements::<dyn Middleware<BlueprintContext>>(|c| c)
            .meta(CONFIG_MIDDLEWARE, Value::Bool(true))
    }

    fn service(self, options: ServiceOptions) -> Self {
        self.meta(SERVICE, options_value(&options))
    }

    fn provider(self) -> Self
    where
        C: Provider,
    {
        self.implements::<dyn Provider>(|c| c)
            .meta(PROVIDER, Value::Bool(true))
    }

    fn listener(self, options: ListenerOptions) -> Self {
        self.meta(LISTENER, options_value(&options))
    }

    fn subscriber(self) -> Self {
        self.meta(SUBSCRIBER, Value::Bool(true))
    }

    fn kernel_middleware(self, options: KernelMiddlewareOptions) -> Self {
        self.meta(KERNEL_MIDDLEWARE, options_value(&options))
    }

    fn kernel_error_handler(self) -> Self {
        self.meta(KERNEL_ERROR_HANDLER, Value::Bool(true))
    }

    fn logger(self, options: LoggerOptions) -> Self
    where
        C: Logger,
    {
        self.implements::<dyn Logger>(|c| c)
            .meta(LOGGER, options_value(&options))
    }

    fn adapter(self, options: AdapterOptions) -> Self {
        let mut entry = Map::new();
        entry.insert("type".to_string(), json!(self.name()));
        entry.insert("alias".to_string(), json!(options.alias));
        entry.insert("current".to_string(), json!(options.current));
        entry.insert("preferred".to_string(), json!(options.preferred));
        let mut adapters = Map::new();
        adapters.insert(options.name.clone(), Value::Object(entry));

        let meta = options_value(&options);
        self.meta(ADAPTER, meta).compose(
            integration_blueprint(&options.name),
            json!({ "stone": { "adapter": adapters } }),
        )
    }

    fn adapter_middleware(self, options: AdapterMiddlewareOptions) -> Self {
        self.meta(ADAPTER_MIDDLEWARE, options_value(&options))
    }

    fn adapter_error_handler(self, options: AdapterErrorHandlerOptions) -> Self {
        self.meta(ADAPTER_ERROR_HANDLER, options_value(&options))
    }

    fn compose(self, mut fragment: Value, overrides: Value) -> Self {
        deep_merge(&mut fragment, overrides, MergeStrategy::SourceWins);
        self.blueprint(fragment)
    }
}
