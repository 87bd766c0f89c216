//! # Adapter Boundary
//!
//! An adapter turns platform messages into kernel events and kernel
//! responses back into platform responses. Concrete platforms wrap a
//! `BaseAdapter` and implement `Adapter`.
//!
//! ## `run_with(message)`
//!
//! ```text
//!   onInit hooks                               ┐
//!   handler = handlerFactory(blueprint)        │ errors reach the caller
//!   beforeHandle hooks, handler.before_handle  ┘
//!   ┌─ map_incoming ──► handler.handle ──► map_outgoing ──► response.send
//!   └─ any error: error handler, else logger, else tracing
//!   onTerminate hooks, handler.on_terminate   (always, errors reported)
//! ```
//!
//! ## Blueprint paths read
//!
//! | Path | Use |
//! |------|-----|
//! | `stone.adapter.<name>.hooks.{onInit,beforeHandle,onTerminate}` | provider names whose matching hook runs |
//! | `stone.adapter.<name>.handlerFactory` | `stone.kernel` or an event-handler class |
//! | `stone.adapter.<name>.middleware.{incoming,outgoing}` | mapper stages |
//! | `stone.adapter.<name>.errorHandler` | error handler class |
//! | `stone.logger` | logger class used when no error handler is set |

mod context;

pub use context::{EventContext, EventContextMapper};

use crate::kernel::{ErrorHandler, EventHandler, Kernel, Provider};
use crate::keys;
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use stone_core::{Blueprint, Container};
use stone_telemetry::Logger;
use stone_types::{OutgoingResponse, Result, StoneError};
use tracing::{debug, error, info};

/// `handlerFactory` value that builds a `Kernel` over the blueprint.
pub const KERNEL_HANDLER_FACTORY: &str = "stone.kernel";

/// Adapter-level hook points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdapterHook {
    OnInit,
    BeforeHandle,
    OnTerminate,
}

impl AdapterHook {
    /// Key under `stone.adapter.<name>.hooks`.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            AdapterHook::OnInit => "onInit",
            AdapterHook::BeforeHandle => "beforeHandle",
            AdapterHook::OnTerminate => "onTerminate",
        }
    }

    async fn call(self, provider: &dyn Provider) -> Result<()> {
        match self {
            AdapterHook::OnInit => provider.on_init().await,
            AdapterHook::BeforeHandle => provider.before_handle().await,
            AdapterHook::OnTerminate => provider.on_terminate().await,
        }
    }
}

/// Programmatic hook listener.
pub type HookListener = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Builds the event handler an adapter dispatches to.
pub type HandlerFactory<I, O> =
    Arc<dyn Fn(Blueprint) -> Result<Arc<dyn EventHandler<I, O>>> + Send + Sync>;

/// A platform response ready to be sent.
#[async_trait]
pub trait PlatformResponse: Send + Sync {
    /// Deliver the response; the returned value is what `run` returns.
    async fn send(&self) -> Result<Value>;
}

/// Entry point run by `StoneApplication`.
#[async_trait]
pub trait Adapter: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self) -> Result<Value>;
}

/// Platform-independent adapter machinery.
pub struct BaseAdapter<M, I, O, P> {
    name: String,
    blueprint: Blueprint,
    container: Arc<Container>,
    mapper: EventContextMapper<M, I, O, P>,
    hooks: RwLock<HashMap<AdapterHook, Vec<HookListener>>>,
    handler_factory: Option<HandlerFactory<I, O>>,
}

impl<M, I, O, P> BaseAdapter<M, I, O, P>
where
    M: Clone + Send + Sync + 'static,
    I: Clone + Send + Sync + 'static,
    O: OutgoingResponse<I> + Clone + Send + Sync + 'static,
    P: PlatformResponse + Clone + 'static,
{
    /// Adapter configured from `stone.adapter.<name>`.
    pub fn new(blueprint: Blueprint, name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let container = Arc::new(Container::with_registry(blueprint.modules().clone()));
        container.instance(keys::BLUEPRINT, blueprint.clone(), &keys::BLUEPRINT_ALIASES)?;

        let mapper = EventContextMapper::from_blueprint(&blueprint, &name, container.clone())?;
        let handler_factory = blueprint
            .try_get::<String>(&format!("stone.adapter.{name}.handlerFactory"))?
            .map(|factory| Self::configured_factory(&factory));

        debug!(adapter = %name, "Adapter created");
        Ok(Self {
            name,
            blueprint,
            container,
            mapper,
            hooks: RwLock::new(HashMap::new()),
            handler_factory,
        })
    }

    fn configured_factory(factory: &str) -> HandlerFactory<I, O> {
        if factory == KERNEL_HANDLER_FACTORY {
            return Arc::new(|blueprint: Blueprint| -> Result<Arc<dyn EventHandler<I, O>>> {
                let kernel: Arc<dyn EventHandler<I, O>> = Arc::new(Kernel::<I, O>::new(blueprint)?);
                Ok(kernel)
            });
        }
        let class = factory.to_string();
        Arc::new(move |blueprint: Blueprint| -> Result<Arc<dyn EventHandler<I, O>>> {
            let container = Container::with_registry(blueprint.modules().clone());
            container.instance(keys::BLUEPRINT, blueprint, &keys::BLUEPRINT_ALIASES)?;
            container.resolve_as::<dyn EventHandler<I, O>>(&class)
        })
    }

    /// Replace the configured handler factory.
    #[must_use]
    pub fn with_handler_factory(mut self, factory: HandlerFactory<I, O>) -> Self {
        self.handler_factory = Some(factory);
        self
    }

    /// Replace the blueprint-configured mapper.
    #[must_use]
    pub fn with_mapper(mut self, mapper: EventContextMapper<M, I, O, P>) -> Self {
        self.mapper = mapper;
        self
    }

    /// Attach a listener to a hook point. Listeners run after the
    /// blueprint-configured providers.
    pub fn hook(&self, hook: AdapterHook, listener: HookListener) {
        self.hooks.write().entry(hook).or_default().push(listener);
    }

    #[must_use]
    pub fn adapter_name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn blueprint(&self) -> &Blueprint {
        &self.blueprint
    }

    #[must_use]
    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    async fn run_hooks(&self, hook: AdapterHook) -> Result<()> {
        let path = format!("stone.adapter.{}.hooks.{}", self.name, hook.as_str());
        let providers: Vec<String> = self.blueprint.get(&path, Vec::new());
        for name in providers {
            let provider = self.container.resolve_as::<dyn Provider>(&name)?;
            hook.call(provider.as_ref()).await?;
        }

        let listeners = self.hooks.read().get(&hook).cloned().unwrap_or_default();
        for listener in listeners {
            listener().await?;
        }
        debug!(adapter = %self.name, hook = hook.as_str(), "Adapter hook ran");
        Ok(())
    }

    fn handler(&self) -> Result<Arc<dyn EventHandler<I, O>>> {
        let factory = self.handler_factory.as_ref().ok_or_else(|| {
            StoneError::type_error(format!("Adapter '{}' has no handler factory", self.name))
        })?;
        factory(self.blueprint.clone())
    }

    /// Handle one platform message. Only errors raised before the message
    /// is mapped reach the caller.
    pub async fn run_with(&self, message: M) -> Result<Value> {
        self.run_hooks(AdapterHook::OnInit).await?;
        let handler = self.handler()?;
        self.run_hooks(AdapterHook::BeforeHandle).await?;
        handler.before_handle().await?;

        let context = EventContext::new(self.blueprint.clone(), message);
        let value = match self.handle_message(handler.as_ref(), context.clone()).await {
            Ok(value) => value,
            Err(error) => self.handle_error(&error, &context),
        };

        if let Err(error) = self.run_hooks(AdapterHook::OnTerminate).await {
            self.handle_error(&error, &context);
        }
        if let Err(error) = handler.on_terminate().await {
            self.handle_error(&error, &context);
        }

        info!(adapter = %self.name, "Message handled");
        Ok(value)
    }

    async fn handle_message(
        &self,
        handler: &dyn EventHandler<I, O>,
        context: EventContext<M, I, O, P>,
    ) -> Result<Value> {
        let mut context = self.mapper.map_incoming(context).await?;
        let outgoing = handler.handle(context.incoming_event.clone()).await?;
        context.set_outgoing_event(outgoing)?;

        let context = self.mapper.map_outgoing(context).await?;
        match context.response() {
            Some(response) => response.send().await,
            None => {
                debug!(adapter = %self.name, "No platform response produced");
                Ok(Value::Null)
            }
        }
    }

    /// Error handler if configured, else the logger, else `tracing`.
    fn handle_error(&self, failure: &StoneError, context: &EventContext<M, I, O, P>) -> Value {
        match self.error_handler() {
            Ok(Some(handler)) => {
                handler.report(failure, context);
                handler.render(failure, context).unwrap_or_else(|render| {
                    error!(adapter = %self.name, error = %render, "Adapter error handler failed");
                    Value::Null
                })
            }
            Ok(None) => {
                match self.logger() {
                    Some(logger) => logger.error(&failure.to_string()),
                    None => error!(adapter = %self.name, error = %failure, "Unhandled adapter error"),
                }
                Value::Null
            }
            Err(resolve) => {
                error!(adapter = %self.name, error = %failure, %resolve, "Adapter error handler unavailable");
                Value::Null
            }
        }
    }

    fn error_handler(&self) -> Result<Option<Arc<dyn ErrorHandler<EventContext<M, I, O, P>, Value>>>> {
        let path = format!("stone.adapter.{}.errorHandler", self.name);
        match self.blueprint.try_get::<String>(&path)? {
            Some(name) => self
                .container
                .resolve_as::<dyn ErrorHandler<EventContext<M, I, O, P>, Value>>(&name)
                .map(Some),
            None => Ok(None),
        }
    }

    fn logger(&self) -> Option<Arc<dyn Logger>> {
        let name = self.blueprint.try_get::<String>("stone.logger").ok().flatten()?;
        self.container.resolve_as::<dyn Logger>(&name).ok()
    }
}

#[async_trait]
impl<M, I, O, P> Adapter for BaseAdapter<M, I, O, P>
where
    M: Default + Clone + Send + Sync + 'static,
    I: Clone + Send + Sync + 'static,
    O: OutgoingResponse<I> + Clone + Send + Sync + 'static,
    P: PlatformResponse + Clone + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self) -> Result<Value> {
        self.run_with(M::default()).await
    }
}

impl<M, I, O, P> fmt::Debug for BaseAdapter<M, I, O, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BaseAdapter")
            .field("name", &self.name)
            .field("mapper", &self.mapper)
            .field("handler_factory", &self.handler_factory.is_some())
            .finish_non_exhaustive()
    }
}
