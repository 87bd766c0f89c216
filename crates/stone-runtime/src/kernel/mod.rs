//! # Kernel
//!
//! Drives one incoming event to an outgoing response.
//!
//! ## Lifecycle
//!
//! ```text
//!   Created ──► Booting (once, first handle) ──► Handling ──► Terminated
//! ```
//!
//! ## One `handle` call
//!
//! ```text
//!   incoming ──► incoming middleware ──► router | handler ──► outgoing
//!                                                               │
//!      PreparingResponse ◄──────────────────────────────────────┘
//!      outgoing.prepare(incoming)
//!      ResponsePrepared
//!      outgoing middleware over {incoming, outgoing}
//!      EventHandled
//! ```
//!
//! A `StoneError::Handling` raised anywhere in that sequence goes to the
//! configured error handler, whose rendered value is returned instead. Every
//! other error, or any error without a handler, reaches the caller.
//!
//! ## Container bindings made at construction
//!
//! | Key | Aliases | Value |
//! |-----|---------|-------|
//! | `container` | | `ContainerRef` |
//! | `stone.blueprint` | `blueprint`, `config` | `Blueprint` |
//! | `stone.emitter` | `events`, `eventEmitter` | `EventEmitter<KernelEvent<I, O>>` |

mod contracts;
mod core_provider;

pub use contracts::{ErrorHandler, EventHandler, FnHandler, Handler, Provider, Router, Subscriber};
pub use core_provider::{CoreServiceProvider, CORE_PROVIDER};

use crate::keys;
use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use stone_bus::{BusEvent, EventEmitter};
use stone_core::{Blueprint, Container, ContainerRef, PipeDefinition, Pipeline, DEFAULT_PRIORITY};
use stone_types::{LifecycleEvent, OutgoingResponse, Result, StoneError};
use tokio::sync::OnceCell;
use stone_telemetry::kernel_span;
use tracing::{debug, info, trace, warn, Instrument};
use uuid::Uuid;

/// Observable kernel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelState {
    Created,
    Booting,
    Handling,
    Terminated,
}

/// The event pair threaded through outgoing and terminate middleware.
#[derive(Debug, Clone, PartialEq)]
pub struct KernelContext<I, O> {
    pub incoming: I,
    pub outgoing: O,
}

/// Lifecycle event carried by the kernel's emitter.
#[derive(Debug, Clone)]
pub struct KernelEvent<I, O> {
    pub kind: LifecycleEvent,
    pub context: KernelContext<I, O>,
}

impl<I, O> BusEvent for KernelEvent<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        self.kind.as_str()
    }
}

type ProviderList = Vec<(String, Arc<dyn Provider>)>;

/// Event lifecycle over a blueprint.
pub struct Kernel<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    id: Uuid,
    blueprint: Blueprint,
    container: Arc<Container>,
    emitter: Arc<EventEmitter<KernelEvent<I, O>>>,
    core: Arc<CoreServiceProvider<I, O>>,
    providers: RwLock<ProviderList>,
    registered: Mutex<HashSet<String>>,
    booted_providers: Mutex<HashSet<String>>,
    booted: OnceCell<()>,
    state: RwLock<KernelState>,
    last: Mutex<Option<KernelContext<I, O>>>,
}

impl<I, O> Kernel<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: OutgoingResponse<I> + Clone + Send + Sync + 'static,
{
    /// Create a kernel with its base container bindings.
    pub fn new(blueprint: Blueprint) -> Result<Self> {
        let container = Arc::new(Container::with_registry(blueprint.modules().clone()));
        let emitter = Arc::new(EventEmitter::new());

        container.instance(keys::CONTAINER, ContainerRef::new(&container), &[])?;
        container.instance(keys::BLUEPRINT, blueprint.clone(), &keys::BLUEPRINT_ALIASES)?;
        container.instance_arc(keys::EMITTER, emitter.clone(), &keys::EMITTER_ALIASES)?;

        let core = Arc::new(CoreServiceProvider::new(
            container.clone(),
            blueprint.clone(),
            emitter.clone(),
        ));

        let id = Uuid::new_v4();
        debug!(kernel = %id, "Kernel created");
        Ok(Self {
            id,
            blueprint,
            container,
            emitter,
            core,
            providers: RwLock::new(Vec::new()),
            registered: Mutex::new(HashSet::new()),
            booted_providers: Mutex::new(HashSet::new()),
            booted: OnceCell::new(),
            state: RwLock::new(KernelState::Created),
            last: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> KernelState {
        *self.state.read()
    }

    #[must_use]
    pub fn has_booted(&self) -> bool {
        self.booted.initialized()
    }

    #[must_use]
    pub fn blueprint(&self) -> &Blueprint {
        &self.blueprint
    }

    #[must_use]
    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    #[must_use]
    pub fn emitter(&self) -> &Arc<EventEmitter<KernelEvent<I, O>>> {
        &self.emitter
    }

    /// The last handled pair, consumed by `on_terminate`.
    #[must_use]
    pub fn last_context(&self) -> Option<KernelContext<I, O>> {
        self.last.lock().clone()
    }

    fn set_state(&self, state: KernelState) {
        *self.state.write() = state;
    }

    // =========================================================================
    // Providers
    // =========================================================================

    /// Core provider first, then the configured ones that do not ask to be
    /// skipped.
    fn resolve_providers(&self) -> Result<ProviderList> {
        let core: Arc<dyn Provider> = self.core.clone();
        let mut providers: ProviderList = vec![(CORE_PROVIDER.to_string(), core)];

        let names: Vec<String> = self.blueprint.get("stone.kernel.providers", Vec::new());
        for name in names {
            let provider = self.container.resolve_as::<dyn Provider>(&name)?;
            if provider.must_skip() {
                debug!(kernel = %self.id, provider = %name, "Provider skipped");
                continue;
            }
            providers.push((name, provider));
        }

        *self.providers.write() = providers.clone();
        Ok(providers)
    }

    /// Register providers not registered yet; boot them too when the kernel
    /// has already booted.
    async fn register_pending(&self, providers: &ProviderList) -> Result<()> {
        for (name, provider) in providers {
            let fresh = self.registered.lock().insert(name.clone());
            if !fresh {
                continue;
            }
            provider.register().await?;
            debug!(kernel = %self.id, provider = %name, "Provider registered");
            if self.has_booted() {
                self.boot_provider(name, provider).await?;
                debug!(kernel = %self.id, provider = %name, "Late provider booted");
            }
        }
        Ok(())
    }

    /// Run every provider's `before_handle`, then register new providers.
    pub async fn before_handle(&self) -> Result<()> {
        let providers = self.resolve_providers()?;
        for (_, provider) in &providers {
            provider.before_handle().await?;
        }
        self.register_pending(&providers).await
    }

    /// Boot one provider unless it already booted. A failed boot is retried
    /// on the next call; a successful one never runs again.
    async fn boot_provider(&self, name: &str, provider: &Arc<dyn Provider>) -> Result<bool> {
        if self.booted_providers.lock().contains(name) {
            return Ok(false);
        }
        provider.boot().await?;
        self.booted_providers.lock().insert(name.to_string());
        Ok(true)
    }

    async fn boot(&self) -> Result<()> {
        self.booted
            .get_or_try_init(|| {
                self.boot_providers()
                    .instrument(kernel_span!("boot", kernel = %self.id))
            })
            .await?;
        Ok(())
    }

    async fn boot_providers(&self) -> Result<()> {
        self.set_state(KernelState::Booting);
        let providers = self.resolve_providers()?;
        self.register_pending(&providers).await?;
        for (name, provider) in &providers {
            if self.boot_provider(name, provider).await? {
                debug!(kernel = %self.id, provider = %name, "Provider booted");
            }
        }
        info!(kernel = %self.id, providers = providers.len(), "Kernel booted");
        Ok(())
    }

    // =========================================================================
    // Handling
    // =========================================================================

    /// Handle one event. `None` is rejected before any middleware runs.
    pub async fn handle(&self, event: Option<I>) -> Result<O> {
        let incoming = event.ok_or_else(|| {
            StoneError::type_error("No incoming event provided to the kernel")
        })?;

        let span = kernel_span!("handle", kernel = %self.id);
        match self.process(incoming.clone()).instrument(span).await {
            Ok(outgoing) => Ok(outgoing),
            Err(error) if error.is_recoverable() => self.recover(error, incoming),
            Err(error) => Err(error),
        }
    }

    async fn process(&self, incoming: I) -> Result<O> {
        self.boot().await?;
        self.set_state(KernelState::Handling);

        let outgoing = self
            .middleware::<I, O>("incoming")?
            .send(incoming.clone())
            .then_async(self.destination())
            .await?;

        let mut context = KernelContext { incoming, outgoing };
        self.emit(LifecycleEvent::PreparingResponse, &context).await?;
        context.outgoing.prepare(&context.incoming).await?;
        self.emit(LifecycleEvent::ResponsePrepared, &context).await?;

        let context = self
            .middleware::<KernelContext<I, O>, KernelContext<I, O>>("outgoing")?
            .send(context)
            .then_async(|context| async move { Ok(context) })
            .await?;
        self.emit(LifecycleEvent::EventHandled, &context).await?;

        let outgoing = context.outgoing.clone();
        *self.last.lock() = Some(context);
        Ok(outgoing)
    }

    fn recover(&self, error: StoneError, incoming: I) -> Result<O> {
        let Some(handler) = self.error_handler()? else {
            return Err(error);
        };
        warn!(kernel = %self.id, %error, "Handling error intercepted");
        handler.report(&error, &incoming);
        let outgoing = handler.render(&error, &incoming)?;
        *self.last.lock() = Some(KernelContext {
            incoming,
            outgoing: outgoing.clone(),
        });
        Ok(outgoing)
    }

    fn error_handler(&self) -> Result<Option<Arc<dyn ErrorHandler<I, O>>>> {
        match self.blueprint.try_get::<String>("stone.kernel.errorHandler")? {
            Some(name) => self
                .container
                .resolve_as::<dyn ErrorHandler<I, O>>(&name)
                .map(Some),
            None => Ok(None),
        }
    }

    /// End of the incoming pipeline: the bound router, else the configured
    /// handler.
    fn destination(&self) -> impl Fn(I) -> BoxFuture<'static, Result<O>> + Send + Sync + 'static {
        let container = self.container.clone();
        let blueprint = self.blueprint.clone();
        move |event: I| -> BoxFuture<'static, Result<O>> {
            let container = container.clone();
            let blueprint = blueprint.clone();
            Box::pin(async move {
                if container.bound(keys::ROUTER) {
                    let router = container.make_as::<dyn Router<I, O>>(keys::ROUTER)?;
                    return router.dispatch(event).await;
                }
                match blueprint.try_get::<String>("stone.kernel.handler")? {
                    Some(name) => {
                        let handler = container.resolve_as::<dyn Handler<I, O>>(&name)?;
                        handler.handle(event).await
                    }
                    None => Err(StoneError::type_error(
                        "No router is bound and no handler is configured",
                    )),
                }
            })
        }
    }

    /// Pipeline for `stone.kernel.middleware.<stage>`; empty when `skip` is set.
    fn middleware<T, R>(&self, stage: &str) -> Result<Pipeline<T, R>>
    where
        T: Send + 'static,
        R: Send + 'static,
    {
        let priority = self
            .blueprint
            .get("stone.kernel.middleware.defaultPriority", DEFAULT_PRIORITY);
        let pipeline = Pipeline::with_container(self.container.clone()).default_priority(priority);
        if self.blueprint.get("stone.kernel.middleware.skip", false) {
            trace!(kernel = %self.id, stage, "Middleware skipped");
            return Ok(pipeline);
        }
        let entries: Vec<Value> = self
            .blueprint
            .get(&format!("stone.kernel.middleware.{stage}"), Vec::new());
        Ok(pipeline.through(PipeDefinition::list_from_config(&entries)?))
    }

    async fn emit(&self, kind: LifecycleEvent, context: &KernelContext<I, O>) -> Result<()> {
        let event = KernelEvent {
            kind,
            context: context.clone(),
        };
        let reached = self.emitter.emit(&event).await?;
        trace!(kernel = %self.id, event = %kind, listeners = reached, "Lifecycle event emitted");
        Ok(())
    }

    // =========================================================================
    // Termination
    // =========================================================================

    /// Run provider `on_terminate` hooks, then the terminate middleware over
    /// the last handled pair. Errors propagate.
    pub async fn on_terminate(&self) -> Result<()> {
        self.terminate()
            .instrument(kernel_span!("terminate", kernel = %self.id))
            .await
    }

    async fn terminate(&self) -> Result<()> {
        let providers = self.providers.read().clone();
        for (_, provider) in &providers {
            provider.on_terminate().await?;
        }

        let last = self.last.lock().take();
        if let Some(context) = last {
            self.middleware::<KernelContext<I, O>, KernelContext<I, O>>("terminate")?
                .send(context)
                .then_async(|context| async move { Ok(context) })
                .await?;
        }

        self.set_state(KernelState::Terminated);
        debug!(kernel = %self.id, "Kernel terminated");
        Ok(())
    }
}

#[async_trait]
impl<I, O> EventHandler<I, O> for Kernel<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: OutgoingResponse<I> + Clone + Send + Sync + 'static,
{
    async fn before_handle(&self) -> Result<()> {
        Kernel::before_handle(self).await
    }

    async fn handle(&self, event: Option<I>) -> Result<O> {
        Kernel::handle(self, event).await
    }

    async fn on_terminate(&self) -> Result<()> {
        Kernel::on_terminate(self).await
    }
}

impl<I, O> fmt::Debug for Kernel<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("id", &self.id)
            .field("state", &*self.state.read())
            .field("providers", &self.providers.read().len())
            .finish_non_exhaustive()
    }
}
