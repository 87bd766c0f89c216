//! # Pipeline Engine
//!
//! Sends a passable through priority-ordered stages to a destination.
//!
//! ```text
//!   send(passable)
//!       │
//!       ▼
//!   ┌────────┐  next   ┌────────┐  next   ┌────────┐  next   ┌─────────────┐
//!   │ p = 0  │ ──────► │ p = 5  │ ──────► │ p = 10 │ ──────► │ destination │
//!   └────────┘         └────────┘         └────────┘         └─────────────┘
//!       ▲ result           ▲                  ▲                    │
//!       └──────────────────┴──────────────────┴────────────────────┘
//! ```
//!
//! Stages are stable-sorted by priority (bare stages get the default
//! priority), resolved once, then folded right to left so each stage wraps
//! the continuation after it. A stage that does not call `next` ends the
//! chain and its return value becomes the result.
//!
//! ## Strategies
//!
//! | Entry point | Accepted stages |
//! |-------------|-----------------|
//! | `then` | `Function`, classes implementing `Middleware` |
//! | `then_async` | `AsyncFunction`, classes implementing `AsyncMiddleware` |
//!
//! Aliases are resolved through the container and may name either kind.

use crate::container::Container;
use crate::metadata::{ClassRef, Resolved};
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::any::type_name;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use stone_types::{MiddlewareTypeError, Result, StoneError};
use tracing::{debug, trace};

/// Priority given to stages declared without one.
pub const DEFAULT_PRIORITY: f64 = 10.0;

/// Method invoked on class stages unless `via` says otherwise.
pub const DEFAULT_METHOD: &str = "handle";

// =============================================================================
// Continuations
// =============================================================================

/// Continuation handed to a synchronous stage.
pub struct Next<'a, T, R> {
    inner: &'a (dyn Fn(T) -> Result<R> + 'a),
}

impl<'a, T, R> Next<'a, T, R> {
    fn new(inner: &'a (dyn Fn(T) -> Result<R> + 'a)) -> Self {
        Self { inner }
    }

    /// Hand the passable to the rest of the chain.
    pub fn run(&self, passable: T) -> Result<R> {
        (self.inner)(passable)
    }
}

impl<T, R> Clone for Next<'_, T, R> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, R> Copy for Next<'_, T, R> {}

/// Continuation handed to a suspending stage.
pub struct AsyncNext<T, R> {
    inner: Arc<dyn Fn(T) -> BoxFuture<'static, Result<R>> + Send + Sync>,
}

impl<T, R> AsyncNext<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    fn new<F>(inner: F) -> Self
    where
        F: Fn(T) -> BoxFuture<'static, Result<R>> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Hand the passable to the rest of the chain.
    pub fn run(&self, passable: T) -> BoxFuture<'static, Result<R>> {
        (self.inner)(passable)
    }
}

impl<T, R> Clone for AsyncNext<T, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

// =============================================================================
// Middleware capabilities
// =============================================================================

/// A class usable as a synchronous stage.
pub trait Middleware<T, R = T>: Send + Sync {
    fn handle(&self, passable: T, next: Next<'_, T, R>, params: Option<&Value>) -> Result<R>;

    /// Dispatch by method name. Override to expose methods besides `handle`.
    fn call(
        &self,
        method: &str,
        passable: T,
        next: Next<'_, T, R>,
        params: Option<&Value>,
    ) -> Result<R> {
        match method {
            DEFAULT_METHOD => self.handle(passable, next, params),
            other => Err(missing_method(other, type_name::<Self>())),
        }
    }
}

/// A class usable as a suspending stage.
#[async_trait]
pub trait AsyncMiddleware<T, R = T>: Send + Sync
where
    T: Send + 'static,
    R: Send + 'static,
{
    async fn handle(&self, passable: T, next: AsyncNext<T, R>, params: Option<Value>) -> Result<R>;

    /// Dispatch by method name. Override to expose methods besides `handle`.
    async fn call(
        &self,
        method: &str,
        passable: T,
        next: AsyncNext<T, R>,
        params: Option<Value>,
    ) -> Result<R> {
        match method {
            DEFAULT_METHOD => self.handle(passable, next, params).await,
            other => Err(missing_method(other, type_name::<Self>())),
        }
    }
}

fn missing_method(method: &str, stage: &str) -> StoneError {
    MiddlewareTypeError::MissingMethod {
        method: method.to_string(),
        stage: stage.to_string(),
    }
    .into()
}

// =============================================================================
// Stages
// =============================================================================

pub type SyncStageFn<T, R> =
    Arc<dyn for<'a> Fn(T, Next<'a, T, R>, Option<&'a Value>) -> Result<R> + Send + Sync>;

pub type AsyncStageFn<T, R> =
    Arc<dyn Fn(T, AsyncNext<T, R>, Option<Value>) -> BoxFuture<'static, Result<R>> + Send + Sync>;

/// One link of a pipeline, classified when it is declared.
pub enum Stage<T, R = T> {
    Function(SyncStageFn<T, R>),
    AsyncFunction(AsyncStageFn<T, R>),
    Class(ClassRef),
    /// A container key, resolved when the pipeline runs.
    Alias(String),
}

impl<T, R> Stage<T, R> {
    pub fn function<F>(f: F) -> Self
    where
        F: for<'a> Fn(T, Next<'a, T, R>, Option<&'a Value>) -> Result<R> + Send + Sync + 'static,
    {
        Stage::Function(Arc::new(f))
    }

    pub fn async_function<F, Fut>(f: F) -> Self
    where
        F: Fn(T, AsyncNext<T, R>, Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        Stage::AsyncFunction(Arc::new(
            move |passable: T, next: AsyncNext<T, R>, params: Option<Value>| -> BoxFuture<'static, Result<R>> {
                Box::pin(f(passable, next, params))
            },
        ))
    }

    /// Human-readable name for logs and errors.
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Stage::Function(_) => "<function>".to_string(),
            Stage::AsyncFunction(_) => "<async function>".to_string(),
            Stage::Class(class) => class.name().to_string(),
            Stage::Alias(name) => name.clone(),
        }
    }
}

impl<T, R> Clone for Stage<T, R> {
    fn clone(&self) -> Self {
        match self {
            Stage::Function(f) => Stage::Function(f.clone()),
            Stage::AsyncFunction(f) => Stage::AsyncFunction(f.clone()),
            Stage::Class(class) => Stage::Class(class.clone()),
            Stage::Alias(name) => Stage::Alias(name.clone()),
        }
    }
}

impl<T, R> fmt::Debug for Stage<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Stage({})", self.label())
    }
}

impl<T, R> From<ClassRef> for Stage<T, R> {
    fn from(class: ClassRef) -> Self {
        Stage::Class(class)
    }
}

impl<T, R> From<&str> for Stage<T, R> {
    fn from(alias: &str) -> Self {
        Stage::Alias(alias.to_string())
    }
}

impl<T, R> From<String> for Stage<T, R> {
    fn from(alias: String) -> Self {
        Stage::Alias(alias)
    }
}

/// A stage with its optional parameters and priority.
pub struct PipeDefinition<T, R = T> {
    pub stage: Stage<T, R>,
    pub params: Option<Value>,
    pub priority: Option<f64>,
}

impl<T, R> fmt::Debug for PipeDefinition<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeDefinition")
            .field("stage", &self.stage)
            .field("params", &self.params)
            .field("priority", &self.priority)
            .finish()
    }
}

impl<T, R> PipeDefinition<T, R> {
    pub fn new(stage: impl Into<Stage<T, R>>) -> Self {
        Self {
            stage: stage.into(),
            params: None,
            priority: None,
        }
    }

    #[must_use]
    pub fn priority(mut self, priority: f64) -> Self {
        self.priority = Some(priority);
        self
    }

    #[must_use]
    pub fn params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    /// Parse a configuration entry: either `"Name"` or
    /// `{ "pipe": "Name", "priority": 5, "params": ... }`.
    pub fn from_config(entry: &Value) -> Result<Self> {
        match entry {
            Value::String(name) => Ok(Self::new(name.as_str())),
            Value::Object(map) => {
                let name = map.get("pipe").and_then(Value::as_str).ok_or_else(|| {
                    StoneError::from(MiddlewareTypeError::Unresolvable(entry.to_string()))
                })?;
                let mut definition = Self::new(name);
                definition.priority = map.get("priority").and_then(Value::as_f64);
                definition.params = map.get("params").filter(|p| !p.is_null()).cloned();
                Ok(definition)
            }
            other => Err(MiddlewareTypeError::Unresolvable(other.to_string()).into()),
        }
    }

    /// Parse a list of configuration entries.
    pub fn list_from_config(entries: &[Value]) -> Result<Vec<Self>> {
        entries.iter().map(Self::from_config).collect()
    }

    fn effective_priority(&self, default: f64) -> f64 {
        self.priority.unwrap_or(default)
    }
}

impl<T, R> Clone for PipeDefinition<T, R> {
    fn clone(&self) -> Self {
        Self {
            stage: self.stage.clone(),
            params: self.params.clone(),
            priority: self.priority,
        }
    }
}

impl<T, R> From<Stage<T, R>> for PipeDefinition<T, R> {
    fn from(stage: Stage<T, R>) -> Self {
        Self::new(stage)
    }
}

impl<T, R> From<ClassRef> for PipeDefinition<T, R> {
    fn from(class: ClassRef) -> Self {
        Self::new(class)
    }
}

impl<T, R> From<&str> for PipeDefinition<T, R> {
    fn from(alias: &str) -> Self {
        Self::new(alias)
    }
}

// =============================================================================
// Pipeline
// =============================================================================

enum SyncLink<T, R> {
    Function(SyncStageFn<T, R>),
    Class(Arc<dyn Middleware<T, R>>),
}

enum AsyncLink<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    Function(AsyncStageFn<T, R>),
    Class(Arc<dyn AsyncMiddleware<T, R>>),
}

impl<T, R> Clone for AsyncLink<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    fn clone(&self) -> Self {
        match self {
            AsyncLink::Function(f) => AsyncLink::Function(f.clone()),
            AsyncLink::Class(c) => AsyncLink::Class(c.clone()),
        }
    }
}

/// Ordered-stage executor.
pub struct Pipeline<T, R = T> {
    passable: Option<T>,
    pipes: Vec<PipeDefinition<T, R>>,
    container: Option<Arc<Container>>,
    method: String,
    default_priority: f64,
}

impl<T, R> Default for Pipeline<T, R> {
    fn default() -> Self {
        Self {
            passable: None,
            pipes: Vec::new(),
            container: None,
            method: DEFAULT_METHOD.to_string(),
            default_priority: DEFAULT_PRIORITY,
        }
    }
}

impl<T: 'static, R: 'static> Pipeline<T, R> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A pipeline that builds class and alias stages through `container`.
    #[must_use]
    pub fn with_container(container: Arc<Container>) -> Self {
        Self::new().container(container)
    }

    #[must_use]
    pub fn container(mut self, container: Arc<Container>) -> Self {
        self.container = Some(container);
        self
    }

    /// Set the value sent through the stages.
    #[must_use]
    pub fn send(mut self, passable: T) -> Self {
        self.passable = Some(passable);
        self
    }

    /// Append stages.
    #[must_use]
    pub fn through<I, P>(mut self, pipes: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PipeDefinition<T, R>>,
    {
        self.pipes.extend(pipes.into_iter().map(Into::into));
        self
    }

    /// Append one stage.
    #[must_use]
    pub fn pipe(mut self, pipe: impl Into<PipeDefinition<T, R>>) -> Self {
        self.pipes.push(pipe.into());
        self
    }

    /// Method invoked on class stages.
    #[must_use]
    pub fn via(mut self, method: impl Into<String>) -> Self {
        self.method = method.into();
        self
    }

    /// Priority given to stages declared without one.
    #[must_use]
    pub fn default_priority(mut self, priority: f64) -> Self {
        self.default_priority = priority;
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.pipes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pipes.is_empty()
    }

    /// Stages in execution order: ascending priority, declaration order on ties.
    #[must_use]
    pub fn sorted(&self) -> Vec<&PipeDefinition<T, R>> {
        let default = self.default_priority;
        let mut pipes: Vec<_> = self.pipes.iter().collect();
        pipes.sort_by(|a, b| {
            a.effective_priority(default)
                .total_cmp(&b.effective_priority(default))
        });
        pipes
    }

    fn take_passable(&mut self) -> Result<T> {
        self.passable
            .take()
            .ok_or_else(|| StoneError::type_error("Pipeline has no passable; call send() first"))
    }

    fn instantiate(&self, class: &ClassRef) -> Result<Resolved> {
        match &self.container {
            Some(container) => container.resolve_class(class),
            None => class.construct(),
        }
    }

    fn resolve_alias(&self, name: &str) -> Result<(Resolved, Arc<Container>)> {
        let container = self.container.clone().ok_or_else(|| {
            StoneError::type_error(format!("Stage '{name}' is an alias but no container is set"))
        })?;
        let resolved = container.resolve_any(name)?;
        Ok((resolved, container))
    }

    fn no_capability(&self, stage: &str) -> StoneError {
        missing_method(&self.method, stage)
    }
}

impl<T: 'static, R: 'static> Pipeline<T, R> {
    fn resolve_sync(&self) -> Result<Vec<(SyncLink<T, R>, Option<Value>)>> {
        self.sorted()
            .into_iter()
            .map(|pipe| -> Result<(SyncLink<T, R>, Option<Value>)> {
                let link = match &pipe.stage {
                    Stage::Function(f) => SyncLink::Function(f.clone()),
                    Stage::AsyncFunction(_) => {
                        return Err(MiddlewareTypeError::ModeMismatch {
                            stage: pipe.stage.label(),
                            mode: "synchronous".to_string(),
                        }
                        .into())
                    }
                    Stage::Class(class) => {
                        let instance = self.instantiate(class)?;
                        let middleware = class
                            .cast::<dyn Middleware<T, R>>(&instance)
                            .ok_or_else(|| self.no_capability(class.name()))?;
                        SyncLink::Class(middleware)
                    }
                    Stage::Alias(name) => {
                        let (instance, container) = self.resolve_alias(name)?;
                        let middleware = container
                            .cast::<dyn Middleware<T, R>>(name, &instance)
                            .ok_or_else(|| self.no_capability(name))?;
                        SyncLink::Class(middleware)
                    }
                };
                Ok((link, pipe.params.clone()))
            })
            .collect()
    }

    /// Run the stages synchronously, ending in `destination`.
    pub fn then<F>(mut self, destination: F) -> Result<R>
    where
        F: Fn(T) -> Result<R>,
    {
        let passable = self.take_passable()?;
        let links = self.resolve_sync()?;
        debug!(stages = links.len(), method = %self.method, "Running pipeline");
        run_sync(&links, 0, passable, &destination, &self.method)
    }
}

impl<T: 'static> Pipeline<T, T> {
    /// Run the stages synchronously and return the final passable.
    pub fn then_return(self) -> Result<T> {
        self.then(Ok)
    }
}

fn run_sync<T, R>(
    links: &[(SyncLink<T, R>, Option<Value>)],
    index: usize,
    passable: T,
    destination: &dyn Fn(T) -> Result<R>,
    method: &str,
) -> Result<R> {
    let Some((link, params)) = links.get(index) else {
        return destination(passable);
    };
    trace!(index, "Pipeline stage");
    let rest = |p: T| run_sync(links, index + 1, p, destination, method);
    let next = Next::new(&rest);
    match link {
        SyncLink::Function(f) => f(passable, next, params.as_ref()),
        SyncLink::Class(middleware) => middleware.call(method, passable, next, params.as_ref()),
    }
}

impl<T, R> Pipeline<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    fn resolve_async(&self) -> Result<Vec<(AsyncLink<T, R>, Option<Value>)>> {
        self.sorted()
            .into_iter()
            .map(|pipe| -> Result<(AsyncLink<T, R>, Option<Value>)> {
                let link = match &pipe.stage {
                    Stage::AsyncFunction(f) => AsyncLink::Function(f.clone()),
                    Stage::Function(_) => {
                        return Err(MiddlewareTypeError::ModeMismatch {
                            stage: pipe.stage.label(),
                            mode: "suspending".to_string(),
                        }
                        .into())
                    }
                    Stage::Class(class) => {
                        let instance = self.instantiate(class)?;
                        let middleware = class
                            .cast::<dyn AsyncMiddleware<T, R>>(&instance)
                            .ok_or_else(|| self.no_capability(class.name()))?;
                        AsyncLink::Class(middleware)
                    }
                    Stage::Alias(name) => {
                        let (instance, container) = self.resolve_alias(name)?;
                        let middleware = container
                            .cast::<dyn AsyncMiddleware<T, R>>(name, &instance)
                            .ok_or_else(|| self.no_capability(name))?;
                        AsyncLink::Class(middleware)
                    }
                };
                Ok((link, pipe.params.clone()))
            })
            .collect()
    }

    /// Run the stages as a chain of suspending computations, ending in
    /// `destination`.
    pub async fn then_async<F, Fut>(mut self, destination: F) -> Result<R>
    where
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let passable = self.take_passable()?;
        let links = self.resolve_async()?;
        debug!(stages = links.len(), method = %self.method, "Running async pipeline");

        let destination = Arc::new(destination);
        let mut next: AsyncNext<T, R> = AsyncNext::new(move |p| {
            let destination = destination.clone();
            Box::pin(async move { destination(p).await })
        });

        for (link, params) in links.into_iter().rev() {
            let after = next;
            let method = self.method.clone();
            next = AsyncNext::new(move |p| {
                let link = link.clone();
                let after = after.clone();
                let params = params.clone();
                let method = method.clone();
                Box::pin(async move {
                    match link {
                        AsyncLink::Function(f) => f(p, after, params).await,
                        AsyncLink::Class(middleware) => {
                            middleware.call(&method, p, after, params).await
                        }
                    }
                })
            });
        }

        next.run(passable).await
    }
}

impl<T, R> fmt::Debug for Pipeline<T, R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("pipes", &self.pipes)
            .field("method", &self.method)
            .field("default_priority", &self.default_priority)
            .field("container", &self.container.is_some())
            .finish_non_exhaustive()
    }
}
