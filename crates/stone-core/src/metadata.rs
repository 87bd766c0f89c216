//! # Metadata Store
//!
//! Classes are explicit registration tokens. A `ClassRef` carries:
//!
//! ```text
//! ┌──────────────────────────── ClassRef ────────────────────────────┐
//! │ name         "UserService"                                       │
//! │ factory      (container) -> instance                             │
//! │ casts        TypeId(dyn Trait) -> fn(instance) -> Arc<dyn Trait> │
//! │ metadata     "stone.service" -> {"singleton": true}              │
//! │ blueprints   [fragment, fragment, ...]  (most recent first)      │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The cast table replaces structural capability checks: a class can be used
//! as `dyn Middleware<T, R>` only if it declared so with `implements`.

use crate::container::Container;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use stone_types::{Result, StoneError};

/// A type-erased instance produced by a binding or a class factory.
pub type Resolved = Arc<dyn Any + Send + Sync>;

/// Builds an instance from the container.
pub type Factory = Arc<dyn Fn(&Container) -> Result<Resolved> + Send + Sync>;

type Caster = Arc<dyn Fn(Resolved) -> Option<Resolved> + Send + Sync>;

/// Extract an `Arc<D>` stored directly inside a `Resolved`.
///
/// Values registered as trait objects are stored as `Arc<Arc<dyn Trait>>`.
pub fn downcast_arc<D: ?Sized + Send + Sync + 'static>(resolved: &Resolved) -> Option<Arc<D>> {
    resolved.downcast_ref::<Arc<D>>().cloned()
}

/// Wrap an `Arc<D>` so that `downcast_arc::<D>` finds it again.
pub fn erase_arc<D: ?Sized + Send + Sync + 'static>(value: Arc<D>) -> Resolved {
    Arc::new(value)
}

struct ClassInner {
    name: String,
    type_id: TypeId,
    factory: Factory,
    casts: HashMap<TypeId, Caster>,
    metadata: RwLock<HashMap<String, Value>>,
    blueprints: RwLock<Vec<Value>>,
}

/// A constructible class known by name.
#[derive(Clone)]
pub struct ClassRef {
    inner: Arc<ClassInner>,
}

impl ClassRef {
    /// Start describing class `C`, constructed by `factory`.
    pub fn builder<C, F>(name: impl Into<String>, factory: F) -> ClassBuilder<C>
    where
        C: Send + Sync + 'static,
        F: Fn(&Container) -> Result<C> + Send + Sync + 'static,
    {
        ClassBuilder::new(name.into(), factory)
    }

    /// Shorthand for a class constructed through `Default`.
    pub fn of_default<C>(name: impl Into<String>) -> ClassBuilder<C>
    where
        C: Default + Send + Sync + 'static,
    {
        Self::builder(name, |_| Ok(C::default()))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Whether the instances of this class are of concrete type `C`.
    #[must_use]
    pub fn is<C: 'static>(&self) -> bool {
        self.inner.type_id == TypeId::of::<C>()
    }

    /// Build a fresh instance using `container` for dependencies.
    pub fn instantiate(&self, container: &Container) -> Result<Resolved> {
        (self.inner.factory)(container)
    }

    /// Build a fresh instance with no dependencies available.
    pub fn construct(&self) -> Result<Resolved> {
        self.instantiate(&Container::new())
    }

    /// The factory, for registering this class in a container.
    #[must_use]
    pub fn factory(&self) -> Factory {
        self.inner.factory.clone()
    }

    /// Whether instances can be viewed as `D`.
    #[must_use]
    pub fn implements<D: ?Sized + 'static>(&self) -> bool {
        self.inner.casts.contains_key(&TypeId::of::<D>())
    }

    /// View an instance of this class as `D`.
    pub fn cast<D: ?Sized + Send + Sync + 'static>(&self, instance: &Resolved) -> Option<Arc<D>> {
        if let Some(direct) = downcast_arc::<D>(instance) {
            return Some(direct);
        }
        let caster = self.inner.casts.get(&TypeId::of::<D>())?;
        caster(instance.clone()).and_then(|cast| downcast_arc::<D>(&cast))
    }

    pub fn set_meta(&self, key: impl Into<String>, value: Value) {
        self.inner.metadata.write().insert(key.into(), value);
    }

    /// Metadata deserialized into `T`, or `fallback`.
    pub fn get_meta<T: DeserializeOwned>(&self, key: &str, fallback: T) -> T {
        self.meta(key)
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or(fallback)
    }

    #[must_use]
    pub fn meta(&self, key: &str) -> Option<Value> {
        self.inner.metadata.read().get(key).cloned()
    }

    #[must_use]
    pub fn has_meta(&self, key: &str) -> bool {
        self.inner.metadata.read().contains_key(key)
    }

    /// Record a blueprint fragment. The newest fragment is listed first.
    pub fn add_blueprint(&self, fragment: Value) {
        self.inner.blueprints.write().insert(0, fragment);
    }

    #[must_use]
    pub fn blueprints(&self) -> Vec<Value> {
        self.inner.blueprints.read().clone()
    }

    #[must_use]
    pub fn has_blueprints(&self) -> bool {
        !self.inner.blueprints.read().is_empty()
    }

    /// Same class token, not just the same name.
    #[must_use]
    pub fn same_as(&self, other: &ClassRef) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassRef")
            .field("name", &self.inner.name)
            .field("metadata", &*self.inner.metadata.read())
            .finish_non_exhaustive()
    }
}

/// Builder returned by `ClassRef::builder`.
pub struct ClassBuilder<C> {
    name: String,
    factory: Factory,
    casts: HashMap<TypeId, Caster>,
    metadata: HashMap<String, Value>,
    blueprints: Vec<Value>,
    _class: PhantomData<fn() -> C>,
}

impl<C: Send + Sync + 'static> ClassBuilder<C> {
    fn new<F>(name: String, factory: F) -> Self
    where
        F: Fn(&Container) -> Result<C> + Send + Sync + 'static,
    {
        let factory: Factory = Arc::new(move |container: &Container| -> Result<Resolved> {
            let instance = factory(container)?;
            Ok(Arc::new(instance))
        });
        Self {
            name,
            factory,
            casts: HashMap::new(),
            metadata: HashMap::new(),
            blueprints: Vec::new(),
            _class: PhantomData,
        }
        .implements::<C>(|c| c)
    }

    /// Name the class will be registered under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declare that instances can be used as `D`.
    ///
    /// ```rust,ignore
    /// ClassRef::builder("Auth", |_| Ok(Auth))
    ///     .implements::<dyn Middleware<Request>>(|c| c)
    /// ```
    #[must_use]
    pub fn implements<D>(mut self, cast: fn(Arc<C>) -> Arc<D>) -> Self
    where
        D: ?Sized + Send + Sync + 'static,
    {
        let caster: Caster = Arc::new(move |instance: Resolved| {
            instance
                .downcast::<C>()
                .ok()
                .map(|concrete| erase_arc(cast(concrete)))
        });
        self.casts.insert(TypeId::of::<D>(), caster);
        self
    }

    #[must_use]
    pub fn meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn blueprint(mut self, fragment: Value) -> Self {
        self.blueprints.insert(0, fragment);
        self
    }

    #[must_use]
    pub fn build(self) -> ClassRef {
        ClassRef {
            inner: Arc::new(ClassInner {
                name: self.name,
                type_id: TypeId::of::<C>(),
                factory: self.factory,
                casts: self.casts,
                metadata: RwLock::new(self.metadata),
                blueprints: RwLock::new(self.blueprints),
            }),
        }
    }
}

/// A declared module: either a class or a plain value.
#[derive(Debug, Clone)]
pub enum Module {
    Class(ClassRef),
    Value(Value),
}

impl Module {
    /// The class behind this module, or a type error for plain values.
    pub fn as_class(&self) -> Result<&ClassRef> {
        match self {
            Module::Class(class) => Ok(class),
            Module::Value(value) => Err(StoneError::type_error(format!(
                "Metadata can only be attached to classes, got value {value}"
            ))),
        }
    }

    #[must_use]
    pub fn is_class(&self) -> bool {
        matches!(self, Module::Class(_))
    }
}

impl From<ClassRef> for Module {
    fn from(class: ClassRef) -> Self {
        Module::Class(class)
    }
}

impl From<Value> for Module {
    fn from(value: Value) -> Self {
        Module::Value(value)
    }
}

pub fn set_meta(target: &Module, key: &str, value: Value) -> Result<()> {
    target.as_class()?.set_meta(key, value);
    Ok(())
}

pub fn get_meta<T: DeserializeOwned>(target: &Module, key: &str, fallback: T) -> Result<T> {
    Ok(target.as_class()?.get_meta(key, fallback))
}

pub fn has_meta(target: &Module, key: &str) -> Result<bool> {
    Ok(target.as_class()?.has_meta(key))
}

pub fn add_blueprint_contribution(target: &Module, fragment: Value) -> Result<()> {
    target.as_class()?.add_blueprint(fragment);
    Ok(())
}

pub fn get_blueprint_contributions(target: &Module) -> Result<Vec<Value>> {
    Ok(target.as_class()?.blueprints())
}

/// Classes known by name, in registration order.
#[derive(Default)]
pub struct ModuleRegistry {
    classes: RwLock<Vec<ClassRef>>,
}

impl ModuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class. A class with the same name is replaced in place.
    pub fn register(&self, class: ClassRef) {
        let mut classes = self.classes.write();
        match classes.iter_mut().find(|c| c.name() == class.name()) {
            Some(existing) => *existing = class,
            None => classes.push(class),
        }
    }

    /// Register only if no class with that name is known yet.
    pub fn register_if_absent(&self, class: ClassRef) -> bool {
        let mut classes = self.classes.write();
        if classes.iter().any(|c| c.name() == class.name()) {
            return false;
        }
        classes.push(class);
        true
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<ClassRef> {
        self.classes.read().iter().find(|c| c.name() == name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.classes.read().iter().any(|c| c.name() == name)
    }

    /// Look a class up or fail with a configuration error.
    pub fn require(&self, name: &str) -> Result<ClassRef> {
        self.get(name)
            .ok_or_else(|| StoneError::configuration(format!("Unknown module '{name}'")))
    }

    /// Every class carrying metadata `key`, in registration order.
    #[must_use]
    pub fn tagged(&self, key: &str) -> Vec<ClassRef> {
        self.classes
            .read()
            .iter()
            .filter(|c| c.has_meta(key))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn classes(&self) -> Vec<ClassRef> {
        self.classes.read().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.classes.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classes.read().is_empty()
    }
}

impl fmt::Debug for ModuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.classes.read().iter().map(|c| c.name().to_string()).collect();
        f.debug_struct("ModuleRegistry").field("classes", &names).finish()
    }
}
