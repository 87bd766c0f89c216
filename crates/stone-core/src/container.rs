//! # Dependency Container
//!
//! Binds string keys to instances or factories with three lifetimes.
//!
//! ```text
//!   make("events")
//!      │  alias table: "events" -> "stone.emitter"
//!      ▼
//!   bindings["stone.emitter"]
//!      ├─ Instance   -> the stored value
//!      ├─ Factory    -> factory(container), every time
//!      └─ Singleton  -> factory(container) once, then the cached value
//! ```
//!
//! `resolve` additionally auto-registers classes known to the module
//! registry as singletons before making them.
//!
//! ## Locking
//!
//! The binding map lock is never held while a factory runs. A singleton's
//! first resolution holds that binding's own lock, so concurrent first
//! resolutions of one key run the factory once.

use crate::metadata::{downcast_arc, erase_arc, ClassRef, Factory, ModuleRegistry, Resolved};
use parking_lot::{Mutex, RwLock};
use std::any::type_name;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use stone_types::{AliasError, ResolutionError, Result, StoneError};
use tracing::{debug, trace};

/// Binding lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// A constant registered up front.
    Instance,
    /// Re-evaluated on every resolution.
    Factory,
    /// Evaluated on first resolution, cached afterwards.
    Singleton,
}

struct Binding {
    lifetime: Lifetime,
    factory: Option<Factory>,
    cache: Mutex<Option<Resolved>>,
    class: Option<ClassRef>,
}

impl Binding {
    fn produce(&self, container: &Container, key: &str) -> Result<Resolved> {
        match self.lifetime {
            Lifetime::Instance => self
                .cache
                .lock()
                .clone()
                .ok_or_else(|| ResolutionError::Unbound(key.to_string()).into()),
            Lifetime::Factory => self.call_factory(container, key),
            Lifetime::Singleton => {
                let mut cache = self.cache.lock();
                if let Some(cached) = cache.as_ref() {
                    return Ok(cached.clone());
                }
                let value = self.call_factory(container, key)?;
                *cache = Some(value.clone());
                trace!(key, "Singleton memoized");
                Ok(value)
            }
        }
    }

    fn call_factory(&self, container: &Container, key: &str) -> Result<Resolved> {
        match &self.factory {
            Some(factory) => factory(container),
            None => Err(ResolutionError::Unbound(key.to_string()).into()),
        }
    }
}

/// Weak handle to a container, bound under `container` by the kernel.
#[derive(Clone)]
pub struct ContainerRef(Weak<Container>);

impl ContainerRef {
    #[must_use]
    pub fn new(container: &Arc<Container>) -> Self {
        Self(Arc::downgrade(container))
    }

    #[must_use]
    pub fn upgrade(&self) -> Option<Arc<Container>> {
        self.0.upgrade()
    }
}

/// The dependency container.
#[derive(Default)]
pub struct Container {
    bindings: RwLock<HashMap<String, Arc<Binding>>>,
    aliases: RwLock<HashMap<String, String>>,
    registry: Option<Arc<ModuleRegistry>>,
}

impl Container {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A container that can auto-register classes from `registry`.
    #[must_use]
    pub fn with_registry(registry: Arc<ModuleRegistry>) -> Self {
        Self {
            registry: Some(registry),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn registry(&self) -> Option<&Arc<ModuleRegistry>> {
        self.registry.as_ref()
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register a constant.
    pub fn instance<T>(&self, key: &str, value: T, aliases: &[&str]) -> Result<()>
    where
        T: Send + Sync + 'static,
    {
        self.instance_any(key, Arc::new(value), aliases)
    }

    /// Register a constant trait object, retrievable with `make_as::<D>`.
    pub fn instance_arc<D>(&self, key: &str, value: Arc<D>, aliases: &[&str]) -> Result<()>
    where
        D: ?Sized + Send + Sync + 'static,
    {
        self.instance_any(key, erase_arc(value), aliases)
    }

    pub fn instance_any(&self, key: &str, value: Resolved, aliases: &[&str]) -> Result<()> {
        let binding = Binding {
            lifetime: Lifetime::Instance,
            factory: None,
            cache: Mutex::new(Some(value)),
            class: None,
        };
        self.insert(key, binding, aliases)
    }

    /// Register a factory invoked on every resolution.
    pub fn bind<T, F>(&self, key: &str, factory: F, aliases: &[&str]) -> Result<()>
    where
        T: Send + Sync + 'static,
        F: Fn(&Container) -> Result<T> + Send + Sync + 'static,
    {
        self.register(key, Lifetime::Factory, typed_factory(factory), None, aliases)
    }

    /// Register a factory invoked once, on first resolution.
    pub fn singleton<T, F>(&self, key: &str, factory: F, aliases: &[&str]) -> Result<()>
    where
        T: Send + Sync + 'static,
        F: Fn(&Container) -> Result<T> + Send + Sync + 'static,
    {
        self.register(key, Lifetime::Singleton, typed_factory(factory), None, aliases)
    }

    /// Register a class under `key` with the given lifetime.
    pub fn bind_class(
        &self,
        key: &str,
        class: &ClassRef,
        lifetime: Lifetime,
        aliases: &[&str],
    ) -> Result<()> {
        match lifetime {
            Lifetime::Instance => {
                let instance = class.instantiate(self)?;
                let binding = Binding {
                    lifetime,
                    factory: None,
                    cache: Mutex::new(Some(instance)),
                    class: Some(class.clone()),
                };
                self.insert(key, binding, aliases)
            }
            _ => self.register(key, lifetime, class.factory(), Some(class.clone()), aliases),
        }
    }

    /// Register a type-erased factory.
    pub fn register(
        &self,
        key: &str,
        lifetime: Lifetime,
        factory: Factory,
        class: Option<ClassRef>,
        aliases: &[&str],
    ) -> Result<()> {
        let binding = Binding {
            lifetime,
            factory: Some(factory),
            cache: Mutex::new(None),
            class,
        };
        self.insert(key, binding, aliases)
    }

    fn insert(&self, key: &str, binding: Binding, aliases: &[&str]) -> Result<()> {
        debug!(key, lifetime = ?binding.lifetime, "Binding registered");
        self.bindings
            .write()
            .insert(key.to_string(), Arc::new(binding));
        if aliases.is_empty() {
            return Ok(());
        }
        self.alias(key, aliases)
    }

    /// Register alternative names for `key`.
    pub fn alias(&self, key: &str, aliases: &[&str]) -> Result<()> {
        if let Some(alias) = aliases.iter().find(|a| **a == key) {
            return Err(AliasError::SelfAlias(alias.to_string()).into());
        }
        if !self.bound(key) {
            return Err(AliasError::Unbound(key.to_string()).into());
        }
        let target = self.get_alias(key);
        let mut table = self.aliases.write();
        for alias in aliases {
            table.insert(alias.to_string(), target.clone());
        }
        Ok(())
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Translate an alias to its canonical key. Unknown names map to themselves.
    #[must_use]
    pub fn get_alias(&self, key: &str) -> String {
        let table = self.aliases.read();
        let mut current = key;
        // Bounded by the table size so a cycle cannot loop forever.
        for _ in 0..=table.len() {
            match table.get(current) {
                Some(next) if next != current => current = next.as_str(),
                _ => break,
            }
        }
        current.to_string()
    }

    #[must_use]
    pub fn is_alias(&self, key: &str) -> bool {
        self.aliases.read().contains_key(key)
    }

    /// Alias-transparent membership test.
    #[must_use]
    pub fn bound(&self, key: &str) -> bool {
        self.bindings.read().contains_key(&self.get_alias(key))
    }

    #[must_use]
    pub fn lifetime(&self, key: &str) -> Option<Lifetime> {
        self.binding(key).map(|b| b.lifetime)
    }

    /// The class registered under `key`, if it was bound from one.
    #[must_use]
    pub fn class_for(&self, key: &str) -> Option<ClassRef> {
        self.binding(key).and_then(|b| b.class.clone())
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.bindings.read().keys().cloned().collect()
    }

    fn binding(&self, key: &str) -> Option<Arc<Binding>> {
        self.bindings.read().get(&self.get_alias(key)).cloned()
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Produce the value bound to `key`.
    pub fn make_any(&self, key: &str) -> Result<Resolved> {
        let canonical = self.get_alias(key);
        let binding = self
            .binding(&canonical)
            .ok_or_else(|| ResolutionError::Unbound(key.to_string()))?;
        binding.produce(self, &canonical)
    }

    /// Produce the value bound to `key` as concrete type `T`.
    pub fn make<T: Send + Sync + 'static>(&self, key: &str) -> Result<Arc<T>> {
        let resolved = self.make_any(key)?;
        self.downcast::<T>(key, resolved)
    }

    /// Produce the value bound to `key` as trait object `D`.
    pub fn make_as<D: ?Sized + Send + Sync + 'static>(&self, key: &str) -> Result<Arc<D>> {
        let resolved = self.make_any(key)?;
        self.cast::<D>(key, &resolved).ok_or_else(|| mismatch::<D>(key))
    }

    /// Like `make_any`, but auto-registers unknown classes from the module
    /// registry as singletons first.
    pub fn resolve_any(&self, key: &str) -> Result<Resolved> {
        if self.bound(key) {
            return self.make_any(key);
        }
        match self.registry.as_ref().and_then(|r| r.get(key)) {
            Some(class) => self.resolve_class(&class),
            None => Err(ResolutionError::Unbound(key.to_string()).into()),
        }
    }

    /// Make `class`, registering it as a singleton under its name if needed.
    pub fn resolve_class(&self, class: &ClassRef) -> Result<Resolved> {
        if !self.bound(class.name()) {
            debug!(class = class.name(), "Auto-registering class as singleton");
            self.bind_class(class.name(), class, Lifetime::Singleton, &[])?;
        }
        self.make_any(class.name())
    }

    pub fn resolve<T: Send + Sync + 'static>(&self, key: &str) -> Result<Arc<T>> {
        let resolved = self.resolve_any(key)?;
        self.downcast::<T>(key, resolved)
    }

    pub fn resolve_as<D: ?Sized + Send + Sync + 'static>(&self, key: &str) -> Result<Arc<D>> {
        let resolved = self.resolve_any(key)?;
        self.cast::<D>(key, &resolved).ok_or_else(|| mismatch::<D>(key))
    }

    pub fn resolve_class_as<D: ?Sized + Send + Sync + 'static>(
        &self,
        class: &ClassRef,
    ) -> Result<Arc<D>> {
        let resolved = self.resolve_class(class)?;
        class
            .cast::<D>(&resolved)
            .ok_or_else(|| mismatch::<D>(class.name()))
    }

    /// View a value produced for `key` as `D`, using the binding's class
    /// capabilities when the value is not stored as `Arc<D>` directly.
    pub fn cast<D: ?Sized + Send + Sync + 'static>(
        &self,
        key: &str,
        resolved: &Resolved,
    ) -> Option<Arc<D>> {
        downcast_arc::<D>(resolved).or_else(|| {
            self.class_for(key)
                .or_else(|| self.registry.as_ref().and_then(|r| r.get(key)))
                .and_then(|class| class.cast::<D>(resolved))
        })
    }

    fn downcast<T: Send + Sync + 'static>(&self, key: &str, resolved: Resolved) -> Result<Arc<T>> {
        match resolved.downcast::<T>() {
            Ok(value) => Ok(value),
            Err(resolved) => downcast_arc::<T>(&resolved).ok_or_else(|| mismatch::<T>(key)),
        }
    }
}

fn typed_factory<T, F>(factory: F) -> Factory
where
    T: Send + Sync + 'static,
    F: Fn(&Container) -> Result<T> + Send + Sync + 'static,
{
    Arc::new(move |container: &Container| -> Result<Resolved> {
        Ok(Arc::new(factory(container)?))
    })
}

fn mismatch<D: ?Sized>(key: &str) -> StoneError {
    ResolutionError::TypeMismatch {
        key: key.to_string(),
        expected: type_name::<D>().to_string(),
    }
    .into()
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("bindings", &self.bindings.read().len())
            .field("aliases", &*self.aliases.read())
            .finish_non_exhaustive()
    }
}
