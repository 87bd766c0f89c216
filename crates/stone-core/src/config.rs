//! # Config Store and Blueprint
//!
//! `ConfigStore` is a typed accessor over a nested JSON mapping addressed by
//! dotted paths. `Blueprint` is the shared handle the kernel and adapters
//! read once the builder pipeline has finished.
//!
//! ## `add` keeps what is already there
//!
//! ```text
//!   {a: {x: 1}}  add("a", {y: 2})  ->  {a: {x: 1, y: 2}}
//!   {a: {x: 1}}  add("a", {x: 9})  ->  {a: {x: 1}}
//!   {a: [1]}     add("a", [2])     ->  {a: [1, 2]}
//! ```

use crate::metadata::{ClassRef, ModuleRegistry};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use stone_types::{deep_merge, get_path, has_path, set_path, MergeStrategy, Result, StoneError};

/// Hierarchical configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConfigStore {
    items: Value,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self {
            items: Value::Object(Map::new()),
        }
    }
}

impl ConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap an existing tree. The root must be an object.
    pub fn from_value(items: Value) -> Result<Self> {
        match items {
            Value::Object(_) => Ok(Self { items }),
            Value::Null => Ok(Self::default()),
            other => Err(StoneError::configuration(format!(
                "Configuration root must be an object, got {other}"
            ))),
        }
    }

    /// Value at `path` deserialized into `T`, or `fallback` when the path is
    /// unset, null, or of another shape.
    pub fn get<T: DeserializeOwned>(&self, path: &str, fallback: T) -> T {
        self.try_get(path).ok().flatten().unwrap_or(fallback)
    }

    /// Value at `path` deserialized into `T`. Shape errors are reported.
    pub fn try_get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        match self.get_value(path) {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| StoneError::configuration(format!("Invalid value at '{path}': {e}"))),
            None => Ok(None),
        }
    }

    /// Raw value at `path`, ignoring nulls.
    #[must_use]
    pub fn get_value(&self, path: &str) -> Option<&Value> {
        get_path(&self.items, path).filter(|v| !v.is_null())
    }

    #[must_use]
    pub fn has(&self, path: &str) -> bool {
        has_path(&self.items, path)
    }

    /// Replace the value at `path`.
    pub fn set(&mut self, path: &str, value: impl Into<Value>) -> &mut Self {
        set_path(&mut self.items, path, value.into());
        self
    }

    /// Merge `value` into whatever is at `path`; existing scalars win and
    /// arrays are appended to. Behaves as `set` when the path is unset.
    pub fn add(&mut self, path: &str, value: impl Into<Value>) -> &mut Self {
        let value = value.into();
        match get_path(&self.items, path) {
            Some(existing) if !existing.is_null() => {
                let mut merged = existing.clone();
                deep_merge(&mut merged, value, MergeStrategy::TargetWins);
                set_path(&mut self.items, path, merged);
            }
            _ => set_path(&mut self.items, path, value),
        }
        self
    }

    /// Values for several paths at once, keyed by path. Unset paths map to null.
    #[must_use]
    pub fn get_many(&self, paths: &[&str]) -> Map<String, Value> {
        paths
            .iter()
            .map(|p| (p.to_string(), self.get_value(p).cloned().unwrap_or(Value::Null)))
            .collect()
    }

    #[must_use]
    pub fn all(&self) -> &Value {
        &self.items
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        self.items
    }

    pub fn clear(&mut self) -> &mut Self {
        self.items = Value::Object(Map::new());
        self
    }
}

/// The finished configuration plus the classes it refers to by name.
///
/// Cloning is cheap and every clone sees the same store. Consumers treat it
/// as read-only once the builder returns it.
#[derive(Clone)]
pub struct Blueprint {
    config: Arc<RwLock<ConfigStore>>,
    modules: Arc<ModuleRegistry>,
}

impl Blueprint {
    #[must_use]
    pub fn new(config: ConfigStore, modules: Arc<ModuleRegistry>) -> Self {
        Self {
            config: Arc::new(RwLock::new(config)),
            modules,
        }
    }

    pub fn get<T: DeserializeOwned>(&self, path: &str, fallback: T) -> T {
        self.config.read().get(path, fallback)
    }

    pub fn try_get<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        self.config.read().try_get(path)
    }

    #[must_use]
    pub fn get_value(&self, path: &str) -> Option<Value> {
        self.config.read().get_value(path).cloned()
    }

    #[must_use]
    pub fn has(&self, path: &str) -> bool {
        self.config.read().has(path)
    }

    pub fn set(&self, path: &str, value: impl Into<Value>) {
        self.config.write().set(path, value);
    }

    pub fn add(&self, path: &str, value: impl Into<Value>) {
        self.config.write().add(path, value);
    }

    #[must_use]
    pub fn get_many(&self, paths: &[&str]) -> Map<String, Value> {
        self.config.read().get_many(paths)
    }

    /// Copy of the whole tree.
    #[must_use]
    pub fn all(&self) -> Value {
        self.config.read().all().clone()
    }

    #[must_use]
    pub fn modules(&self) -> &Arc<ModuleRegistry> {
        &self.modules
    }

    /// Class referenced by name in the configuration.
    #[must_use]
    pub fn class(&self, name: &str) -> Option<ClassRef> {
        self.modules.get(name)
    }

    /// Class named by the string at `path`, if both exist.
    pub fn class_at(&self, path: &str) -> Result<Option<ClassRef>> {
        match self.try_get::<String>(path)? {
            Some(name) => self.modules.require(&name).map(Some),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for Blueprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blueprint")
            .field("config", &*self.config.read())
            .field("modules", &self.modules)
            .finish()
    }
}
