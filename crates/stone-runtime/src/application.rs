//! Application entry point.
//!
//! Builds the blueprint from the registered modules, picks one adapter under
//! `stone.adapter` and runs it. Selection order: the first adapter marked
//! `preferred`, else `current`, else `default`.

use crate::adapter::Adapter;
use crate::builder::BlueprintBuilder;
use crate::keys;
use serde_json::{Map, Value};
use stone_core::{Blueprint, Container, Module};
use stone_types::{Result, StoneError};
use tracing::info;

#[derive(Debug, Default)]
pub struct StoneApplication {
    builder: BlueprintBuilder,
}

impl StoneApplication {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn module(mut self, module: impl Into<Module>) -> Self {
        self.builder = self.builder.module(module);
        self
    }

    #[must_use]
    pub fn modules<I, M>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<Module>,
    {
        self.builder = self.builder.modules(modules);
        self
    }

    pub fn blueprint(&self) -> Result<Blueprint> {
        self.builder.build()
    }

    /// Build the blueprint, then construct and run the selected adapter.
    pub async fn run(&self) -> Result<Value> {
        let blueprint = self.blueprint()?;
        let (name, class) = select_adapter(&blueprint)?;

        let container = Container::with_registry(blueprint.modules().clone());
        container.instance(keys::BLUEPRINT, blueprint.clone(), &keys::BLUEPRINT_ALIASES)?;
        let adapter = container.resolve_as::<dyn Adapter>(&class)?;

        info!(
            app = %blueprint.get("stone.name", String::new()),
            env = %blueprint.get("stone.env", String::new()),
            adapter = %name,
            "Starting application"
        );
        adapter.run().await
    }
}

/// `(key, type)` of the adapter to run.
fn select_adapter(blueprint: &Blueprint) -> Result<(String, String)> {
    let adapters: Map<String, Value> = blueprint.get("stone.adapter", Map::new());
    let flagged = |flag: &str| {
        adapters
            .iter()
            .find(|(_, options)| options.get(flag).and_then(Value::as_bool).unwrap_or(false))
    };

    let (name, options) = flagged("preferred")
        .or_else(|| flagged("current"))
        .or_else(|| flagged("default"))
        .ok_or_else(|| StoneError::configuration("No adapters provided"))?;

    let class = options
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| StoneError::configuration(format!("Adapter '{name}' has no type")))?;
    Ok((name.clone(), class.to_string()))
}
