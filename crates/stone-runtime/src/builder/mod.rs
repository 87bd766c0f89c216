//! # Blueprint Builder
//!
//! Assembles the blueprint from the registered modules.
//!
//! ```text
//!   base layer        setup defaults + config-middleware classes
//!        │  merge (right wins, arrays concatenate)
//!   declarative       every class's blueprint fragments
//!        │  merge
//!   imperative        configuration classes, serialized
//!        ▼
//!   ConfigStore ──► builder pipeline (stone.builder.middleware) ──► Blueprint
//! ```
//!
//! Builder stages receive a `BlueprintContext` and edit its store in place
//! with `set` / `add`; later stages see earlier edits.

pub mod blueprints;
pub mod setup;

use crate::decorators::{CONFIGURATION, CONFIG_MIDDLEWARE};
use serde_json::{json, Value};
use std::sync::Arc;
use stone_core::{
    Blueprint, ClassRef, ConfigStore, Container, Module, ModuleRegistry, PipeDefinition,
    Pipeline, DEFAULT_PRIORITY,
};
use stone_types::{merge_all, Result, StoneError};
use tracing::{debug, info};

/// A class whose instances are a configuration layer.
pub trait ConfigurationSource: Send + Sync {
    fn to_blueprint(&self) -> Result<Value>;
}

impl<T: serde::Serialize + Send + Sync> ConfigurationSource for T {
    fn to_blueprint(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// The passable of the builder pipeline.
#[derive(Debug, Clone)]
pub struct BlueprintContext {
    pub blueprint: ConfigStore,
    pub modules: Vec<Module>,
}

impl BlueprintContext {
    /// Classes carrying metadata under `key`, in declaration order.
    #[must_use]
    pub fn tagged(&self, key: &str) -> Vec<ClassRef> {
        self.classes().filter(|c| c.has_meta(key)).cloned().collect()
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassRef> {
        self.modules.iter().filter_map(|m| match m {
            Module::Class(class) => Some(class),
            Module::Value(_) => None,
        })
    }
}

/// Builds a `Blueprint` from modules.
#[derive(Debug, Default)]
pub struct BlueprintBuilder {
    modules: Vec<Module>,
}

impl BlueprintBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn module(mut self, module: impl Into<Module>) -> Self {
        self.modules.push(module.into());
        self
    }

    #[must_use]
    pub fn modules<I, M>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = M>,
        M: Into<Module>,
    {
        self.modules.extend(modules.into_iter().map(Into::into));
        self
    }

    fn classes(&self) -> impl Iterator<Item = &ClassRef> {
        self.modules.iter().filter_map(|m| match m {
            Module::Class(class) => Some(class),
            Module::Value(_) => None,
        })
    }

    /// Config-middleware classes followed by the fixed base tree.
    fn setup_layer(&self) -> Vec<Value> {
        self.classes()
            .filter(|c| c.has_meta(CONFIG_MIDDLEWARE))
            .map(|c| json!({ "stone": { "builder": { "middleware": [c.name()] } } }))
            .chain(std::iter::once(blueprints::setup_blueprint()))
            .collect()
    }

    fn declarative_layer(&self) -> Vec<Value> {
        self.classes()
            .filter(|c| c.has_blueprints())
            .flat_map(ClassRef::blueprints)
            .collect()
    }

    fn imperative_layer(&self) -> Result<Vec<Value>> {
        self.classes()
            .filter(|c| c.has_meta(CONFIGURATION))
            .map(|class| {
                let instance = class.construct()?;
                let source = class
                    .cast::<dyn ConfigurationSource>(&instance)
                    .ok_or_else(|| {
                        StoneError::type_error(format!(
                            "Configuration class '{}' cannot be serialized",
                            class.name()
                        ))
                    })?;
                source.to_blueprint()
            })
            .collect()
    }

    /// Registry holding every declared class plus the builtin setup stages.
    fn registry(&self) -> Arc<ModuleRegistry> {
        let registry = ModuleRegistry::new();
        for class in setup::builtin_classes() {
            registry.register(class);
        }
        for class in self.classes() {
            registry.register(class.clone());
        }
        Arc::new(registry)
    }

    /// Merge the layers into one store, before the builder pipeline runs.
    pub fn merged(&self) -> Result<ConfigStore> {
        let layers = self
            .setup_layer()
            .into_iter()
            .chain(self.declarative_layer())
            .chain(self.imperative_layer()?);
        ConfigStore::from_value(merge_all(layers))
    }

    pub fn build(&self) -> Result<Blueprint> {
        let store = self.merged()?;
        let registry = self.registry();

        let entries: Vec<Value> = store.get("stone.builder.middleware", Vec::new());
        let pipes = PipeDefinition::<BlueprintContext>::list_from_config(&entries)?;
        let priority = store.get("stone.builder.defaultMiddlewarePriority", DEFAULT_PRIORITY);
        debug!(stages = pipes.len(), priority, "Running builder pipeline");

        let context = BlueprintContext {
            blueprint: store,
            modules: self.modules.clone(),
        };
        let container = Arc::new(Container::with_registry(registry.clone()));
        let context = Pipeline::with_container(container)
            .default_priority(priority)
            .through(pipes)
            .send(context)
            .then_return()?;

        info!(classes = registry.len(), "Blueprint built");
        Ok(Blueprint::new(context.blueprint, registry))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decorators::{AppOptions, Decorate, KernelMiddlewareOptions};
    use serde::Serialize;
    use stone_core::{Middleware, Next};

    #[derive(Default)]
    struct App;

    #[derive(Default)]
    struct Plain;

    #[derive(Default, Serialize)]
    struct AppConfig {
        stone: ConfigStone,
    }

    #[derive(Serialize)]
    struct ConfigStone {
        name: String,
        debug: bool,
    }

    impl Default for ConfigStone {
        fn default() -> Self {
            Self {
                name: "from-config".into(),
                debug: true,
            }
        }
    }

    struct Mark;

    impl Middleware<BlueprintContext> for Mark {
        fn handle(
            &self,
            mut context: BlueprintContext,
            next: Next<'_, BlueprintContext, BlueprintContext>,
            _: Option<&Value>,
        ) -> Result<BlueprintContext> {
            let seen = context.blueprint.get("stone.kernel.handler", String::new());
            context.blueprint.set("custom.seenHandler", seen);
            next.run(context)
        }
    }

    fn app() -> ClassRef {
        ClassRef::of_default::<App>("App")
            .stone_app(AppOptions {
                name: Some("orders".into()),
                ..AppOptions::default()
            })
            .build()
    }

    #[test]
    fn test_base_layer_only() {
        let blueprint = BlueprintBuilder::new().build().unwrap();
        assert_eq!(blueprint.get("stone.env", String::new()), "production");
        assert!(!blueprint.get("stone.debug", true));
        assert!(!blueprint.has("stone.kernel"));
    }

    #[test]
    fn test_values_ignored() {
        let blueprint = BlueprintBuilder::new()
            .module(json!({"stone": {"env": "test"}}))
            .build()
            .unwrap();
        assert_eq!(blueprint.get("stone.env", String::new()), "production");
    }

    #[test]
    fn test_app_runs_builtin_setup() {
        let auth = ClassRef::of_default::<Plain>("Auth")
            .kernel_middleware(KernelMiddlewareOptions::default())
            .build();
        let blueprint = BlueprintBuilder::new()
            .module(app())
            .module(auth)
            .build()
            .unwrap();

        assert_eq!(blueprint.get("stone.name", String::new()), "orders");
        assert_eq!(blueprint.get("stone.kernel.handler", String::new()), "App");
        assert_eq!(
            blueprint.get_value("stone.kernel.middleware.incoming"),
            Some(json!(["Auth"]))
        );
        assert!(blueprint.class("Auth").is_some());
    }

    #[test]
    fn test_imperative_layer_wins_over_declarative() {
        let config = ClassRef::of_default::<AppConfig>("AppConfig")
            .configuration()
            .build();
        let blueprint = BlueprintBuilder::new()
            .modules([app(), config])
            .build()
            .unwrap();

        assert_eq!(blueprint.get("stone.name", String::new()), "from-config");
        assert!(blueprint.get("stone.debug", false));
    }

    #[test]
    fn test_config_middleware_sees_earlier_stages() {
        let mark = ClassRef::builder("Mark", |_| Ok(Mark))
            .config_middleware()
            .build();
        let blueprint = BlueprintBuilder::new()
            .modules([app(), mark])
            .build()
            .unwrap();

        // default priority 10 runs after every builtin stage
        assert_eq!(blueprint.get("custom.seenHandler", String::new()), "App");
    }

    #[test]
    fn test_unknown_builder_stage_fails() {
        let broken = ClassRef::of_default::<Plain>("Broken")
            .compose(json!({"stone": {"builder": {"middleware": ["Nowhere"]}}}), json!({}))
            .build();
        let err = BlueprintBuilder::new().module(broken).build().unwrap_err();
        assert!(matches!(err, StoneError::Resolution(_)));
    }
}
