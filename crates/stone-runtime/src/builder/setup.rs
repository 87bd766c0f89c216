//! # Builtin Setup Middleware
//!
//! Builder stages that translate class metadata into `stone.kernel.*` and
//! `stone.adapter.*` entries. They run in this order:
//!
//! | Priority | Stage | Writes |
//! |----------|-------|--------|
//! | 0 | main handler | `kernel.handler`, `kernel.providers` |
//! | 0.1 | adapter handler factory | `adapter.<name>.handlerFactory` |
//! | 0.5 | providers | `kernel.providers` |
//! | 0.55 | adapter init hooks | `adapter.<name>.hooks.onInit` |
//! | 0.6 | services, listeners, subscribers | `kernel.services`, `kernel.listeners.<event>`, `kernel.subscribers` |
//! | 0.7 | kernel middleware, error handler, logger | `kernel.middleware.*`, `kernel.errorHandler`, `logger` |
//! | 0.8 | adapter middleware, error handler | `adapter.<name>.middleware`, `adapter.<name>.errorHandler` |

use super::BlueprintContext;
use crate::adapter::KERNEL_HANDLER_FACTORY;
use crate::decorators::{
    AdapterErrorHandlerOptions, AdapterMiddlewareOptions, KernelMiddlewareOptions,
    ListenerOptions, ADAPTER_ERROR_HANDLER, ADAPTER_MIDDLEWARE, KERNEL_ERROR_HANDLER,
    KERNEL_MIDDLEWARE, LISTENER, LOGGER, PROVIDER, SERVICE, STONE_APP, SUBSCRIBER,
};
use crate::kernel::Provider;
use serde_json::{json, Value};
use stone_core::{ClassRef, ConfigStore, Middleware, Next};
use stone_types::{Result, StoneError};
use tracing::debug;

type SetupFn = fn(&mut BlueprintContext) -> Result<()>;

/// One builtin stage: edits the context, then continues.
struct SetupMiddleware {
    apply: SetupFn,
}

impl Middleware<BlueprintContext> for SetupMiddleware {
    fn handle(
        &self,
        mut context: BlueprintContext,
        next: Next<'_, BlueprintContext, BlueprintContext>,
        _params: Option<&Value>,
    ) -> Result<BlueprintContext> {
        (self.apply)(&mut context)?;
        next.run(context)
    }
}

const BUILTINS: [(&str, f64, SetupFn); 12] = [
    ("stone.setup.MainHandler", 0.0, main_handler),
    ("stone.setup.AdapterHandlerFactory", 0.1, adapter_handler_factory),
    ("stone.setup.Providers", 0.5, providers),
    ("stone.setup.AdapterInitHooks", 0.55, adapter_init_hooks),
    ("stone.setup.Services", 0.6, services),
    ("stone.setup.Listeners", 0.6, listeners),
    ("stone.setup.Subscribers", 0.6, subscribers),
    ("stone.setup.KernelMiddleware", 0.7, kernel_middleware),
    ("stone.setup.KernelErrorHandler", 0.7, kernel_error_handler),
    ("stone.setup.Logger", 0.7, logger),
    ("stone.setup.AdapterMiddleware", 0.8, adapter_middleware),
    ("stone.setup.AdapterErrorHandler", 0.8, adapter_error_handler),
];

/// Classes the builder registers so the names in `builtin_pipes` resolve.
#[must_use]
pub fn builtin_classes() -> Vec<ClassRef> {
    BUILTINS
        .iter()
        .map(|&(name, _, apply)| {
            ClassRef::builder(name, move |_| Ok(SetupMiddleware { apply }))
                .implements::<dyn Middleware<BlueprintContext>>(|c| c)
                .build()
        })
        .collect()
}

/// `stone.builder.middleware` entries for the builtin stages.
#[must_use]
pub fn builtin_pipes() -> Value {
    Value::Array(
        BUILTINS
            .iter()
            .map(|&(name, priority, _)| json!({ "pipe": name, "priority": priority }))
            .collect(),
    )
}

// =============================================================================
// Helpers
// =============================================================================

/// Append `names` to the list at `path`, skipping names already present.
fn add_names(blueprint: &mut ConfigStore, path: &str, names: Vec<String>) {
    let existing: Vec<Value> = blueprint.get(path, Vec::new());
    let fresh: Vec<Value> = names
        .into_iter()
        .map(Value::String)
        .filter(|name| !existing.contains(name))
        .collect();
    blueprint.add(path, Value::Array(fresh));
}

fn names(classes: &[ClassRef]) -> Vec<String> {
    classes.iter().map(|c| c.name().to_string()).collect()
}

/// Configured adapters as `(name, alias)`.
fn adapters(blueprint: &ConfigStore) -> Vec<(String, Option<String>)> {
    blueprint
        .get_value("stone.adapter")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .map(|(name, options)| {
                    let alias = options
                        .get("alias")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    (name.clone(), alias)
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Whether an adapter-scoped option targets `name` or its alias.
fn targets(wanted: Option<&str>, name: &str, alias: Option<&str>) -> bool {
    match wanted {
        None => true,
        Some(wanted) => wanted == name || Some(wanted) == alias,
    }
}

fn pipe_entry(class: &ClassRef, priority: Option<f64>) -> Value {
    match priority {
        Some(priority) => json!({ "pipe": class.name(), "priority": priority }),
        None => json!(class.name()),
    }
}

// =============================================================================
// Stages
// =============================================================================

fn main_handler(context: &mut BlueprintContext) -> Result<()> {
    let Some(app) = context.tagged(STONE_APP).into_iter().next() else {
        return Ok(());
    };
    debug!(handler = app.name(), "Main handler selected");
    context.blueprint.set("stone.kernel.handler", app.name());
    if app.implements::<dyn Provider>() {
        add_names(
            &mut context.blueprint,
            "stone.kernel.providers",
            vec![app.name().to_string()],
        );
    }
    Ok(())
}

fn adapter_handler_factory(context: &mut BlueprintContext) -> Result<()> {
    for (name, _) in adapters(&context.blueprint) {
        let path = format!("stone.adapter.{name}.handlerFactory");
        if !context.blueprint.has(&path) {
            context.blueprint.set(&path, KERNEL_HANDLER_FACTORY);
        }
    }
    Ok(())
}

fn providers(context: &mut BlueprintContext) -> Result<()> {
    let found = names(&context.tagged(PROVIDER));
    add_names(&mut context.blueprint, "stone.kernel.providers", found);
    Ok(())
}

fn adapter_init_hooks(context: &mut BlueprintContext) -> Result<()> {
    let providers: Vec<String> = context.blueprint.get("stone.kernel.providers", Vec::new());
    for (name, _) in adapters(&context.blueprint) {
        let path = format!("stone.adapter.{name}.hooks.onInit");
        add_names(&mut context.blueprint, &path, providers.clone());
    }
    Ok(())
}

fn services(context: &mut BlueprintContext) -> Result<()> {
    let found = names(&context.tagged(SERVICE));
    add_names(&mut context.blueprint, "stone.kernel.services", found);
    Ok(())
}

fn listeners(context: &mut BlueprintContext) -> Result<()> {
    for class in context.tagged(LISTENER) {
        let options: ListenerOptions = class.get_meta(LISTENER, ListenerOptions::default());
        if options.event.is_empty() {
            return Err(StoneError::configuration(format!(
                "Listener '{}' does not name an event",
                class.name()
            )));
        }
        let path = format!("stone.kernel.listeners.{}", options.event);
        add_names(&mut context.blueprint, &path, vec![class.name().to_string()]);
    }
    Ok(())
}

fn subscribers(context: &mut BlueprintContext) -> Result<()> {
    let found = names(&context.tagged(SUBSCRIBER));
    add_names(&mut context.blueprint, "stone.kernel.subscribers", found);
    Ok(())
}

fn kernel_middleware(context: &mut BlueprintContext) -> Result<()> {
    let (mut incoming, mut outgoing, mut terminate) = (Vec::new(), Vec::new(), Vec::new());
    for class in context.tagged(KERNEL_MIDDLEWARE) {
        let options: KernelMiddlewareOptions =
            class.get_meta(KERNEL_MIDDLEWARE, KernelMiddlewareOptions::default());
        let entry = pipe_entry(&class, options.priority);
        if options.outgoing {
            outgoing.push(entry.clone());
        }
        if options.terminate {
            terminate.push(entry.clone());
        }
        if !options.outgoing && !options.terminate {
            incoming.push(entry);
        }
    }

    let blueprint = &mut context.blueprint;
    blueprint.add("stone.kernel.middleware.incoming", Value::Array(incoming));
    blueprint.add("stone.kernel.middleware.outgoing", Value::Array(outgoing));
    blueprint.add("stone.kernel.middleware.terminate", Value::Array(terminate));
    Ok(())
}

fn kernel_error_handler(context: &mut BlueprintContext) -> Result<()> {
    if let Some(handler) = context.tagged(KERNEL_ERROR_HANDLER).into_iter().next() {
        context.blueprint.set("stone.kernel.errorHandler", handler.name());
    }
    Ok(())
}

fn logger(context: &mut BlueprintContext) -> Result<()> {
    if let Some(logger) = context.tagged(LOGGER).into_iter().next() {
        context.blueprint.set("stone.logger", logger.name());
    }
    Ok(())
}

fn adapter_middleware(context: &mut BlueprintContext) -> Result<()> {
    let middleware: Vec<(ClassRef, AdapterMiddlewareOptions)> = context
        .tagged(ADAPTER_MIDDLEWARE)
        .into_iter()
        .map(|class| {
            let options = class.get_meta(ADAPTER_MIDDLEWARE, AdapterMiddlewareOptions::default());
            (class, options)
        })
        .collect();

    for (name, alias) in adapters(&context.blueprint) {
        let (mut incoming, mut outgoing) = (Vec::new(), Vec::new());
        for (class, options) in &middleware {
            if !targets(options.adapter.as_deref(), &name, alias.as_deref()) {
                continue;
            }
            let entry = pipe_entry(class, options.priority);
            if options.outgoing {
                outgoing.push(entry);
            } else {
                incoming.push(entry);
            }
        }
        let blueprint = &mut context.blueprint;
        blueprint.add(
            &format!("stone.adapter.{name}.middleware.incoming"),
            Value::Array(incoming),
        );
        blueprint.add(
            &format!("stone.adapter.{name}.middleware.outgoing"),
            Value::Array(outgoing),
        );
    }
    Ok(())
}

fn adapter_error_handler(context: &mut BlueprintContext) -> Result<()> {
    let handlers = context.tagged(ADAPTER_ERROR_HANDLER);
    for (name, alias) in adapters(&context.blueprint) {
        let found = handlers.iter().find(|class| {
            let options: AdapterErrorHandlerOptions =
                class.get_meta(ADAPTER_ERROR_HANDLER, AdapterErrorHandlerOptions::default());
            targets(options.adapter.as_deref(), &name, alias.as_deref())
        });
        if let Some(handler) = found {
            context
                .blueprint
                .set(&format!("stone.adapter.{name}.errorHandler"), handler.name());
        }
    }
    Ok(())
}
