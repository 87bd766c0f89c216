//! The provider every kernel registers first.
//!
//! `register` binds what the blueprint declares: services, listeners, the
//! logger and extra aliases. `boot` lets subscribers attach to the emitter.

use super::{KernelEvent, Provider, Subscriber};
use crate::decorators::{LoggerOptions, ServiceOptions, LOGGER, SERVICE};
use crate::keys;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::marker::PhantomData;
use std::sync::Arc;
use stone_bus::{EventEmitter, EventListener};
use stone_core::{Blueprint, Container, ContainerRef, Lifetime};
use stone_types::Result;
use tracing::{debug, warn};

/// Registry name of the core provider.
pub const CORE_PROVIDER: &str = "stone.CoreServiceProvider";

pub struct CoreServiceProvider<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    container: Arc<Container>,
    blueprint: Blueprint,
    emitter: Arc<EventEmitter<KernelEvent<I, O>>>,
}

impl<I, O> CoreServiceProvider<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    pub fn new(
        container: Arc<Container>,
        blueprint: Blueprint,
        emitter: Arc<EventEmitter<KernelEvent<I, O>>>,
    ) -> Self {
        Self {
            container,
            blueprint,
            emitter,
        }
    }

    fn register_services(&self) -> Result<()> {
        let services: Vec<String> = self.blueprint.get("stone.kernel.services", Vec::new());
        for name in services {
            let class = self.blueprint.modules().require(&name)?;
            let options: ServiceOptions = class.get_meta(SERVICE, ServiceOptions::default());
            let lifetime = if options.singleton {
                Lifetime::Singleton
            } else {
                Lifetime::Factory
            };
            let aliases: Vec<&str> = options.alias.iter().map(String::as_str).collect();
            self.container
                .bind_class(class.name(), &class, lifetime, &aliases)?;
            debug!(service = %name, ?lifetime, "Service bound");
        }
        Ok(())
    }

    fn register_listeners(&self) -> Result<()> {
        let listeners: BTreeMap<String, Vec<String>> =
            self.blueprint.get("stone.kernel.listeners", BTreeMap::new());
        for (event, names) in listeners {
            for name in names {
                let listener = ContainerListener::<I, O> {
                    container: ContainerRef::new(&self.container),
                    name,
                    _event: PhantomData,
                };
                self.emitter.on(event.clone(), Arc::new(listener));
            }
        }
        Ok(())
    }

    fn register_logger(&self) -> Result<()> {
        let Some(class) = self.blueprint.class_at("stone.logger")? else {
            return Ok(());
        };
        let options: LoggerOptions = class.get_meta(LOGGER, LoggerOptions::default());
        let aliases: Vec<&str> = std::iter::once(keys::LOGGER)
            .chain(options.alias.iter().map(String::as_str))
            .filter(|alias| *alias != class.name())
            .collect();
        self.container
            .bind_class(class.name(), &class, Lifetime::Singleton, &aliases)
    }

    fn register_aliases(&self) -> Result<()> {
        let aliases: BTreeMap<String, String> =
            self.blueprint.get("stone.kernel.aliases", BTreeMap::new());
        for (alias, key) in aliases {
            self.container.alias(&key, &[alias.as_str()])?;
        }
        Ok(())
    }
}

#[async_trait]
impl<I, O> Provider for CoreServiceProvider<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    async fn register(&self) -> Result<()> {
        self.register_services()?;
        self.register_listeners()?;
        self.register_logger()?;
        self.register_aliases()
    }

    async fn boot(&self) -> Result<()> {
        let subscribers: Vec<String> = self.blueprint.get("stone.kernel.subscribers", Vec::new());
        for name in subscribers {
            let subscriber = self
                .container
                .resolve_as::<dyn Subscriber<KernelEvent<I, O>>>(&name)?;
            subscriber.subscribe(&self.emitter).await?;
            debug!(subscriber = %name, "Subscriber attached");
        }
        Ok(())
    }
}

/// Resolves the named listener from the container each time the event fires.
struct ContainerListener<I, O> {
    container: ContainerRef,
    name: String,
    _event: PhantomData<fn() -> (I, O)>,
}

#[async_trait]
impl<I, O> EventListener<KernelEvent<I, O>> for ContainerListener<I, O>
where
    I: Clone + Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    async fn handle(&self, event: &KernelEvent<I, O>) -> Result<()> {
        let Some(container) = self.container.upgrade() else {
            warn!(listener = %self.name, "Container dropped before listener ran");
            return Ok(());
        };
        let listener = container.resolve_as::<dyn EventListener<KernelEvent<I, O>>>(&self.name)?;
        listener.handle(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decorators::{Decorate, ListenerOptions};
    use crate::kernel::KernelContext;
    use parking_lot::Mutex;
    use serde_json::json;
    use stone_core::{ClassRef, ConfigStore, ModuleRegistry};
    use stone_telemetry::{LogLevel, Logger};
    use stone_types::LifecycleEvent;

    type Event = KernelEvent<u32, u32>;

    #[derive(Default)]
    struct Users;

    #[derive(Default)]
    struct Quiet;

    impl Logger for Quiet {
        fn log(&self, _: LogLevel, _: &str) {}
    }

    static SEEN: Mutex<Vec<String>> = parking_lot::const_mutex(Vec::new());

    #[derive(Default)]
    struct Audit;

    #[async_trait]
    impl EventListener<Event> for Audit {
        async fn handle(&self, event: &Event) -> Result<()> {
            SEEN.lock().push(format!("{}:{}", event.kind, event.context.outgoing));
            Ok(())
        }
    }

    #[derive(Default)]
    struct Metrics;

    #[async_trait]
    impl Subscriber<Event> for Metrics {
        async fn subscribe(&self, emitter: &EventEmitter<Event>) -> Result<()> {
            emitter.on_fn("metrics", |_event: &Event| Ok(()));
            Ok(())
        }
    }

    fn provider(config: serde_json::Value, classes: Vec<ClassRef>) -> (CoreServiceProvider<u32, u32>, Arc<Container>) {
        let registry = Arc::new(ModuleRegistry::new());
        for class in classes {
            registry.register(class);
        }
        let blueprint = Blueprint::new(ConfigStore::from_value(config).unwrap(), registry.clone());
        let container = Arc::new(Container::with_registry(registry));
        let emitter = Arc::new(EventEmitter::new());
        (
            CoreServiceProvider::new(container.clone(), blueprint, emitter),
            container,
        )
    }

    #[tokio::test]
    async fn test_register_binds_services_with_lifetime() {
        let users = ClassRef::of_default::<Users>("Users")
            .service(ServiceOptions {
                singleton: true,
                alias: vec!["users".into()],
            })
            .build();
        let (core, container) = provider(
            json!({"stone": {"kernel": {"services": ["Users"]}}}),
            vec![users],
        );
        core.register().await.unwrap();

        assert_eq!(container.lifetime("users"), Some(Lifetime::Singleton));
        let a = container.make::<Users>("users").unwrap();
        let b = container.make::<Users>("Users").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[tokio::test]
    async fn test_register_logger_and_aliases() {
        let logger = ClassRef::of_default::<Quiet>("Quiet")
            .logger(LoggerOptions {
                alias: vec!["log".into()],
            })
            .build();
        let (core, container) = provider(
            json!({"stone": {"logger": "Quiet", "kernel": {"aliases": {"silence": "Quiet"}}}}),
            vec![logger],
        );
        core.register().await.unwrap();

        assert!(container.make_as::<dyn Logger>("logger").is_ok());
        assert!(container.make_as::<dyn Logger>("log").is_ok());
        assert!(container.make_as::<dyn Logger>("silence").is_ok());
    }

    #[tokio::test]
    async fn test_listeners_resolved_when_event_fires() {
        let audit = ClassRef::of_default::<Audit>("Audit")
            .implements::<dyn EventListener<Event>>(|c| c)
            .listener(ListenerOptions {
                event: LifecycleEvent::EventHandled.as_str().into(),
            })
            .build();
        let (core, _container) = provider(
            json!({"stone": {"kernel": {"listeners": {"Stone@KernelEventHandled": ["Audit"]}}}}),
            vec![audit],
        );
        core.register().await.unwrap();
        assert_eq!(core.emitter.listener_count("Stone@KernelEventHandled"), 1);

        let event = KernelEvent {
            kind: LifecycleEvent::EventHandled,
            context: KernelContext {
                incoming: 1,
                outgoing: 2,
            },
        };
        core.emitter.emit(&event).await.unwrap();
        assert!(SEEN
            .lock()
            .contains(&"Stone@KernelEventHandled:2".to_string()));
    }

    #[tokio::test]
    async fn test_boot_attaches_subscribers() {
        let metrics = ClassRef::of_default::<Metrics>("Metrics")
            .implements::<dyn Subscriber<Event>>(|c| c)
            .subscriber()
            .build();
        let (core, _container) = provider(
            json!({"stone": {"kernel": {"subscribers": ["Metrics"]}}}),
            vec![metrics],
        );
        core.boot().await.unwrap();
        assert!(core.emitter.has_listeners("metrics"));
    }

    #[tokio::test]
    async fn test_unknown_service_is_configuration_error() {
        let (core, _container) = provider(
            json!({"stone": {"kernel": {"services": ["Missing"]}}}),
            vec![],
        );
        assert!(matches!(
            core.register().await,
            Err(stone_types::StoneError::Configuration(_))
        ));
    }
}
