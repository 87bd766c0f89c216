//! # Application Flows
//!
//! Drives a whole application from registered modules to a platform reply:
//!
//! ```text
//! StoneApplication::run
//!   └─ ConsoleAdapter (stone.adapter.console)
//!        ├─ ReadArgs        adapter incoming middleware
//!        ├─ Kernel          handler factory "stone.kernel"
//!        │    ├─ Timing     kernel incoming middleware
//!        │    ├─ Greeter    main handler (uses the Greetings service)
//!        │    ├─ Stamp      kernel outgoing middleware
//!        │    └─ Audit      listener on Stone@KernelEventHandled
//!        └─ Print           adapter outgoing middleware
//! ```

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde::Serialize;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use stone_bus::EventListener;
    use stone_core::{AsyncMiddleware, AsyncNext, Blueprint, ClassRef};
    use stone_runtime::decorators::{
        AdapterMiddlewareOptions, AdapterOptions, AppOptions, KernelMiddlewareOptions,
        ListenerOptions, ServiceOptions,
    };
    use stone_runtime::{
        Adapter, BaseAdapter, Decorate, ErrorHandler, EventContext, Handler, KernelContext,
        KernelEvent, PlatformResponse, Provider, StoneApplication,
    };
    use stone_types::{IncomingEvent, LifecycleEvent, OutgoingEvent, Result, StoneError};

    type In = IncomingEvent;
    type Out = OutgoingEvent;
    type Ctx = EventContext<Value, In, Out, ConsoleReply>;

    // =========================================================================
    // PLATFORM
    // =========================================================================

    #[derive(Debug, Clone)]
    struct ConsoleReply(Value);

    #[async_trait]
    impl PlatformResponse for ConsoleReply {
        async fn send(&self) -> Result<Value> {
            Ok(self.0.clone())
        }
    }

    /// Reads its single message from `console.input`.
    struct ConsoleAdapter {
        inner: BaseAdapter<Value, In, Out, ConsoleReply>,
    }

    #[async_trait]
    impl Adapter for ConsoleAdapter {
        fn name(&self) -> &str {
            self.inner.adapter_name()
        }

        async fn run(&self) -> Result<Value> {
            let input = self.inner.blueprint().get("console.input", Value::Null);
            self.inner.run_with(input).await
        }
    }

    fn console_adapter() -> ClassRef {
        ClassRef::builder("ConsoleAdapter", |container| {
            let blueprint = container.make::<Blueprint>("blueprint")?;
            Ok(ConsoleAdapter {
                inner: BaseAdapter::new((*blueprint).clone(), "console")?,
            })
        })
        .implements::<dyn Adapter>(|c| c)
        .adapter(AdapterOptions {
            name: "console".into(),
            alias: Some("cli".into()),
            ..AdapterOptions::default()
        })
        .build()
    }

    #[derive(Default)]
    struct ReadArgs;

    #[async_trait]
    impl AsyncMiddleware<Ctx> for ReadArgs {
        async fn handle(&self, mut ctx: Ctx, next: AsyncNext<Ctx, Ctx>, _: Option<Value>) -> Result<Ctx> {
            ctx.incoming_event = Some(IncomingEvent::with_type("console", ctx.message.clone()));
            next.run(ctx).await
        }
    }

    #[derive(Default)]
    struct Print;

    #[async_trait]
    impl AsyncMiddleware<Ctx> for Print {
        async fn handle(&self, mut ctx: Ctx, next: AsyncNext<Ctx, Ctx>, _: Option<Value>) -> Result<Ctx> {
            let reply = ctx.outgoing_event().map(|out| {
                json!({"code": out.status_code(), "output": out.body()})
            });
            if let Some(reply) = reply {
                ctx.set_response(ConsoleReply(reply))?;
            }
            next.run(ctx).await
        }
    }

    // =========================================================================
    // APPLICATION
    // =========================================================================

    #[derive(Default)]
    struct Greetings;

    impl Greetings {
        fn greet(&self, name: &str) -> String {
            format!("Hello, {name}")
        }
    }

    struct Greeter {
        greetings: Arc<Greetings>,
    }

    #[async_trait]
    impl Handler<In, Out> for Greeter {
        async fn handle(&self, event: In) -> Result<Out> {
            let name: String = event.get("name", String::new());
            if name.is_empty() {
                return Err(StoneError::handling("a name is required"));
            }
            Ok(OutgoingEvent::new(json!({"greeting": self.greetings.greet(&name)})))
        }
    }

    #[derive(Default)]
    struct Timing;

    #[async_trait]
    impl AsyncMiddleware<In, Out> for Timing {
        async fn handle(&self, event: In, next: AsyncNext<In, Out>, _: Option<Value>) -> Result<Out> {
            let mut out = next.run(event).await?;
            let mut body = out.body().clone();
            body["timed"] = json!(true);
            out.set_body(body);
            Ok(out)
        }
    }

    #[derive(Default)]
    struct Stamp;

    #[async_trait]
    impl AsyncMiddleware<KernelContext<In, Out>> for Stamp {
        async fn handle(
            &self,
            mut ctx: KernelContext<In, Out>,
            next: AsyncNext<KernelContext<In, Out>, KernelContext<In, Out>>,
            _: Option<Value>,
        ) -> Result<KernelContext<In, Out>> {
            let mut body = ctx.outgoing.body().clone();
            body["source"] = json!(ctx.incoming.event_type());
            ctx.outgoing.set_body(body);
            next.run(ctx).await
        }
    }

    static AUDITED: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct Audit;

    #[async_trait]
    impl EventListener<KernelEvent<In, Out>> for Audit {
        async fn handle(&self, event: &KernelEvent<In, Out>) -> Result<()> {
            assert_eq!(event.kind, LifecycleEvent::EventHandled);
            AUDITED.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    static WARMUPS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct Warmup;

    #[async_trait]
    impl Provider for Warmup {
        async fn on_init(&self) -> Result<()> {
            WARMUPS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct Errors;

    impl ErrorHandler<In, Out> for Errors {
        fn report(&self, _error: &StoneError, _context: &In) {}

        fn render(&self, error: &StoneError, _context: &In) -> Result<Out> {
            Ok(OutgoingEvent::new(json!({"error": error.to_string()})).with_status(422, "Unprocessable"))
        }
    }

    static ADAPTER_ERRORS: Mutex<Vec<String>> = parking_lot::const_mutex(Vec::new());

    #[derive(Default)]
    struct ConsoleErrors;

    impl ErrorHandler<Ctx, Value> for ConsoleErrors {
        fn report(&self, error: &StoneError, _context: &Ctx) {
            ADAPTER_ERRORS.lock().push(error.to_string());
        }

        fn render(&self, _error: &StoneError, _context: &Ctx) -> Result<Value> {
            Ok(json!({"code": 1}))
        }
    }

    #[derive(Clone, Serialize)]
    struct ConsoleConfig {
        console: ConsoleSection,
    }

    #[derive(Clone, Serialize)]
    struct ConsoleSection {
        input: Value,
    }

    fn input(value: Value) -> ClassRef {
        let config = ConsoleConfig {
            console: ConsoleSection { input: value },
        };
        ClassRef::builder("ConsoleConfig", move |_| Ok(config.clone()))
            .configuration()
        .build()
    }

    fn modules() -> Vec<ClassRef> {
        vec![
            ClassRef::builder("Greeter", |container| {
                Ok(Greeter {
                    greetings: container.make::<Greetings>("greetings")?,
                })
            })
            .implements::<dyn Handler<In, Out>>(|c| c)
            .stone_app(AppOptions {
                name: Some("greeter".into()),
                env: Some("test".into()),
                ..AppOptions::default()
            })
            .build(),
            ClassRef::of_default::<Greetings>("Greetings")
                .service(ServiceOptions {
                    singleton: true,
                    alias: vec!["greetings".into()],
                })
                .build(),
            ClassRef::of_default::<Timing>("Timing")
                .implements::<dyn AsyncMiddleware<In, Out>>(|c| c)
                .kernel_middleware(KernelMiddlewareOptions::default())
                .build(),
            ClassRef::of_default::<Stamp>("Stamp")
                .implements::<dyn AsyncMiddleware<KernelContext<In, Out>>>(|c| c)
                .kernel_middleware(KernelMiddlewareOptions {
                    outgoing: true,
                    ..KernelMiddlewareOptions::default()
                })
                .build(),
            ClassRef::of_default::<Audit>("Audit")
                .implements::<dyn EventListener<KernelEvent<In, Out>>>(|c| c)
                .listener(ListenerOptions {
                    event: LifecycleEvent::EventHandled.as_str().into(),
                })
                .build(),
            ClassRef::of_default::<Warmup>("Warmup").provider().build(),
            ClassRef::of_default::<ReadArgs>("ReadArgs")
                .implements::<dyn AsyncMiddleware<Ctx>>(|c| c)
                .adapter_middleware(AdapterMiddlewareOptions {
                    adapter: Some("cli".into()),
                    ..AdapterMiddlewareOptions::default()
                })
                .build(),
            ClassRef::of_default::<Print>("Print")
                .implements::<dyn AsyncMiddleware<Ctx>>(|c| c)
                .adapter_middleware(AdapterMiddlewareOptions {
                    adapter: Some("console".into()),
                    outgoing: true,
                    ..AdapterMiddlewareOptions::default()
                })
                .build(),
            console_adapter(),
        ]
    }

    fn errors() -> ClassRef {
        ClassRef::of_default::<Errors>("Errors")
            .implements::<dyn ErrorHandler<In, Out>>(|c| c)
            .kernel_error_handler()
            .build()
    }

    // =========================================================================
    // FLOWS
    // =========================================================================

    #[tokio::test]
    async fn test_blueprint_wires_every_registration() {
        let blueprint = StoneApplication::new()
            .modules(modules())
            .module(input(json!({"name": "Ada"})))
            .blueprint()
            .unwrap();

        assert_eq!(blueprint.get("stone.env", String::new()), "test");
        assert_eq!(blueprint.get("stone.kernel.handler", String::new()), "Greeter");
        assert_eq!(blueprint.get_value("stone.kernel.services"), Some(json!(["Greetings"])));
        assert_eq!(blueprint.get_value("stone.kernel.providers"), Some(json!(["Warmup"])));
        assert_eq!(
            blueprint.get_value("stone.kernel.listeners.Stone@KernelEventHandled"),
            Some(json!(["Audit"]))
        );
        assert_eq!(
            blueprint.get("stone.adapter.console.handlerFactory", String::new()),
            "stone.kernel"
        );
        assert_eq!(
            blueprint.get_value("stone.adapter.console.hooks.onInit"),
            Some(json!(["Warmup"]))
        );
        assert_eq!(
            blueprint.get_value("stone.adapter.console.middleware.incoming"),
            Some(json!(["ReadArgs"]))
        );
        assert_eq!(
            blueprint.get_value("stone.adapter.console.middleware.outgoing"),
            Some(json!(["Print"]))
        );
    }

    #[tokio::test]
    async fn test_application_greets_through_every_layer() {
        let audited = AUDITED.load(Ordering::SeqCst);
        let warmups = WARMUPS.load(Ordering::SeqCst);

        let reply = StoneApplication::new()
            .modules(modules())
            .module(input(json!({"name": "Ada"})))
            .run()
            .await
            .unwrap();

        assert_eq!(
            reply,
            json!({
                "code": 200,
                "output": {"greeting": "Hello, Ada", "timed": true, "source": "console"}
            })
        );
        assert!(AUDITED.load(Ordering::SeqCst) > audited);
        assert!(WARMUPS.load(Ordering::SeqCst) > warmups);
    }

    #[tokio::test]
    async fn test_handling_error_rendered_by_kernel_error_handler() {
        let reply = StoneApplication::new()
            .modules(modules())
            .module(errors())
            .module(input(json!({})))
            .run()
            .await
            .unwrap();

        assert_eq!(reply["code"], json!(422));
        assert!(reply["output"]["error"]
            .as_str()
            .unwrap()
            .contains("a name is required"));
    }

    #[tokio::test]
    async fn test_unrecovered_error_stops_at_the_adapter() {
        let reply = StoneApplication::new()
            .modules(modules())
            .module(input(json!({})))
            .run()
            .await
            .unwrap();
        assert_eq!(reply, Value::Null);
    }

    #[tokio::test]
    async fn test_adapter_error_handler_sees_programmer_errors() {
        let handler = ClassRef::of_default::<ConsoleErrors>("ConsoleErrors")
            .implements::<dyn ErrorHandler<Ctx, Value>>(|c| c)
            .adapter_error_handler(Default::default())
            .build();
        let broken = ClassRef::of_default::<Greetings>("Misconfigured")
            .blueprint(json!({"stone": {"kernel": {"middleware": {"incoming": ["Nowhere"]}}}}))
            .build();

        let reply = StoneApplication::new()
            .modules(modules())
            .modules([handler, broken, errors(), input(json!({"name": "Ada"}))])
            .run()
            .await
            .unwrap();

        assert_eq!(reply, json!({"code": 1}));
        assert!(ADAPTER_ERRORS.lock().iter().any(|e| e.contains("Nowhere")));
    }
}
