//! # Kernel Lifecycle Tests
//!
//! Builds blueprints with `BlueprintBuilder` and drives a `Kernel` directly:
//!
//! ```text
//! Created ──handle──► Booting ──► Handling ──on_terminate──► Terminated
//!                      │
//!                      └─ providers: register (once) → boot (once)
//! ```
//!
//! ## Test Categories
//!
//! 1. **Boot**: providers boot exactly once across many events
//! 2. **Dispatch**: handler, missing handler, absent event
//! 3. **Middleware**: short-circuit, kill switch, terminate stage
//! 4. **Events**: lifecycle order seen by a broadcast subscription

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use stone_bus::{EventEmitter, EventFilter};
    use stone_core::{AsyncMiddleware, AsyncNext, Blueprint, ClassRef};
    use stone_runtime::decorators::{AppOptions, KernelMiddlewareOptions};
    use stone_runtime::{
        BlueprintBuilder, Decorate, Handler, Kernel, KernelContext, KernelEvent, KernelState,
        Provider, Subscriber,
    };
    use stone_types::{IncomingEvent, LifecycleEvent, OutgoingEvent, Result, StoneError};

    type In = IncomingEvent;
    type Out = OutgoingEvent;

    // =========================================================================
    // TEST FIXTURES
    // =========================================================================

    static HANDLED: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct Orders;

    #[async_trait]
    impl Handler<In, Out> for Orders {
        async fn handle(&self, event: In) -> Result<Out> {
            HANDLED.fetch_add(1, Ordering::SeqCst);
            Ok(OutgoingEvent::new(json!({"order": event.get("id", 0u64)})))
        }
    }

    static SPIED: AtomicUsize = AtomicUsize::new(0);

    /// Only used where the destination must never run.
    #[derive(Default)]
    struct Spy;

    #[async_trait]
    impl Handler<In, Out> for Spy {
        async fn handle(&self, _event: In) -> Result<Out> {
            SPIED.fetch_add(1, Ordering::SeqCst);
            Ok(OutgoingEvent::new(Value::Null))
        }
    }

    static BOOTS: AtomicUsize = AtomicUsize::new(0);

    #[derive(Default)]
    struct Database;

    #[async_trait]
    impl Provider for Database {
        async fn boot(&self) -> Result<()> {
            BOOTS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Passes through.
    #[derive(Default)]
    struct First;

    #[async_trait]
    impl AsyncMiddleware<In, Out> for First {
        async fn handle(&self, event: In, next: AsyncNext<In, Out>, _: Option<Value>) -> Result<Out> {
            next.run(event).await
        }
    }

    /// Answers without calling `next`.
    #[derive(Default)]
    struct Gate;

    #[async_trait]
    impl AsyncMiddleware<In, Out> for Gate {
        async fn handle(&self, _event: In, _next: AsyncNext<In, Out>, _: Option<Value>) -> Result<Out> {
            Ok(OutgoingEvent::new(json!("cached")))
        }
    }

    /// Never reached when `Gate` answers.
    #[derive(Default)]
    struct Third;

    #[async_trait]
    impl AsyncMiddleware<In, Out> for Third {
        async fn handle(&self, _event: In, _next: AsyncNext<In, Out>, _: Option<Value>) -> Result<Out> {
            Err(StoneError::handling("third stage must not run"))
        }
    }

    static TERMINATED: Mutex<Vec<Value>> = parking_lot::const_mutex(Vec::new());

    #[derive(Default)]
    struct Flush;

    #[async_trait]
    impl AsyncMiddleware<KernelContext<In, Out>> for Flush {
        async fn handle(
            &self,
            ctx: KernelContext<In, Out>,
            next: AsyncNext<KernelContext<In, Out>, KernelContext<In, Out>>,
            _: Option<Value>,
        ) -> Result<KernelContext<In, Out>> {
            TERMINATED.lock().push(ctx.outgoing.body().clone());
            next.run(ctx).await
        }
    }

    #[derive(Default)]
    struct Metrics;

    #[async_trait]
    impl Subscriber<KernelEvent<In, Out>> for Metrics {
        async fn subscribe(&self, emitter: &EventEmitter<KernelEvent<In, Out>>) -> Result<()> {
            emitter.on_fn(LifecycleEvent::ResponsePrepared.as_str(), |event: &KernelEvent<In, Out>| {
                assert!(event.context.outgoing.is_prepared());
                Ok(())
            });
            Ok(())
        }
    }

    fn app() -> ClassRef {
        ClassRef::of_default::<Orders>("Orders")
            .implements::<dyn Handler<In, Out>>(|c| c)
            .stone_app(AppOptions::default())
            .build()
    }

    fn middleware<M>(name: &str, priority: f64) -> ClassRef
    where
        M: AsyncMiddleware<In, Out> + Default + 'static,
    {
        ClassRef::of_default::<M>(name)
            .implements::<dyn AsyncMiddleware<In, Out>>(|c| c)
            .kernel_middleware(KernelMiddlewareOptions {
                priority: Some(priority),
                ..KernelMiddlewareOptions::default()
            })
            .build()
    }

    fn kernel(modules: Vec<ClassRef>) -> Kernel<In, Out> {
        let blueprint = BlueprintBuilder::new().modules(modules).build().unwrap();
        Kernel::new(blueprint).unwrap()
    }

    fn event(id: u64) -> Option<In> {
        Some(IncomingEvent::new(json!({"id": id})))
    }

    // =========================================================================
    // BOOT
    // =========================================================================

    #[tokio::test]
    async fn test_providers_boot_once_across_events() {
        let database = ClassRef::of_default::<Database>("Database").provider().build();
        let kernel = kernel(vec![app(), database]);
        let boots = BOOTS.load(Ordering::SeqCst);
        assert_eq!(kernel.state(), KernelState::Created);

        for id in 1..=3 {
            kernel.before_handle().await.unwrap();
            kernel.handle(event(id)).await.unwrap();
        }

        assert_eq!(BOOTS.load(Ordering::SeqCst) - boots, 1);
        assert!(kernel.has_booted());
        assert_eq!(kernel.state(), KernelState::Handling);
    }

    // =========================================================================
    // DISPATCH
    // =========================================================================

    #[tokio::test]
    async fn test_configured_handler_invoked_once() {
        let kernel = kernel(vec![app()]);
        let handled = HANDLED.load(Ordering::SeqCst);

        let out = kernel.handle(event(42)).await.unwrap();
        assert_eq!(out.body(), &json!({"order": 42}));
        assert!(HANDLED.load(Ordering::SeqCst) > handled);
    }

    #[tokio::test]
    async fn test_missing_handler_is_type_error() {
        let kernel: Kernel<In, Out> = Kernel::new(BlueprintBuilder::new().build().unwrap()).unwrap();
        let err = kernel.handle(event(1)).await.unwrap_err();
        assert!(matches!(err, StoneError::Type(_)));
    }

    #[tokio::test]
    async fn test_absent_event_fails_before_middleware() {
        let kernel = kernel(vec![app(), middleware::<Third>("Third", 1.0)]);
        let err = kernel.handle(None).await.unwrap_err();
        assert!(matches!(err, StoneError::Type(_)));
        assert!(!kernel.has_booted());
    }

    // =========================================================================
    // MIDDLEWARE
    // =========================================================================

    #[tokio::test]
    async fn test_short_circuit_skips_rest_and_destination() {
        let spy = ClassRef::of_default::<Spy>("Spy")
            .implements::<dyn Handler<In, Out>>(|c| c)
            .stone_app(AppOptions::default())
            .build();
        let kernel = kernel(vec![
            spy,
            middleware::<Third>("Third", 3.0),
            middleware::<Gate>("Gate", 2.0),
            middleware::<First>("First", 1.0),
        ]);

        let out = kernel.handle(event(1)).await.unwrap();
        assert_eq!(out.body(), &json!("cached"));
        assert!(out.is_prepared());
        assert_eq!(SPIED.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_skip_flag_empties_every_pipeline() {
        let skip = ClassRef::of_default::<Orders>("Diagnostics")
            .blueprint(json!({"stone": {"kernel": {"middleware": {"skip": true}}}}))
            .build();
        let kernel = kernel(vec![app(), skip, middleware::<Gate>("Gate", 1.0)]);

        let out = kernel.handle(event(5)).await.unwrap();
        assert_eq!(out.body(), &json!({"order": 5}));
    }

    #[tokio::test]
    async fn test_terminate_pipeline_sees_last_response() {
        let flush = ClassRef::of_default::<Flush>("Flush")
            .implements::<dyn AsyncMiddleware<KernelContext<In, Out>>>(|c| c)
            .kernel_middleware(KernelMiddlewareOptions {
                terminate: true,
                ..KernelMiddlewareOptions::default()
            })
            .build();
        let kernel = kernel(vec![app(), flush]);

        kernel.handle(event(9)).await.unwrap();
        kernel.on_terminate().await.unwrap();

        assert_eq!(kernel.state(), KernelState::Terminated);
        assert!(TERMINATED.lock().contains(&json!({"order": 9})));
    }

    // =========================================================================
    // EVENTS
    // =========================================================================

    #[tokio::test]
    async fn test_subscription_sees_lifecycle_in_order() {
        let metrics = ClassRef::of_default::<Metrics>("Metrics")
            .implements::<dyn Subscriber<KernelEvent<In, Out>>>(|c| c)
            .subscriber()
            .build();
        let kernel = kernel(vec![app(), metrics]);
        let mut subscription = kernel.emitter().subscribe(EventFilter::all());

        kernel.handle(event(1)).await.unwrap();

        let mut seen = Vec::new();
        while let Ok(Some(event)) = subscription.try_recv() {
            seen.push(event.kind);
        }
        assert_eq!(seen, LifecycleEvent::ALL.to_vec());
        assert!(kernel
            .emitter()
            .has_listeners(LifecycleEvent::ResponsePrepared.as_str()));
    }

    #[tokio::test]
    async fn test_base_bindings_available_to_user_code() {
        let kernel = kernel(vec![app()]);
        let container = kernel.container();

        let config = container.make::<Blueprint>("config").unwrap();
        assert_eq!(config.get("stone.kernel.handler", String::new()), "Orders");
        assert!(container
            .make::<EventEmitter<KernelEvent<In, Out>>>("eventEmitter")
            .is_ok());
        assert!(container.bound("container"));
    }
}
