//! Event context and the middleware that maps it.
//!
//! ```text
//!   message ──► incoming middleware ──► incoming_event
//!                                            │ handler
//!   response ◄── outgoing middleware ◄── outgoing_event
//! ```

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use stone_core::{Blueprint, Container, PipeDefinition, Pipeline, DEFAULT_PRIORITY};
use stone_types::{Result, StoneError};
use tracing::trace;

/// Everything an adapter knows about one platform message.
#[derive(Clone)]
pub struct EventContext<M, I, O, P> {
    pub blueprint: Blueprint,
    /// Raw platform message.
    pub message: M,
    /// Set by incoming middleware.
    pub incoming_event: Option<I>,
    /// Platform execution context, if the platform provides one.
    pub context: Option<Value>,
    outgoing_event: Option<O>,
    response: Option<P>,
}

impl<M, I, O, P> EventContext<M, I, O, P> {
    pub fn new(blueprint: Blueprint, message: M) -> Self {
        Self {
            blueprint,
            message,
            incoming_event: None,
            context: None,
            outgoing_event: None,
            response: None,
        }
    }

    #[must_use]
    pub fn with_context(mut self, context: Value) -> Self {
        self.context = Some(context);
        self
    }

    #[must_use]
    pub fn outgoing_event(&self) -> Option<&O> {
        self.outgoing_event.as_ref()
    }

    #[must_use]
    pub fn response(&self) -> Option<&P> {
        self.response.as_ref()
    }

    /// Set by the adapter once the handler returns. Can only be set once.
    pub fn set_outgoing_event(&mut self, event: O) -> Result<()> {
        if self.outgoing_event.is_some() {
            return Err(StoneError::type_error("Outgoing event is already set"));
        }
        self.outgoing_event = Some(event);
        Ok(())
    }

    /// Set by outgoing middleware. Can only be set once.
    pub fn set_response(&mut self, response: P) -> Result<()> {
        if self.response.is_some() {
            return Err(StoneError::type_error("Platform response is already set"));
        }
        self.response = Some(response);
        Ok(())
    }
}

impl<M, I, O, P> fmt::Debug for EventContext<M, I, O, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventContext")
            .field("incoming_event", &self.incoming_event.is_some())
            .field("outgoing_event", &self.outgoing_event.is_some())
            .field("response", &self.response.is_some())
            .finish_non_exhaustive()
    }
}

type Pipes<M, I, O, P> = Vec<PipeDefinition<EventContext<M, I, O, P>>>;

/// Runs `stone.adapter.<name>.middleware.{incoming,outgoing}` over an
/// `EventContext`.
pub struct EventContextMapper<M, I, O, P> {
    container: Arc<Container>,
    incoming: Pipes<M, I, O, P>,
    outgoing: Pipes<M, I, O, P>,
}

impl<M, I, O, P> EventContextMapper<M, I, O, P>
where
    M: Send + 'static,
    I: Send + 'static,
    O: Send + 'static,
    P: Send + 'static,
{
    pub fn new(container: Arc<Container>) -> Self {
        Self {
            container,
            incoming: Vec::new(),
            outgoing: Vec::new(),
        }
    }

    /// Read the adapter's middleware lists from the blueprint.
    pub fn from_blueprint(blueprint: &Blueprint, adapter: &str, container: Arc<Container>) -> Result<Self> {
        let list = |stage: &str| -> Result<Pipes<M, I, O, P>> {
            let entries: Vec<Value> = blueprint.get(
                &format!("stone.adapter.{adapter}.middleware.{stage}"),
                Vec::new(),
            );
            PipeDefinition::list_from_config(&entries)
        };
        Ok(Self {
            container,
            incoming: list("incoming")?,
            outgoing: list("outgoing")?,
        })
    }

    #[must_use]
    pub fn incoming(mut self, pipe: impl Into<PipeDefinition<EventContext<M, I, O, P>>>) -> Self {
        self.incoming.push(pipe.into());
        self
    }

    #[must_use]
    pub fn outgoing(mut self, pipe: impl Into<PipeDefinition<EventContext<M, I, O, P>>>) -> Self {
        self.outgoing.push(pipe.into());
        self
    }

    /// Platform message to incoming event.
    pub async fn map_incoming(&self, context: EventContext<M, I, O, P>) -> Result<EventContext<M, I, O, P>> {
        trace!(stages = self.incoming.len(), "Mapping incoming event");
        self.run(self.incoming.clone(), context).await
    }

    /// Outgoing event to platform response.
    pub async fn map_outgoing(&self, context: EventContext<M, I, O, P>) -> Result<EventContext<M, I, O, P>> {
        trace!(stages = self.outgoing.len(), "Mapping outgoing response");
        self.run(self.outgoing.clone(), context).await
    }

    async fn run(
        &self,
        pipes: Pipes<M, I, O, P>,
        context: EventContext<M, I, O, P>,
    ) -> Result<EventContext<M, I, O, P>> {
        Pipeline::with_container(self.container.clone())
            .default_priority(DEFAULT_PRIORITY)
            .through(pipes)
            .send(context)
            .then_async(|context| async move { Ok(context) })
            .await
    }
}

impl<M, I, O, P> fmt::Debug for EventContextMapper<M, I, O, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventContextMapper")
            .field("incoming", &self.incoming.len())
            .field("outgoing", &self.outgoing.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use stone_core::{AsyncNext, ConfigStore, ModuleRegistry, Stage};

    type Ctx = EventContext<String, String, String, String>;

    fn blueprint(config: Value) -> Blueprint {
        Blueprint::new(
            ConfigStore::from_value(config).unwrap(),
            Arc::new(ModuleRegistry::new()),
        )
    }

    #[test]
    fn test_outgoing_event_set_once() {
        let mut ctx: Ctx = EventContext::new(blueprint(json!({})), "raw".into());
        ctx.set_outgoing_event("out".into()).unwrap();
        assert!(matches!(
            ctx.set_outgoing_event("again".into()),
            Err(StoneError::Type(_))
        ));
        assert_eq!(ctx.outgoing_event().map(String::as_str), Some("out"));

        ctx.set_response("sent".into()).unwrap();
        assert!(ctx.set_response("twice".into()).is_err());
    }

    #[tokio::test]
    async fn test_mapper_runs_both_directions() {
        let mapper: EventContextMapper<String, String, String, String> =
            EventContextMapper::new(Arc::new(Container::new()))
                .incoming(Stage::async_function(
                    |mut ctx: Ctx, next: AsyncNext<Ctx, Ctx>, _| async move {
                        ctx.incoming_event = Some(ctx.message.to_uppercase());
                        next.run(ctx).await
                    },
                ))
                .outgoing(Stage::async_function(
                    |mut ctx: Ctx, next: AsyncNext<Ctx, Ctx>, _| async move {
                        let body = ctx.outgoing_event().cloned().unwrap_or_default();
                        ctx.set_response(format!("<{body}>"))?;
                        next.run(ctx).await
                    },
                ));

        let ctx = EventContext::new(blueprint(json!({})), "ping".to_string());
        let mut ctx = mapper.map_incoming(ctx).await.unwrap();
        assert_eq!(ctx.incoming_event.as_deref(), Some("PING"));

        ctx.set_outgoing_event("pong".into()).unwrap();
        let ctx = mapper.map_outgoing(ctx).await.unwrap();
        assert_eq!(ctx.response().map(String::as_str), Some("<pong>"));
    }

    #[test]
    fn test_mapper_reads_adapter_middleware() {
        let bp = blueprint(json!({"stone": {"adapter": {"http": {"middleware": {
            "incoming": ["Parse", {"pipe": "Auth", "priority": 1}],
            "outgoing": []
        }}}}}));
        let mapper: EventContextMapper<String, String, String, String> =
            EventContextMapper::from_blueprint(&bp, "http", Arc::new(Container::new())).unwrap();
        assert_eq!(mapper.incoming.len(), 2);
        assert!(mapper.outgoing.is_empty());
    }
}
