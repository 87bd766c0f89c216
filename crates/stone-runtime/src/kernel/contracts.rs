//! Capabilities the kernel consumes from user classes.
//!
//! Every method with a default body is optional: a provider that only needs
//! `register` implements just that.

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use stone_bus::{BusEvent, EventEmitter};
use stone_types::{Result, StoneError};

/// A unit with lifecycle hooks managed by the kernel.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Skipped providers are never registered, booted or terminated.
    fn must_skip(&self) -> bool {
        false
    }

    /// Run by the adapter before the handler is built.
    async fn on_init(&self) -> Result<()> {
        Ok(())
    }

    /// Run on every `Kernel::before_handle`.
    async fn before_handle(&self) -> Result<()> {
        Ok(())
    }

    /// Run once per kernel.
    async fn register(&self) -> Result<()> {
        Ok(())
    }

    /// Run once per kernel, on the first `handle`.
    async fn boot(&self) -> Result<()> {
        Ok(())
    }

    async fn on_terminate(&self) -> Result<()> {
        Ok(())
    }
}

/// The application's main handler.
#[async_trait]
pub trait Handler<I, O>: Send + Sync
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn handle(&self, event: I) -> Result<O>;
}

/// Adapts an async closure to `Handler`.
pub struct FnHandler<F> {
    callback: F,
}

impl<F> FnHandler<F> {
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FnHandler")
    }
}

#[async_trait]
impl<I, O, F, Fut> Handler<I, O> for FnHandler<F>
where
    I: Send + 'static,
    O: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync,
    Fut: Future<Output = Result<O>> + Send,
{
    async fn handle(&self, event: I) -> Result<O> {
        (self.callback)(event).await
    }
}

/// Dispatches an incoming event when bound under `router`.
#[async_trait]
pub trait Router<I, O>: Send + Sync
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn dispatch(&self, event: I) -> Result<O>;
}

/// Turns a recoverable error into a response.
///
/// The kernel passes the incoming event as context; adapters pass their
/// `EventContext`.
pub trait ErrorHandler<C, R>: Send + Sync {
    fn report(&self, error: &StoneError, context: &C);

    fn render(&self, error: &StoneError, context: &C) -> Result<R>;
}

/// Attaches listeners to the emitter when the kernel boots.
#[async_trait]
pub trait Subscriber<E: BusEvent>: Send + Sync {
    async fn subscribe(&self, emitter: &EventEmitter<E>) -> Result<()>;
}

/// What an adapter drives: the kernel, or anything shaped like it.
#[async_trait]
pub trait EventHandler<I, O>: Send + Sync
where
    I: Send + 'static,
    O: Send + 'static,
{
    async fn before_handle(&self) -> Result<()> {
        Ok(())
    }

    /// `None` means the adapter could not map the message to an event.
    async fn handle(&self, event: Option<I>) -> Result<O>;

    async fn on_terminate(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Quiet;

    #[async_trait]
    impl Provider for Quiet {}

    #[tokio::test]
    async fn test_provider_hooks_default_to_noop() {
        let provider = Quiet;
        assert!(!provider.must_skip());
        provider.on_init().await.unwrap();
        provider.before_handle().await.unwrap();
        provider.register().await.unwrap();
        provider.boot().await.unwrap();
        provider.on_terminate().await.unwrap();
    }

    #[tokio::test]
    async fn test_fn_handler() {
        let handler = FnHandler::new(|n: u32| async move { Ok(n * 2) });
        assert_eq!(Handler::<u32, u32>::handle(&handler, 21).await.unwrap(), 42);
    }
}
