//! # Stone Telemetry
//!
//! Log output for the Stone runtime.
//!
//! ## Components
//!
//! - **Subscriber setup**: `init_logging` installs a `tracing-subscriber`
//!   registry (pretty or JSON) filtered by `EnvFilter`.
//! - **Logger capability**: the `Logger` trait the kernel and adapters fall
//!   back to when no error handler is configured, with `TracingLogger` as
//!   the default implementation.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stone_telemetry::{init_logging, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     init_logging(&TelemetryConfig::from_env()).expect("Failed to init logging");
//!     // Application code
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `STONE_SERVICE_NAME` | `stone` | Service name in log lines |
//! | `STONE_LOG_LEVEL` / `RUST_LOG` | `info` | Log level filter |
//! | `STONE_CONSOLE_OUTPUT` | `true` | Write logs to the console |
//! | `STONE_JSON_LOGS` | `false` | JSON instead of pretty output |

mod config;
mod logging;
mod tracing_setup;

pub use config::TelemetryConfig;
pub use logging::{LogLevel, Logger, TracingLogger};
pub use tracing_setup::init_logging;

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Global subscriber already installed: {0}")]
    AlreadyInitialized(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Span wrapping one kernel phase. The name must be a string literal.
///
/// # Example
///
/// ```rust,ignore
/// use tracing::Instrument;
///
/// self.process(incoming)
///     .instrument(stone_telemetry::kernel_span!("handle", kernel = %self.id))
///     .await
/// ```
#[macro_export]
macro_rules! kernel_span {
    ($name:expr $(, $($field:tt)*)?) => {
        tracing::debug_span!($name, component = "kernel" $(, $($field)*)?)
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "stone");
    }

    #[test]
    fn test_kernel_span_carries_component() {
        let subscriber = tracing_subscriber::registry();
        tracing::subscriber::with_default(subscriber, || {
            let span = kernel_span!("boot", providers = 3);
            let metadata = span.metadata().unwrap();
            assert_eq!(metadata.name(), "boot");
            assert!(metadata.fields().field("component").is_some());
            assert!(metadata.fields().field("providers").is_some());
        });
    }
}
