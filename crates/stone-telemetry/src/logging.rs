//! The `Logger` capability.
//!
//! Consumed wherever an error must be surfaced without a configured error
//! handler. `TracingLogger` forwards to `tracing`; applications may bind
//! their own implementation under `stone.logger`.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::TelemetryError;

/// Severity accepted by `Logger::log`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = TelemetryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "fatal" | "critical" => Ok(LogLevel::Fatal),
            other => Err(TelemetryError::Config(format!("unknown log level '{other}'"))),
        }
    }
}

/// Logging capability bound in the container as `logger`.
pub trait Logger: Send + Sync {
    /// Called once when the logger is registered.
    fn init(&self) {}

    fn log(&self, level: LogLevel, message: &str);

    fn fatal(&self, message: &str) {
        self.log(LogLevel::Fatal, message);
    }

    fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }

    fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    fn trace(&self, message: &str) {
        self.log(LogLevel::Trace, message);
    }
}

/// Default `Logger` writing through the global `tracing` subscriber.
#[derive(Debug, Clone, Default)]
pub struct TracingLogger {
    name: Option<String>,
}

impl TracingLogger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tag every line with an application name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
        }
    }
}

impl Logger for TracingLogger {
    fn log(&self, level: LogLevel, message: &str) {
        let app = self.name.as_deref().unwrap_or("stone");
        match level {
            LogLevel::Trace => tracing::trace!(app, "{message}"),
            LogLevel::Debug => tracing::debug!(app, "{message}"),
            LogLevel::Info => tracing::info!(app, "{message}"),
            LogLevel::Warn => tracing::warn!(app, "{message}"),
            LogLevel::Error => tracing::error!(app, "{message}"),
            LogLevel::Fatal => tracing::error!(app, fatal = true, "{message}"),
        }
    }
}
