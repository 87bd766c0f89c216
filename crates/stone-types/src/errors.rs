//! # Error Types
//!
//! The error taxonomy shared by every runtime crate.
//!
//! ## Propagation Policy
//!
//! | Error | Kind | Recovered by kernel error handler |
//! |-------|------|-----------------------------------|
//! | `Configuration` | programmer error | never |
//! | `Resolution` | programmer error | never |
//! | `Alias` | programmer error | never |
//! | `MiddlewareType` | programmer error | never |
//! | `Type` | programmer error | never |
//! | `Handling` | user code failure | yes, when configured |

use thiserror::Error;

/// Convenience alias used across the workspace.
pub type Result<T, E = StoneError> = std::result::Result<T, E>;

/// Failures raised by the dependency container when a key cannot be made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// Nothing is bound under this key (after alias translation) and no
    /// factory is known for it.
    #[error("No binding registered for key '{0}'")]
    Unbound(String),

    /// The binding exists but does not produce the requested type.
    #[error("Binding '{key}' does not resolve to {expected}")]
    TypeMismatch { key: String, expected: String },
}

/// Failures raised when registering aliases.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AliasError {
    /// An alias equal to its own key.
    #[error("Key '{0}' cannot be aliased to itself")]
    SelfAlias(String),

    /// Aliasing a key nothing is bound to.
    #[error("Cannot alias unbound key '{0}'")]
    Unbound(String),
}

/// Failures raised by the pipeline engine for malformed stages.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MiddlewareTypeError {
    /// The resolved stage does not expose the target method.
    #[error("No method named '{method}' on stage '{stage}'")]
    MissingMethod { method: String, stage: String },

    /// The stage reference is neither a function, a class nor an alias.
    #[error("Stage '{0}' is not a function, a class or an alias")]
    Unresolvable(String),

    /// The stage kind cannot run under the selected execution strategy.
    #[error("Stage '{stage}' cannot run in {mode} mode")]
    ModeMismatch { stage: String, mode: String },
}

/// Umbrella error for the Stone runtime.
#[derive(Debug, Error)]
pub enum StoneError {
    /// Malformed blueprint path or missing required configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    Alias(#[from] AliasError),

    #[error(transparent)]
    MiddlewareType(#[from] MiddlewareTypeError),

    /// A value does not have the shape an operation requires
    /// (absent incoming event, missing handler, non-class metadata target).
    #[error("Type error: {0}")]
    Type(String),

    /// Anything raised by handler, provider or middleware code.
    #[error("Handling error: {0}")]
    Handling(#[from] anyhow::Error),
}

impl StoneError {
    /// Build a configuration error.
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Build a type error.
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::Type(msg.into())
    }

    /// Wrap a user failure.
    pub fn handling(msg: impl std::fmt::Display) -> Self {
        Self::Handling(anyhow::anyhow!("{msg}"))
    }

    /// Only user failures may be intercepted by a configured error handler.
    /// Every other variant is a programmer error and fails fast.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Handling(_))
    }
}

impl From<serde_json::Error> for StoneError {
    fn from(err: serde_json::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_handling_is_recoverable() {
        assert!(StoneError::handling("boom").is_recoverable());
        assert!(!StoneError::configuration("x").is_recoverable());
        assert!(!StoneError::type_error("x").is_recoverable());
        assert!(!StoneError::from(AliasError::SelfAlias("a".into())).is_recoverable());
        assert!(!StoneError::from(ResolutionError::Unbound("a".into())).is_recoverable());
    }

    #[test]
    fn test_error_messages() {
        let err = StoneError::from(AliasError::SelfAlias("logger".into()));
        assert_eq!(err.to_string(), "Key 'logger' cannot be aliased to itself");

        let err = StoneError::from(MiddlewareTypeError::MissingMethod {
            method: "process".into(),
            stage: "Auth".into(),
        });
        assert_eq!(err.to_string(), "No method named 'process' on stage 'Auth'");
    }

    #[test]
    fn test_anyhow_converts_to_handling() {
        let err: StoneError = anyhow::anyhow!("database down").into();
        assert!(matches!(err, StoneError::Handling(_)));
        assert_eq!(err.to_string(), "Handling error: database down");
    }
}
