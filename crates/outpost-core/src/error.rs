//! Error types for component definitions and configuration.

use thiserror::Error;

/// Result type alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating component definitions.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid endpoint address: {0}")]
    InvalidAddress(String),

    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },

    #[error("invalid component {component}: {reason}")]
    InvalidComponent { component: String, reason: String },

    #[error("duplicate component: {0}")]
    DuplicateComponent(String),
}

impl ConfigError {
    pub(crate) fn component(component: impl ToString, reason: impl Into<String>) -> Self {
        Self::InvalidComponent {
            component: component.to_string(),
            reason: reason.into(),
        }
    }
}
