//! Discovery error types.

use thiserror::Error;

use outpost_core::{ConfigError, DiscoveryKind};

/// Errors that end (or prevent) a discovery run.
#[derive(Debug, Error)]
pub enum DiscoverError {
    #[error("invalid component definition: {0}")]
    Config(#[from] ConfigError),

    #[error("no {0} backend configured")]
    NoBackend(DiscoveryKind),

    #[error("backend error: {0}")]
    Backend(String),

    #[error("external registry unavailable after {attempts} connect attempts: {last_error}")]
    RegistryUnavailable { attempts: u32, last_error: String },

    #[error("update sink closed")]
    SinkClosed,

    #[error("discovery cancelled")]
    Cancelled,
}

pub type DiscoverResult<T> = Result<T, DiscoverError>;
