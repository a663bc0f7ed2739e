//! Controller error types.

use thiserror::Error;

use outpost_core::ComponentId;
use outpost_discover::DiscoverError;

/// Worker lifecycle misuse and startup failures.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("worker {0} already started")]
    AlreadyStarted(ComponentId),

    #[error("worker {0} is stopped")]
    Stopped(ComponentId),

    #[error("worker {component} failed to start: {source}")]
    StartFailed {
        component: ComponentId,
        #[source]
        source: DiscoverError,
    },
}

/// Errors surfaced by registry operations.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("invalid component {component}: {source}")]
    Config {
        component: ComponentId,
        #[source]
        source: DiscoverError,
    },

    #[error("component not found: {0}")]
    NotFound(ComponentId),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}

pub type WorkerResult<T> = Result<T, WorkerError>;
pub type ControllerResult<T> = Result<T, ControllerError>;
