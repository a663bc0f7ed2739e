//! outpost-core: shared types for third-party component discovery.
//!
//! Defines the component definitions handed to workers, the endpoint value
//! objects they produce, the `outpost.toml` config format, and the bounded
//! update sink that carries endpoint snapshots from workers to the
//! publisher.

pub mod config;
pub mod duration;
pub mod error;
pub mod sink;
pub mod types;

pub use config::{ControllerSettings, OutpostConfig};
pub use duration::{parse_duration, parse_period};
pub use error::{ConfigError, ConfigResult};
pub use sink::{EndpointUpdate, SendOutcome, UpdateSink, UpdateStream, update_channel};
pub use types::*;
