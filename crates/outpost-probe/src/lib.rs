//! outpost-probe: active health probing for third-party endpoints.
//!
//! # Architecture
//!
//! ```text
//! ProberManager
//!   ├── per component: ProbeSpec + shared health table
//!   │   └── per endpoint: background probe task
//!   │       ├── ProbeExecutor::probe() → ProbeResult
//!   │       └── HealthTracker (consecutive successes / failures)
//!   └── optional UpdateSink for republishing health transitions
//! ```
//!
//! Probes for different endpoints are independent tasks: one endpoint
//! failing never cancels or restarts its siblings.

pub mod checker;
pub mod executor;
pub mod manager;

pub use checker::{HealthTracker, ProbeResult};
pub use executor::{DefaultExecutor, ProbeExecutor};
pub use manager::{ProbeStats, ProberBinding, ProberManager, PublishPermit};
