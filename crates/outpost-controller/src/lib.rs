//! outpost-controller: per-component workers and the registry that owns them.
//!
//! # Architecture
//!
//! ```text
//! ComponentEvent / resync
//!   └── Controller (one Worker per ComponentId)
//!         └── Worker ── run N ── Discoverer::discover()
//!               │                  └── SnapshotEmitter ── ProberBinding
//!               └────────────────────────► UpdateSink
//!                                             │
//! Controller::run_publisher ◄── UpdateStream ─┘
//!   └── EndpointPublisher (current-generation updates only)
//! ```

pub mod error;
pub mod metrics;
pub mod registry;
pub mod worker;

pub use error::{ControllerError, ControllerResult, WorkerError, WorkerResult};
pub use metrics::{ControllerMetrics, MetricsSnapshot, render_prometheus};
pub use registry::{ComponentEvent, Controller, ResyncReport, UpsertOutcome, WorkerStatus};
pub use worker::{DEFAULT_START_GRACE, Worker, WorkerState};
