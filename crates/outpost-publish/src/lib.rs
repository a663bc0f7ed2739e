//! outpost-publish: where discovered endpoints end up.
//!
//! The controller drains the update stream and hands each accepted
//! snapshot to an [`EndpointPublisher`]. [`ServiceTable`] is the built-in
//! publisher used by the daemon.

pub mod table;

use outpost_core::{ComponentId, Endpoint};

pub use table::{ComponentSummary, ServiceTable, TableStats};

/// Receives full endpoint snapshots for components.
pub trait EndpointPublisher: Send + Sync {
    /// Replace the published endpoint set of `component`.
    fn publish(&self, component: &ComponentId, endpoints: &[Endpoint]);

    /// Remove `component` from the published set.
    fn withdraw(&self, component: &ComponentId);
}
