//! Snapshot emitter: the per-run handle discovery variants publish through.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use outpost_core::{ComponentId, ComponentSpec, Endpoint, EndpointUpdate, SendOutcome, UpdateSink};
use outpost_probe::ProberBinding;

use crate::error::{DiscoverError, DiscoverResult};

/// How soon a variant with nothing else to do re-sends a dropped snapshot.
pub const REDELIVER_AFTER: Duration = Duration::from_secs(1);

/// Tags snapshots with the run generation, feeds them through the prober
/// binding (if any), and pushes them onto the update sink.
#[derive(Clone)]
pub struct SnapshotEmitter {
    component: ComponentId,
    generation: u64,
    sink: UpdateSink,
    prober: Option<ProberBinding>,
    cancel: CancellationToken,
}

impl SnapshotEmitter {
    pub fn new(
        component: ComponentId,
        generation: u64,
        sink: UpdateSink,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            component,
            generation,
            sink,
            prober: None,
            cancel,
        }
    }

    pub fn with_prober(mut self, binding: ProberBinding) -> Self {
        self.prober = Some(binding);
        self
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Publish a full endpoint snapshot.
    ///
    /// Fails with `Cancelled` once the run has been cancelled, so nothing is
    /// emitted for a component after its worker was told to stop. A
    /// `Dropped` outcome means the snapshot never reached the publisher and
    /// the caller must send it again.
    pub async fn emit(&self, spec: &ComponentSpec, endpoints: Vec<Endpoint>) -> DiscoverResult<SendOutcome> {
        if self.cancel.is_cancelled() {
            return Err(DiscoverError::Cancelled);
        }

        // Held across the send so probe republishes cannot overtake this snapshot.
        let (endpoints, _permit) = match &self.prober {
            Some(binding) => {
                let (endpoints, permit) = binding.observe(spec, endpoints).await;
                (endpoints, Some(permit))
            }
            None => (endpoints, None),
        };
        debug!(
            component = %self.component,
            generation = self.generation,
            endpoints = endpoints.len(),
            "emitting endpoint snapshot"
        );

        let outcome = self
            .sink
            .send(EndpointUpdate {
                component: self.component.clone(),
                generation: self.generation,
                endpoints,
            })
            .await;
        match outcome {
            SendOutcome::Closed => Err(DiscoverError::SinkClosed),
            other => Ok(other),
        }
    }
}
