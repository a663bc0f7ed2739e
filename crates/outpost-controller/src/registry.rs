//! Controller: the worker registry.
//!
//! Keeps at most one worker per component. Structural changes (`upsert`,
//! `remove`, `resync`, `shutdown`) are serialized by one async lock; status
//! reads and the publish pump only take the map's read lock.
//!
//! The publish pump forwards an update only if it comes from the current
//! run of a registered worker. Because it publishes while holding the read
//! lock, nothing is published for a component once `remove` has taken it
//! out of the map.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use outpost_core::{
    ComponentId, ComponentSpec, ControllerSettings, DiscoveryKind, EndpointUpdate, UpdateSink, UpdateStream,
};
use outpost_discover::DiscoverBackends;
use outpost_probe::ProberManager;
use outpost_publish::EndpointPublisher;

use crate::error::{ControllerError, ControllerResult};
use crate::metrics::{ControllerMetrics, MetricsSnapshot};
use crate::worker::{DEFAULT_START_GRACE, Worker, WorkerState};

/// A change notification from the component-definition source.
#[derive(Debug, Clone)]
pub enum ComponentEvent {
    Applied(ComponentSpec),
    Deleted(ComponentId),
}

/// What an `upsert` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    /// The running worker's strategy was replaced.
    Swapped,
    /// The previous worker's task had exited; a fresh worker replaced it.
    Restarted,
    /// Same definition as the running worker.
    Unchanged,
}

/// Totals from one `resync` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResyncReport {
    pub applied: usize,
    pub failed: usize,
    pub removed: usize,
}

/// Status of one registered worker.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub component: String,
    pub kind: DiscoveryKind,
    pub state: WorkerState,
    pub generation: u64,
    pub probes: usize,
}

pub struct Controller {
    workers: RwLock<HashMap<ComponentId, Arc<Worker>>>,
    ops: tokio::sync::Mutex<()>,
    backends: DiscoverBackends,
    prober: Arc<ProberManager>,
    publisher: Arc<dyn EndpointPublisher>,
    sink: UpdateSink,
    metrics: Arc<ControllerMetrics>,
    /// Run generations are unique across all workers of this controller.
    generations: Arc<AtomicU64>,
    start_grace: Duration,
}

impl Controller {
    pub fn new(prober: Arc<ProberManager>, sink: UpdateSink, publisher: Arc<dyn EndpointPublisher>) -> Self {
        Self {
            workers: RwLock::new(HashMap::new()),
            ops: tokio::sync::Mutex::new(()),
            backends: DiscoverBackends::default(),
            prober,
            publisher,
            sink,
            metrics: Arc::new(ControllerMetrics::new()),
            generations: Arc::new(AtomicU64::new(0)),
            start_grace: DEFAULT_START_GRACE,
        }
    }

    pub fn with_backends(mut self, backends: DiscoverBackends) -> Self {
        self.backends = backends;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<ControllerMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_settings(mut self, settings: &ControllerSettings) -> Self {
        self.start_grace = settings.start_grace();
        self
    }

    pub fn with_start_grace(mut self, grace: Duration) -> Self {
        self.start_grace = grace;
        self
    }

    pub fn prober(&self) -> &Arc<ProberManager> {
        &self.prober
    }

    /// Create, swap or restart the worker for `spec`.
    ///
    /// An invalid definition or a missing backend fails with `Config` and
    /// leaves the registry untouched.
    pub async fn upsert(&self, spec: ComponentSpec) -> ControllerResult<UpsertOutcome> {
        let _ops = self.ops.lock().await;
        let id = spec.id();
        let discoverer = self.backends.build(&spec).map_err(|source| ControllerError::Config {
            component: id.clone(),
            source,
        })?;
        self.metrics.upsert();

        let existing = self.workers.read().get(&id).cloned();
        if let Some(worker) = &existing {
            if !worker.is_stopped() {
                if worker.spec() == spec {
                    debug!(component = %id, "definition unchanged");
                    return Ok(UpsertOutcome::Unchanged);
                }
                worker.swap(discoverer).await.inspect_err(|_| self.metrics.start_failure())?;
                self.metrics.swap();
                return Ok(UpsertOutcome::Swapped);
            }
            worker.stop();
        }

        let worker = Arc::new(
            Worker::new(discoverer, self.sink.clone())
                .with_prober(self.prober.clone())
                .with_start_grace(self.start_grace)
                .with_generations(self.generations.clone()),
        );
        // Registered before starting so the first snapshot is not discarded.
        self.workers.write().insert(id.clone(), worker.clone());
        if let Err(e) = worker.start().await {
            self.metrics.start_failure();
            self.workers.write().remove(&id);
            warn!(component = %id, error = %e, "worker failed to start");
            return Err(e.into());
        }
        self.metrics.start();

        if existing.is_some() {
            info!(component = %id, "exited worker replaced");
            Ok(UpsertOutcome::Restarted)
        } else {
            info!(component = %id, kind = %spec.kind(), "worker registered");
            Ok(UpsertOutcome::Created)
        }
    }

    /// Stop and unregister the worker for `id`.
    pub async fn remove(&self, id: &ComponentId) -> ControllerResult<()> {
        let _ops = self.ops.lock().await;
        let worker = self
            .workers
            .write()
            .remove(id)
            .ok_or_else(|| ControllerError::NotFound(id.clone()))?;
        worker.stop();
        self.publisher.withdraw(id);
        self.metrics.removal();
        info!(component = %id, "worker removed");
        Ok(())
    }

    /// Apply one notification. Deleting an unknown component is not an error.
    pub async fn handle_event(&self, event: ComponentEvent) -> ControllerResult<()> {
        match event {
            ComponentEvent::Applied(spec) => self.upsert(spec).await.map(|_| ()),
            ComponentEvent::Deleted(id) => match self.remove(&id).await {
                Err(ControllerError::NotFound(_)) => {
                    debug!(component = %id, "delete for unknown component ignored");
                    Ok(())
                }
                other => other,
            },
        }
    }

    /// Bring the registry in line with a full list of definitions.
    ///
    /// Every spec is upserted (failures are logged and counted) and every
    /// registered component missing from the list is removed.
    pub async fn resync(&self, specs: Vec<ComponentSpec>) -> ResyncReport {
        let mut report = ResyncReport::default();
        let desired: HashSet<ComponentId> = specs.iter().map(|s| s.id()).collect();

        for spec in specs {
            let id = spec.id();
            match self.upsert(spec).await {
                Ok(_) => report.applied += 1,
                Err(e) => {
                    warn!(component = %id, error = %e, "resync upsert failed");
                    report.failed += 1;
                }
            }
        }

        let stale: Vec<ComponentId> = self
            .workers
            .read()
            .keys()
            .filter(|id| !desired.contains(*id))
            .cloned()
            .collect();
        for id in stale {
            if self.remove(&id).await.is_ok() {
                report.removed += 1;
            }
        }

        debug!(
            applied = report.applied,
            failed = report.failed,
            removed = report.removed,
            "resync complete"
        );
        report
    }

    /// Forward `update` to the publisher if it belongs to a current run.
    pub fn accept(&self, update: EndpointUpdate) -> bool {
        let workers = self.workers.read();
        match workers.get(&update.component) {
            Some(worker) if !worker.is_stop_requested() && worker.generation() == update.generation => {
                self.publisher.publish(&update.component, &update.endpoints);
                self.metrics.published();
                true
            }
            _ => {
                debug!(
                    component = %update.component,
                    generation = update.generation,
                    "discarding stale update"
                );
                self.metrics.stale();
                false
            }
        }
    }

    /// Drain the update stream into the publisher until cancelled or every
    /// sink is gone.
    pub async fn run_publisher(&self, mut stream: UpdateStream, cancel: CancellationToken) {
        info!("publish pump started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                update = stream.recv() => match update {
                    Some(update) => {
                        self.accept(update);
                    }
                    None => break,
                },
            }
        }
        info!("publish pump stopped");
    }

    pub fn contains(&self, id: &ComponentId) -> bool {
        self.workers.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.workers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.read().is_empty()
    }

    pub fn worker_state(&self, id: &ComponentId) -> ControllerResult<WorkerState> {
        self.workers
            .read()
            .get(id)
            .map(|w| w.state())
            .ok_or_else(|| ControllerError::NotFound(id.clone()))
    }

    /// Status of every registered worker, sorted by component.
    pub fn status(&self) -> Vec<WorkerStatus> {
        let workers = self.workers.read();
        let mut ids: Vec<&ComponentId> = workers.keys().collect();
        ids.sort();
        ids.into_iter()
            .map(|id| {
                let worker = &workers[id];
                WorkerStatus {
                    component: id.to_string(),
                    kind: worker.kind(),
                    state: worker.state(),
                    generation: worker.generation(),
                    probes: self.prober.probe_count(id),
                }
            })
            .collect()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        let probes = self
            .prober
            .components()
            .iter()
            .map(|id| self.prober.probe_count(id))
            .sum::<usize>();
        MetricsSnapshot {
            sink_dropped: self.sink.dropped(),
            workers: self.len() as u64,
            probes: probes as u64,
            ..self.metrics.snapshot()
        }
    }

    /// Stop every worker, wait for their tasks, then stop the prober.
    pub async fn shutdown(&self) {
        let _ops = self.ops.lock().await;
        let drained: Vec<(ComponentId, Arc<Worker>)> = self.workers.write().drain().collect();
        for (_, worker) in &drained {
            worker.stop();
        }
        for (id, worker) in drained {
            worker.wait_stopped().await;
            self.publisher.withdraw(&id);
        }
        self.prober.stop();
        info!("controller shut down");
    }
}
