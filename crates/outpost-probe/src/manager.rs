//! Prober manager: one background probe task per endpoint.
//!
//! Components opted into probing (`uses_static_endpoints`) hand every
//! discovery snapshot to the manager. The manager diffs the snapshot against
//! its running probes: new endpoints get a probe, vanished endpoints lose
//! theirs, and unchanged endpoints keep their task and accumulated counters.
//! Whenever a probe changes an endpoint's health, the component's full
//! snapshot is republished on the update sink.
//!
//! Snapshots of one component are built and sent under that component's
//! publish lock, shared with the worker's emitter through
//! [`ProberBinding::observe`]. The sink therefore never receives an older
//! view of a component after a newer one.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use outpost_core::{
    ComponentId, ComponentSpec, Endpoint, EndpointAddr, EndpointUpdate, HealthStatus, ProbeSpec, SendOutcome,
    UpdateSink,
};

use crate::checker::{HealthTracker, ProbeResult};
use crate::executor::ProbeExecutor;

/// Point-in-time view of one endpoint's probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeStats {
    pub status: HealthStatus,
    pub consecutive_successes: u32,
    pub consecutive_failures: u32,
}

/// Held while a component snapshot is built and sent.
pub type PublishPermit = OwnedMutexGuard<()>;

/// Health bookkeeping shared between a component's probe tasks.
struct ComponentHealth {
    id: ComponentId,
    state: Mutex<HealthState>,
    publish: Arc<AsyncMutex<()>>,
}

struct HealthState {
    generation: u64,
    endpoints: Vec<Endpoint>,
    trackers: HashMap<EndpointAddr, HealthTracker>,
}

impl ComponentHealth {
    /// Record a result; returns whether the endpoint's status changed.
    fn record(&self, addr: &EndpointAddr, result: ProbeResult) -> bool {
        let mut state = self.state.lock();
        let Some(tracker) = state.trackers.get_mut(addr) else {
            return false;
        };
        let previous = tracker.status();
        let current = tracker.record(result);
        if previous == current {
            return false;
        }

        if current == HealthStatus::Unhealthy {
            warn!(component = %self.id, endpoint = %addr, from = ?previous, "endpoint became unhealthy");
        } else {
            info!(component = %self.id, endpoint = %addr, from = ?previous, to = ?current, "endpoint health changed");
        }
        true
    }

    /// The last discovered endpoint set with current health applied.
    fn snapshot(&self) -> EndpointUpdate {
        let state = self.state.lock();
        EndpointUpdate {
            component: self.id.clone(),
            generation: state.generation,
            endpoints: annotate(&state.trackers, state.endpoints.clone()),
        }
    }
}

fn annotate(trackers: &HashMap<EndpointAddr, HealthTracker>, mut endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
    for ep in &mut endpoints {
        if let Some(tracker) = trackers.get(&ep.address) {
            ep.health = Some(tracker.status());
        }
    }
    endpoints
}

struct ProbeTask {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ProbeTask {
    fn shutdown(self) {
        self.cancel.cancel();
        self.handle.abort();
    }
}

struct ComponentProbes {
    spec: ProbeSpec,
    health: Arc<ComponentHealth>,
    tasks: HashMap<EndpointAddr, ProbeTask>,
}

impl ComponentProbes {
    fn shutdown(self) {
        for (_, task) in self.tasks {
            task.shutdown();
        }
    }
}

#[derive(Default)]
struct ManagerState {
    components: HashMap<ComponentId, ComponentProbes>,
    publish_locks: HashMap<ComponentId, Arc<AsyncMutex<()>>>,
    stopped: bool,
}

/// Owns the active probes of every component opted into probing.
pub struct ProberManager {
    executor: Arc<dyn ProbeExecutor>,
    /// Health transitions are republished here.
    sink: Option<UpdateSink>,
    state: Mutex<ManagerState>,
}

impl ProberManager {
    pub fn new(executor: Arc<dyn ProbeExecutor>) -> Self {
        Self {
            executor,
            sink: None,
            state: Mutex::new(ManagerState::default()),
        }
    }

    /// Republish a component's snapshot on `sink` whenever probe health changes.
    pub fn with_sink(mut self, sink: UpdateSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Reconcile a component's probes with its current endpoint set.
    ///
    /// Redundant calls with an unchanged endpoint set leave every probe and
    /// its counters untouched. A component without an active probe spec has
    /// all of its probes removed.
    pub fn add_third_component(&self, spec: &ComponentSpec, endpoints: &[Endpoint]) {
        self.reconcile(spec, endpoints, 0, None);
    }

    fn reconcile(
        &self,
        spec: &ComponentSpec,
        endpoints: &[Endpoint],
        generation: u64,
        run: Option<&CancellationToken>,
    ) {
        let id = spec.id();
        let mut state = self.state.lock();
        if state.stopped || run.is_some_and(|r| r.is_cancelled()) {
            return;
        }

        let Some(probe) = spec.active_probe() else {
            state.publish_locks.remove(&id);
            if let Some(existing) = state.components.remove(&id) {
                existing.shutdown();
                debug!(component = %id, "probing disabled, probes removed");
            }
            return;
        };

        // A changed probe config invalidates the accumulated history.
        if state.components.get(&id).is_some_and(|c| c.spec != *probe) {
            if let Some(old) = state.components.remove(&id) {
                old.shutdown();
                debug!(component = %id, "probe config changed, probes reset");
            }
        }

        let publish = state.publish_locks.entry(id.clone()).or_default().clone();
        let entry = state.components.entry(id.clone()).or_insert_with(|| ComponentProbes {
            spec: probe.clone(),
            health: Arc::new(ComponentHealth {
                id: id.clone(),
                state: Mutex::new(HealthState {
                    generation,
                    endpoints: Vec::new(),
                    trackers: HashMap::new(),
                }),
                publish,
            }),
            tasks: HashMap::new(),
        });

        let desired: HashSet<&EndpointAddr> = endpoints.iter().map(|e| &e.address).collect();

        let stale: Vec<EndpointAddr> = entry
            .tasks
            .keys()
            .filter(|addr| !desired.contains(addr))
            .cloned()
            .collect();

        let mut health = entry.health.state.lock();
        for addr in &stale {
            if let Some(task) = entry.tasks.remove(addr) {
                task.shutdown();
            }
            health.trackers.remove(addr);
            debug!(component = %id, endpoint = %addr, "probe removed");
        }

        for addr in desired {
            if entry.tasks.contains_key(addr) {
                continue;
            }
            health.trackers.insert(addr.clone(), HealthTracker::new(probe));
            let cancel = CancellationToken::new();
            let handle = tokio::spawn(run_probe(
                self.executor.clone(),
                entry.health.clone(),
                addr.clone(),
                probe.clone(),
                self.sink.clone(),
                cancel.clone(),
            ));
            entry.tasks.insert(addr.clone(), ProbeTask { cancel, handle });
            debug!(component = %id, endpoint = %addr, "probe started");
        }

        health.generation = generation;
        health.endpoints = endpoints.to_vec();
    }

    /// Apply the current probe health to a snapshot of this component.
    pub fn annotate(&self, id: &ComponentId, endpoints: Vec<Endpoint>) -> Vec<Endpoint> {
        let state = self.state.lock();
        match state.components.get(id) {
            Some(entry) => annotate(&entry.health.state.lock().trackers, endpoints),
            None => endpoints,
        }
    }

    fn publish_lock(&self, id: &ComponentId, run: &CancellationToken) -> Arc<AsyncMutex<()>> {
        let mut state = self.state.lock();
        if state.stopped || run.is_cancelled() {
            // Nothing will be probed; don't register a lock for it.
            return Arc::default();
        }
        state.publish_locks.entry(id.clone()).or_default().clone()
    }

    /// Tear down every probe of one component. No-op if it has none.
    pub fn remove_component(&self, id: &ComponentId) {
        let removed = {
            let mut state = self.state.lock();
            state.publish_locks.remove(id);
            state.components.remove(id)
        };
        if let Some(entry) = removed {
            let count = entry.tasks.len();
            entry.shutdown();
            info!(component = %id, probes = count, "component probes stopped");
        }
    }

    /// Tear down all probes and refuse further work. Idempotent.
    pub fn stop(&self) {
        let drained: Vec<(ComponentId, ComponentProbes)> = {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.publish_locks.clear();
            state.components.drain().collect()
        };
        for (id, entry) in drained {
            debug!(component = %id, "component probes stopped");
            entry.shutdown();
        }
        info!("prober manager stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.state.lock().stopped
    }

    /// Number of active probes for a component.
    pub fn probe_count(&self, id: &ComponentId) -> usize {
        self.state
            .lock()
            .components
            .get(id)
            .map(|c| c.tasks.len())
            .unwrap_or(0)
    }

    /// Components that currently have probes.
    pub fn components(&self) -> Vec<ComponentId> {
        self.state.lock().components.keys().cloned().collect()
    }

    pub fn probe_stats(&self, id: &ComponentId, addr: &EndpointAddr) -> Option<ProbeStats> {
        let state = self.state.lock();
        let entry = state.components.get(id)?;
        let health = entry.health.state.lock();
        health.trackers.get(addr).map(|t| ProbeStats {
            status: t.status(),
            consecutive_successes: t.consecutive_successes(),
            consecutive_failures: t.consecutive_failures(),
        })
    }
}

impl Drop for ProberManager {
    fn drop(&mut self) {
        for (_, entry) in self.state.get_mut().components.drain() {
            entry.shutdown();
        }
    }
}

/// A worker run's handle on the shared prober manager.
///
/// Snapshots fed through a binding whose run has been cancelled are ignored,
/// so a discovery task that is still winding down cannot resurrect probes
/// that `stop` already tore down.
#[derive(Clone)]
pub struct ProberBinding {
    manager: Arc<ProberManager>,
    component: ComponentId,
    generation: u64,
    run: CancellationToken,
}

impl ProberBinding {
    pub fn new(
        manager: Arc<ProberManager>,
        component: ComponentId,
        generation: u64,
        run: CancellationToken,
    ) -> Self {
        Self {
            manager,
            component,
            generation,
            run,
        }
    }

    /// Reconcile probes with a snapshot and return it with health applied.
    ///
    /// Hold the returned permit until the snapshot has been sent.
    pub async fn observe(&self, spec: &ComponentSpec, endpoints: Vec<Endpoint>) -> (Vec<Endpoint>, PublishPermit) {
        let permit = self
            .manager
            .publish_lock(&self.component, &self.run)
            .lock_owned()
            .await;
        self.manager
            .reconcile(spec, &endpoints, self.generation, Some(&self.run));
        (self.manager.annotate(&self.component, endpoints), permit)
    }

    /// Tear down this component's probes. Idempotent.
    pub fn stop(&self) {
        self.manager.remove_component(&self.component);
    }

    pub fn manager(&self) -> &Arc<ProberManager> {
        &self.manager
    }
}

/// The probe loop for a single endpoint.
async fn run_probe(
    executor: Arc<dyn ProbeExecutor>,
    health: Arc<ComponentHealth>,
    addr: EndpointAddr,
    spec: ProbeSpec,
    sink: Option<UpdateSink>,
    cancel: CancellationToken,
) {
    let target = spec.port.map(|p| addr.with_port(p)).unwrap_or_else(|| addr.clone());
    let mut ticker = tokio::time::interval(spec.interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // A health change whose republish the sink dropped.
    let mut unsent = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = executor.probe(&target, &spec) => result,
        };

        if !health.record(&addr, result) && !unsent {
            continue;
        }
        let Some(sink) = &sink else {
            continue;
        };
        let _permit = tokio::select! {
            _ = cancel.cancelled() => break,
            permit = health.publish.clone().lock_owned() => permit,
        };
        if cancel.is_cancelled() {
            break;
        }
        unsent = sink.send(health.snapshot()).await == SendOutcome::Dropped;
    }

    debug!(component = %health.id, endpoint = %addr, "probe loop exited");
}
