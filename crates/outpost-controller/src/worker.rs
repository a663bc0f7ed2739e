//! Worker: the per-component control loop.
//!
//! A worker owns one discovery strategy at a time and runs it as a single
//! background task. Each launch of that task is a *run* with its own child
//! cancellation token and a generation number that tags every snapshot it
//! emits. Swapping the strategy cancels the current run, waits for it to
//! exit, and launches a new run under the same worker.
//!
//! ```text
//! Created ──start()──► Running ──stop()──► Stopping ──task exit──► Stopped
//!                        │  ▲
//!                        └──┘ swap(): cancel run, await exit, relaunch
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use outpost_core::{ComponentId, ComponentSpec, DiscoveryKind, UpdateSink};
use outpost_discover::{DiscoverError, DiscoverResult, Discoverer, SnapshotEmitter};
use outpost_probe::{ProberBinding, ProberManager};

use crate::error::{WorkerError, WorkerResult};

/// Default window in which an immediate startup failure is detected.
pub const DEFAULT_START_GRACE: Duration = Duration::from_millis(200);

/// Lifecycle state of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Created,
    Running,
    /// Stop requested, task not yet exited.
    Stopping,
    Stopped,
}

/// One launch of the discovery task.
struct RunHandle {
    generation: u64,
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
    binding: Option<ProberBinding>,
    /// Set when the run is cancelled for a swap; its probes carry over.
    retain_probes: Arc<AtomicBool>,
}

struct WorkerInner {
    discoverer: Arc<Discoverer>,
    started: bool,
    run: Option<RunHandle>,
}

/// Runs on task exit, however the task ends: logs, marks the worker
/// stopped, tears down the run's probes, then wakes `wait_stopped`.
struct RunGuard {
    component: ComponentId,
    generation: u64,
    stopped: Arc<AtomicBool>,
    binding: Option<ProberBinding>,
    retain_probes: Arc<AtomicBool>,
    done: watch::Sender<bool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        info!(component = %self.component, generation = self.generation, "discovery task exited");
        self.stopped.store(true, Ordering::SeqCst);
        if !self.retain_probes.load(Ordering::SeqCst) {
            if let Some(binding) = &self.binding {
                binding.stop();
            }
        }
        self.done.send_replace(true);
    }
}

pub struct Worker {
    id: ComponentId,
    sink: UpdateSink,
    prober: Option<Arc<ProberManager>>,
    cancel: CancellationToken,
    start_grace: Duration,
    generations: Arc<AtomicU64>,
    stop_requested: AtomicBool,
    /// Set by the task's own exit, not by `stop`.
    stopped: Arc<AtomicBool>,
    inner: Mutex<WorkerInner>,
}

impl Worker {
    pub fn new(discoverer: Discoverer, sink: UpdateSink) -> Self {
        Self {
            id: discoverer.component().id(),
            sink,
            prober: None,
            cancel: CancellationToken::new(),
            start_grace: DEFAULT_START_GRACE,
            generations: Arc::new(AtomicU64::new(0)),
            stop_requested: AtomicBool::new(false),
            stopped: Arc::new(AtomicBool::new(false)),
            inner: Mutex::new(WorkerInner {
                discoverer: Arc::new(discoverer),
                started: false,
                run: None,
            }),
        }
    }

    /// Probe endpoints through `manager` on runs whose component opts in.
    pub fn with_prober(mut self, manager: Arc<ProberManager>) -> Self {
        self.prober = Some(manager);
        self
    }

    pub fn with_start_grace(mut self, grace: Duration) -> Self {
        self.start_grace = grace;
        self
    }

    /// Draw run generations from a counter shared with other workers, so a
    /// predecessor's leftover snapshots can never pass for this worker's.
    pub fn with_generations(mut self, generations: Arc<AtomicU64>) -> Self {
        self.generations = generations;
        self
    }

    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    /// The definition the current strategy was built from.
    pub fn spec(&self) -> ComponentSpec {
        self.inner.lock().discoverer.component().clone()
    }

    pub fn kind(&self) -> DiscoveryKind {
        self.inner.lock().discoverer.kind()
    }

    /// Generation of the current run; 0 when no run is active.
    pub fn generation(&self) -> u64 {
        self.inner.lock().run.as_ref().map(|r| r.generation).unwrap_or(0)
    }

    /// Launch the discovery task.
    ///
    /// Waits up to the start grace window: a task that fails inside it is
    /// reported as `StartFailed`, one still running afterwards is assumed
    /// healthy. A second call fails with `AlreadyStarted`.
    pub async fn start(&self) -> WorkerResult<()> {
        let handle = {
            let mut inner = self.inner.lock();
            if inner.started {
                return Err(WorkerError::AlreadyStarted(self.id.clone()));
            }
            if self.stop_requested.load(Ordering::SeqCst) {
                return Err(WorkerError::Stopped(self.id.clone()));
            }
            inner.started = true;
            self.launch(&mut inner)
        };
        self.confirm(handle).await
    }

    /// Request cancellation and tear down this component's probes.
    ///
    /// Does not wait for the task to exit; see [`Worker::wait_stopped`].
    /// Calls after the first are no-ops.
    pub fn stop(&self) {
        if self.stop_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();

        let inner = self.inner.lock();
        match &inner.run {
            Some(run) => {
                if let Some(binding) = &run.binding {
                    binding.stop();
                }
            }
            // Never launched: nothing will ever mark it stopped.
            None if !inner.started => self.stopped.store(true, Ordering::SeqCst),
            None => {}
        }
        info!(component = %self.id, "worker stop requested");
    }

    /// Whether the discovery task has actually exited.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> WorkerState {
        let started = self.inner.lock().started;
        match (started, self.is_stop_requested(), self.is_stopped()) {
            (_, _, true) => WorkerState::Stopped,
            (_, true, false) => WorkerState::Stopping,
            (true, false, false) => WorkerState::Running,
            (false, false, false) => WorkerState::Created,
        }
    }

    /// Resolve once the current run's task has exited.
    pub async fn wait_stopped(&self) {
        let done = self.inner.lock().run.as_ref().map(|r| r.done.clone());
        if let Some(mut done) = done {
            // An error means the guard is gone, which also means the task is.
            let _ = done.wait_for(|exited| *exited).await;
        }
    }

    /// Replace the discovery strategy.
    ///
    /// The current run is cancelled and awaited before the new strategy is
    /// launched, so at most one discovery task exists at any time. Probe
    /// history carries over when the new definition still opts into
    /// probing. A worker that was never started only has its strategy
    /// replaced.
    pub async fn swap(&self, discoverer: Discoverer) -> WorkerResult<()> {
        if self.is_stop_requested() {
            return Err(WorkerError::Stopped(self.id.clone()));
        }

        let previous = {
            let mut inner = self.inner.lock();
            inner.discoverer = Arc::new(discoverer);
            inner.run.take()
        };
        if let Some(mut run) = previous {
            debug!(component = %self.id, generation = run.generation, "cancelling run for swap");
            run.retain_probes.store(true, Ordering::SeqCst);
            run.cancel.cancel();
            let _ = run.done.wait_for(|exited| *exited).await;
            let keep = !self.is_stop_requested() && self.spec().uses_static_endpoints;
            if let (Some(binding), false) = (&run.binding, keep) {
                binding.stop();
            }
        }

        let handle = {
            let mut inner = self.inner.lock();
            if self.is_stop_requested() {
                if let Some(manager) = &self.prober {
                    manager.remove_component(&self.id);
                }
                return Err(WorkerError::Stopped(self.id.clone()));
            }
            if !inner.started {
                return Ok(());
            }
            self.launch(&mut inner)
        };
        info!(component = %self.id, kind = %self.kind(), "discovery strategy swapped");
        self.confirm(handle).await
    }

    fn launch(&self, inner: &mut WorkerInner) -> JoinHandle<DiscoverResult<()>> {
        let generation = self.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let discoverer = inner.discoverer.clone();
        let spec = discoverer.component();
        let run_cancel = self.cancel.child_token();

        let binding = match &self.prober {
            Some(manager) if spec.uses_static_endpoints => Some(ProberBinding::new(
                manager.clone(),
                self.id.clone(),
                generation,
                run_cancel.clone(),
            )),
            _ => None,
        };
        let mut emitter =
            SnapshotEmitter::new(self.id.clone(), generation, self.sink.clone(), run_cancel.clone());
        if let Some(binding) = &binding {
            emitter = emitter.with_prober(binding.clone());
        }

        let (done_tx, done_rx) = watch::channel(false);
        let retain_probes = Arc::new(AtomicBool::new(false));
        self.stopped.store(false, Ordering::SeqCst);
        inner.run = Some(RunHandle {
            generation,
            cancel: run_cancel.clone(),
            done: done_rx,
            binding: binding.clone(),
            retain_probes: retain_probes.clone(),
        });

        let guard = RunGuard {
            component: self.id.clone(),
            generation,
            stopped: self.stopped.clone(),
            binding,
            retain_probes,
            done: done_tx,
        };
        info!(component = %self.id, kind = %discoverer.kind(), generation, "discovery task starting");

        tokio::spawn(async move {
            let _guard = guard;
            let result = discoverer.discover(run_cancel, emitter).await;
            if let Err(e) = &result {
                warn!(component = %discoverer.component().id(), generation, error = %e, "discovery task failed");
            }
            result
        })
    }

    async fn confirm(&self, mut handle: JoinHandle<DiscoverResult<()>>) -> WorkerResult<()> {
        match tokio::time::timeout(self.start_grace, &mut handle).await {
            Err(_) => {
                debug!(component = %self.id, "discovery task running past start grace");
                Ok(())
            }
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(source))) => Err(WorkerError::StartFailed {
                component: self.id.clone(),
                source,
            }),
            Ok(Err(join)) => Err(WorkerError::StartFailed {
                component: self.id.clone(),
                source: DiscoverError::Backend(format!("discovery task panicked: {join}")),
            }),
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
