//! File-backed component source: re-reads the config and resyncs.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use outpost_controller::{Controller, ResyncReport};
use outpost_core::{ConfigResult, OutpostConfig};

pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn load(&self) -> ConfigResult<OutpostConfig> {
        OutpostConfig::from_file(&self.path)
    }

    /// Load the file and resync the controller with it.
    ///
    /// A file that fails to load leaves the registry as it is.
    pub async fn sync_once(&self, controller: &Controller) -> Option<ResyncReport> {
        match self.load() {
            Ok(config) => Some(controller.resync(config.components).await),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "component config reload failed");
                None
            }
        }
    }

    /// Resync every `interval` until cancelled. The first pass happens
    /// one interval in.
    pub async fn run(self, controller: Arc<Controller>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(path = %self.path.display(), interval_secs = interval.as_secs(), "component resync loop started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Some(report) = self.sync_once(&controller).await {
                if report.failed > 0 || report.removed > 0 {
                    info!(
                        applied = report.applied,
                        failed = report.failed,
                        removed = report.removed,
                        "component resync"
                    );
                }
            }
        }
        info!("component resync loop stopped");
    }
}
