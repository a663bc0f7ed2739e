//! outpostd: the outpost daemon.
//!
//! Assembles the discovery stack in one process:
//! - Probe manager (TCP / HTTP / command executors)
//! - Controller with DNS and HTTP-registry backends
//! - Publish pump into the in-memory service table
//! - File-backed component source, resynced periodically
//! - HTTP status and metrics surface
//!
//! # Usage
//!
//! ```text
//! outpostd run --config /etc/outpost/outpost.toml --listen 0.0.0.0:9464
//! outpostd check --config ./outpost.toml
//! ```

mod api;
mod source;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use outpost_controller::{Controller, ControllerMetrics};
use outpost_core::{OutpostConfig, update_channel};
use outpost_discover::{DiscoverBackends, DnsServiceLookup, HttpRegistryConnector};
use outpost_probe::{DefaultExecutor, ProberManager};
use outpost_publish::ServiceTable;

use crate::api::ApiState;
use crate::source::FileSource;

#[derive(Parser)]
#[command(name = "outpostd", about = "Third-party component discovery daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the controller and serve the status API.
    Run {
        /// Component config file.
        #[arg(long, default_value = "/etc/outpost/outpost.toml")]
        config: PathBuf,

        /// Address for the status and metrics API.
        #[arg(long, default_value = "0.0.0.0:9464")]
        listen: SocketAddr,
    },
    /// Validate a config file and exit.
    Check {
        #[arg(long)]
        config: PathBuf,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,outpost=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Run { config, listen } => run(config, listen).await,
        Command::Check { config } => check(config),
    }
}

fn check(path: PathBuf) -> anyhow::Result<()> {
    let config = OutpostConfig::from_file(&path).with_context(|| format!("invalid config {}", path.display()))?;
    println!("{}: {} component(s) ok", path.display(), config.components.len());
    Ok(())
}

async fn run(config_path: PathBuf, listen: SocketAddr) -> anyhow::Result<()> {
    info!("outpost daemon starting");

    let source = FileSource::new(&config_path);
    let config = source
        .load()
        .with_context(|| format!("loading {}", config_path.display()))?;
    let settings = config.controller.clone();

    // ── Assemble subsystems ────────────────────────────────────

    let (sink, stream) = update_channel(settings.sink_capacity, settings.send_timeout());
    let prober = Arc::new(ProberManager::new(Arc::new(DefaultExecutor)).with_sink(sink.clone()));
    let table = Arc::new(ServiceTable::new());
    let metrics = Arc::new(ControllerMetrics::new());
    let backends = DiscoverBackends::default()
        .with_cluster(Arc::new(DnsServiceLookup::default()))
        .with_registry(Arc::new(HttpRegistryConnector));

    let controller = Arc::new(
        Controller::new(prober, sink, table.clone())
            .with_backends(backends)
            .with_metrics(metrics)
            .with_settings(&settings),
    );
    info!(
        sink_capacity = settings.sink_capacity,
        resync_interval_secs = settings.resync_interval().as_secs(),
        "controller initialized"
    );

    // ── Background tasks ───────────────────────────────────────

    let cancel = CancellationToken::new();
    let pump_cancel = CancellationToken::new();

    let pump = tokio::spawn({
        let controller = controller.clone();
        let cancel = pump_cancel.clone();
        async move { controller.run_publisher(stream, cancel).await }
    });

    let report = controller.resync(config.components).await;
    info!(
        applied = report.applied,
        failed = report.failed,
        "initial components loaded"
    );

    let resync = tokio::spawn(source.run(controller.clone(), settings.resync_interval(), cancel.clone()));

    // ── API server ─────────────────────────────────────────────

    let router = api::build_router(ApiState {
        controller: controller.clone(),
        table,
    });
    let listener = tokio::net::TcpListener::bind(listen)
        .await
        .with_context(|| format!("binding {listen}"))?;
    info!(addr = %listen, "API server listening");

    let server = axum::serve(listener, router).with_graceful_shutdown(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
        }
        info!("shutdown signal received");
    });
    let served = server.await;

    // Workers stop before the pump.
    cancel.cancel();
    let _ = resync.await;
    controller.shutdown().await;
    pump_cancel.cancel();
    let _ = pump.await;

    served?;
    info!("outpost daemon stopped");
    Ok(())
}
