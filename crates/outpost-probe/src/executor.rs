//! Probe executors: perform one health check attempt against an endpoint.
//!
//! The prober manager only depends on the [`ProbeExecutor`] contract.
//! [`DefaultExecutor`] covers the built-in protocols: TCP connect, HTTP GET
//! (2xx is healthy) and a local command (exit status 0 is healthy). Every
//! attempt is bounded by the probe's timeout.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use outpost_core::{EndpointAddr, ProbeProtocol, ProbeSpec};

use crate::checker::ProbeResult;

/// Performs a single probe attempt.
///
/// Implementations never return errors: anything that prevents a verdict
/// is reported as [`ProbeResult::Failed`].
#[async_trait]
pub trait ProbeExecutor: Send + Sync {
    async fn probe(&self, target: &EndpointAddr, spec: &ProbeSpec) -> ProbeResult;
}

/// Dispatches on the probe's protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExecutor;

#[async_trait]
impl ProbeExecutor for DefaultExecutor {
    async fn probe(&self, target: &EndpointAddr, spec: &ProbeSpec) -> ProbeResult {
        let timeout = spec.timeout();
        match spec.protocol {
            ProbeProtocol::Tcp => tcp_probe(target, timeout).await,
            ProbeProtocol::Http => http_probe(target, spec.http_path(), timeout).await,
            ProbeProtocol::Command => command_probe(&spec.command, target, timeout).await,
        }
    }
}

/// Healthy if a TCP connection can be established within `timeout`.
pub async fn tcp_probe(target: &EndpointAddr, timeout: Duration) -> ProbeResult {
    let connect = tokio::net::TcpStream::connect((target.host.as_str(), target.port));
    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(_)) => ProbeResult::Healthy,
        Ok(Err(e)) => {
            debug!(error = %e, %target, "tcp probe connection failed");
            ProbeResult::Failed
        }
        Err(_) => {
            debug!(%target, "tcp probe timed out");
            ProbeResult::Failed
        }
    }
}

/// Perform an HTTP GET against `target` + `path`.
///
/// Returns `Healthy` for 2xx, `Unhealthy` for other statuses, and `Failed`
/// if the connection fails or times out.
pub async fn http_probe(target: &EndpointAddr, path: &str, timeout: Duration) -> ProbeResult {
    let authority = target.to_string();
    let uri = format!("http://{authority}{path}");

    let result = tokio::time::timeout(timeout, async {
        let stream =
            match tokio::net::TcpStream::connect((target.host.as_str(), target.port)).await {
                Ok(s) => s,
                Err(e) => {
                    debug!(error = %e, %uri, "http probe connection failed");
                    return ProbeResult::Failed;
                }
            };

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = match hyper::client::conn::http1::handshake(io).await {
            Ok(pair) => pair,
            Err(e) => {
                debug!(error = %e, %uri, "http probe handshake failed");
                return ProbeResult::Failed;
            }
        };

        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = match http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", &authority)
            .header("user-agent", "outpost-probe/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
        {
            Ok(req) => req,
            Err(e) => {
                debug!(error = %e, %uri, "http probe request invalid");
                return ProbeResult::Failed;
            }
        };

        match sender.send_request(req).await {
            Ok(resp) if resp.status().is_success() => ProbeResult::Healthy,
            Ok(resp) => {
                debug!(status = %resp.status(), %uri, "http probe non-2xx");
                ProbeResult::Unhealthy
            }
            Err(e) => {
                debug!(error = %e, %uri, "http probe request failed");
                ProbeResult::Failed
            }
        }
    })
    .await;

    result.unwrap_or_else(|_| {
        debug!(%uri, "http probe timed out");
        ProbeResult::Failed
    })
}

/// Run a local command; exit status 0 is healthy.
///
/// The target is passed as `OUTPOST_PROBE_HOST` / `OUTPOST_PROBE_PORT`.
pub async fn command_probe(command: &[String], target: &EndpointAddr, timeout: Duration) -> ProbeResult {
    let Some((program, args)) = command.split_first() else {
        return ProbeResult::Failed;
    };

    let child = tokio::process::Command::new(program)
        .args(args)
        .env("OUTPOST_PROBE_HOST", &target.host)
        .env("OUTPOST_PROBE_PORT", target.port.to_string())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    match tokio::time::timeout(timeout, child).await {
        Ok(Ok(status)) if status.success() => ProbeResult::Healthy,
        Ok(Ok(status)) => {
            debug!(%program, %target, code = ?status.code(), "command probe exited non-zero");
            ProbeResult::Unhealthy
        }
        Ok(Err(e)) => {
            debug!(error = %e, %program, "command probe could not be spawned");
            ProbeResult::Failed
        }
        Err(_) => {
            debug!(%program, %target, "command probe timed out");
            ProbeResult::Failed
        }
    }
}
