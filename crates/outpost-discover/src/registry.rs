//! External registry discovery: a connect/fetch/close backend session.
//!
//! Unlike the other variants, this one retries internally: a lost or
//! refused connection is retried with exponential backoff, and the run only
//! fails once `max_attempts` consecutive connects have failed.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http_body_util::BodyExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use outpost_core::{ComponentSpec, DiscoveryKind, DiscoverySource, Endpoint, EndpointAddr, SendOutcome, parse_period};

use crate::Discover;
use crate::backoff::{Backoff, BackoffPolicy};
use crate::cluster_service::ServiceInstance;
use crate::emitter::{REDELIVER_AFTER, SnapshotEmitter};
use crate::error::{DiscoverError, DiscoverResult};

/// Where a component lives in the external registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryTarget {
    pub servers: Vec<String>,
    pub key: String,
    pub poll_interval: Duration,
}

/// Opens sessions against the external registry.
#[async_trait]
pub trait RegistryConnector: Send + Sync {
    async fn connect(&self, target: &RegistryTarget) -> DiscoverResult<Box<dyn RegistrySession>>;
}

/// A live registry connection.
#[async_trait]
pub trait RegistrySession: Send {
    /// Wait for the next change cycle and return the full instance list.
    async fn fetch(&mut self) -> DiscoverResult<Vec<ServiceInstance>>;

    async fn close(&mut self);
}

pub struct ExternalRegistryDiscover {
    spec: ComponentSpec,
    connector: Arc<dyn RegistryConnector>,
    target: RegistryTarget,
    policy: BackoffPolicy,
}

impl ExternalRegistryDiscover {
    pub fn new(spec: ComponentSpec, connector: Arc<dyn RegistryConnector>, policy: BackoffPolicy) -> Self {
        let (target, policy) = match &spec.discovery {
            DiscoverySource::ExternalRegistry {
                servers,
                key,
                poll_interval,
                max_connect_attempts,
            } => (
                RegistryTarget {
                    servers: servers.clone(),
                    key: key.clone(),
                    poll_interval: poll_interval
                        .as_deref()
                        .and_then(parse_period)
                        .unwrap_or(Duration::from_secs(5)),
                },
                BackoffPolicy {
                    max_attempts: max_connect_attempts.unwrap_or(policy.max_attempts),
                    ..policy
                },
            ),
            _ => (
                RegistryTarget {
                    servers: Vec::new(),
                    key: spec.name.clone(),
                    poll_interval: Duration::from_secs(5),
                },
                policy,
            ),
        };
        Self {
            spec,
            connector,
            target,
            policy,
        }
    }

    /// Connect, retrying with backoff. `Ok(None)` means the run was cancelled.
    async fn connect(
        &self,
        cancel: &CancellationToken,
        backoff: &mut Backoff,
    ) -> DiscoverResult<Option<Box<dyn RegistrySession>>> {
        let id = self.spec.id();
        let mut attempts = 0;
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                result = self.connector.connect(&self.target) => result,
            };

            let err = match result {
                Ok(session) => {
                    info!(component = %id, key = %self.target.key, "connected to external registry");
                    return Ok(Some(session));
                }
                Err(e) => e,
            };

            attempts += 1;
            if attempts >= self.policy.max_attempts {
                return Err(DiscoverError::RegistryUnavailable {
                    attempts,
                    last_error: err.to_string(),
                });
            }

            let delay = backoff.next_delay();
            warn!(
                component = %id,
                attempt = attempts,
                retry_in_ms = delay.as_millis() as u64,
                error = %err,
                "external registry connect failed"
            );
            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

#[async_trait]
impl Discover for ExternalRegistryDiscover {
    fn component(&self) -> &ComponentSpec {
        &self.spec
    }

    async fn discover(&self, cancel: CancellationToken, emitter: SnapshotEmitter) -> DiscoverResult<()> {
        let id = self.spec.id();
        let mut backoff = Backoff::new(self.policy);
        let mut last: Option<Vec<ServiceInstance>> = None;
        // Fetched but dropped by the sink; re-sent before the next fetch.
        let mut pending: Option<Vec<ServiceInstance>> = None;

        loop {
            let Some(mut session) = self.connect(&cancel, &mut backoff).await? else {
                return Ok(());
            };

            loop {
                if let Some(instances) = pending.take() {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            session.close().await;
                            return Ok(());
                        }
                        _ = tokio::time::sleep(REDELIVER_AFTER) => {}
                    }
                    match emitter.emit(&self.spec, registry_endpoints(&instances)).await {
                        Ok(SendOutcome::Delivered) => last = Some(instances),
                        Ok(_) => pending = Some(instances),
                        Err(e) => {
                            session.close().await;
                            return Err(e);
                        }
                    }
                    continue;
                }

                let fetched = tokio::select! {
                    _ = cancel.cancelled() => {
                        session.close().await;
                        return Ok(());
                    }
                    fetched = session.fetch() => fetched,
                };

                match fetched {
                    Ok(instances) => {
                        backoff.reset();
                        if last.as_ref() == Some(&instances) {
                            continue;
                        }
                        match emitter.emit(&self.spec, registry_endpoints(&instances)).await {
                            Ok(SendOutcome::Delivered) => last = Some(instances),
                            Ok(_) => pending = Some(instances),
                            Err(e) => {
                                session.close().await;
                                return Err(e);
                            }
                        }
                    }
                    Err(e) => {
                        warn!(component = %id, error = %e, "external registry fetch failed, reconnecting");
                        session.close().await;
                        break;
                    }
                }
            }

            let delay = backoff.next_delay();
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}

fn registry_endpoints(instances: &[ServiceInstance]) -> Vec<Endpoint> {
    instances
        .iter()
        .map(|i| i.to_endpoint(DiscoveryKind::ExternalRegistry))
        .collect()
}

// ── HTTP registry backend ─────────────────────────────────────────

/// A registry record as served by the HTTP backend.
#[derive(Debug, Deserialize)]
struct RegistryRecord {
    address: String,
    #[serde(default = "default_healthy")]
    healthy: bool,
}

fn default_healthy() -> bool {
    true
}

/// Polls `GET http://{server}/v1/registry/{key}` for a JSON list of
/// `{"address": "host:port", "healthy": bool}` records.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpRegistryConnector;

#[async_trait]
impl RegistryConnector for HttpRegistryConnector {
    async fn connect(&self, target: &RegistryTarget) -> DiscoverResult<Box<dyn RegistrySession>> {
        let mut last_error = String::from("no registry servers configured");
        for server in &target.servers {
            match handshake(server).await {
                Ok(sender) => {
                    return Ok(Box::new(HttpRegistrySession {
                        server: server.clone(),
                        key: target.key.trim_start_matches('/').to_string(),
                        poll_interval: target.poll_interval,
                        sender,
                        polled: false,
                    }));
                }
                Err(e) => {
                    debug!(%server, error = %e, "registry server unreachable");
                    last_error = e.to_string();
                }
            }
        }
        Err(DiscoverError::Backend(last_error))
    }
}

type HttpSender = hyper::client::conn::http1::SendRequest<http_body_util::Empty<bytes::Bytes>>;

async fn handshake(server: &str) -> DiscoverResult<HttpSender> {
    let stream = tokio::net::TcpStream::connect(server)
        .await
        .map_err(|e| DiscoverError::Backend(format!("connect {server}: {e}")))?;
    let io = hyper_util::rt::TokioIo::new(stream);
    let (sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| DiscoverError::Backend(format!("handshake {server}: {e}")))?;
    tokio::spawn(async move {
        let _ = conn.await;
    });
    Ok(sender)
}

struct HttpRegistrySession {
    server: String,
    key: String,
    poll_interval: Duration,
    sender: HttpSender,
    polled: bool,
}

#[async_trait]
impl RegistrySession for HttpRegistrySession {
    async fn fetch(&mut self) -> DiscoverResult<Vec<ServiceInstance>> {
        if self.polled {
            tokio::time::sleep(self.poll_interval).await;
        }
        self.polled = true;

        let uri = format!("http://{}/v1/registry/{}", self.server, self.key);
        let req = http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", &self.server)
            .header("user-agent", "outpost-discover/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
            .map_err(|e| DiscoverError::Backend(format!("build request {uri}: {e}")))?;

        let resp = self
            .sender
            .send_request(req)
            .await
            .map_err(|e| DiscoverError::Backend(format!("GET {uri}: {e}")))?;
        if !resp.status().is_success() {
            return Err(DiscoverError::Backend(format!("GET {uri}: status {}", resp.status())));
        }

        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| DiscoverError::Backend(format!("read {uri}: {e}")))?
            .to_bytes();
        parse_records(&body)
    }

    async fn close(&mut self) {
        debug!(server = %self.server, key = %self.key, "registry session closed");
    }
}

fn parse_records(body: &[u8]) -> DiscoverResult<Vec<ServiceInstance>> {
    let records: Vec<RegistryRecord> = serde_json::from_slice(body)
        .map_err(|e| DiscoverError::Backend(format!("invalid registry payload: {e}")))?;
    records
        .into_iter()
        .map(|r| {
            Ok(ServiceInstance {
                address: r.address.parse::<EndpointAddr>()?,
                ready: r.healthy,
            })
        })
        .collect()
}
