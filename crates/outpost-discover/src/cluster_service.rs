//! Cluster service discovery: maps the cluster's own service records 1:1.
//!
//! The lookup is a swappable backend behind [`ServiceLookup`]. The built-in
//! [`DnsServiceLookup`] resolves `{service}.{namespace}.svc.{domain}`, the
//! way headless services expose their ready pods.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use outpost_core::{
    ComponentSpec, DiscoveryKind, DiscoverySource, Endpoint, EndpointAddr, SendOutcome, parse_period,
};

use crate::Discover;
use crate::emitter::{REDELIVER_AFTER, SnapshotEmitter};
use crate::error::{DiscoverError, DiscoverResult};

/// One backing instance reported by a discovery backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInstance {
    pub address: EndpointAddr,
    pub ready: bool,
}

impl ServiceInstance {
    pub fn ready(address: EndpointAddr) -> Self {
        Self {
            address,
            ready: true,
        }
    }

    pub(crate) fn to_endpoint(&self, source: DiscoveryKind) -> Endpoint {
        let mut ep = Endpoint::new(self.address.clone(), source);
        ep.online = self.ready;
        ep
    }
}

/// Lists the instances backing a cluster service.
#[async_trait]
pub trait ServiceLookup: Send + Sync {
    async fn lookup(&self, namespace: &str, service: &str, port: u16) -> DiscoverResult<Vec<ServiceInstance>>;
}

/// DNS-based lookup against the cluster's service records.
#[derive(Debug, Clone)]
pub struct DnsServiceLookup {
    cluster_domain: String,
}

impl DnsServiceLookup {
    pub fn new(cluster_domain: impl Into<String>) -> Self {
        Self {
            cluster_domain: cluster_domain.into(),
        }
    }
}

impl Default for DnsServiceLookup {
    fn default() -> Self {
        Self::new("cluster.local")
    }
}

#[async_trait]
impl ServiceLookup for DnsServiceLookup {
    async fn lookup(&self, namespace: &str, service: &str, port: u16) -> DiscoverResult<Vec<ServiceInstance>> {
        let name = format!("{service}.{namespace}.svc.{}:{port}", self.cluster_domain);
        let addrs = tokio::net::lookup_host(&name)
            .await
            .map_err(|e| DiscoverError::Backend(format!("DNS lookup failed for '{name}': {e}")))?;

        // DNS may return the same address more than once.
        let mut seen = HashSet::new();
        Ok(addrs
            .filter(|addr| seen.insert(*addr))
            .map(|addr| ServiceInstance::ready(addr.into()))
            .collect())
    }
}

/// Polls a [`ServiceLookup`] and emits whenever the instance set changes.
pub struct ClusterServiceDiscover {
    spec: ComponentSpec,
    lookup: Arc<dyn ServiceLookup>,
    namespace: String,
    service: String,
    port: u16,
    resync: Duration,
}

impl ClusterServiceDiscover {
    pub fn new(spec: ComponentSpec, lookup: Arc<dyn ServiceLookup>) -> Self {
        let (namespace, service, port, resync) = match &spec.discovery {
            DiscoverySource::ClusterService {
                service,
                namespace,
                port,
                resync_interval,
            } => (
                namespace.clone().unwrap_or_else(|| spec.namespace.clone()),
                service.clone(),
                *port,
                resync_interval
                    .as_deref()
                    .and_then(parse_period)
                    .unwrap_or(Duration::from_secs(10)),
            ),
            _ => (spec.namespace.clone(), spec.name.clone(), 0, Duration::from_secs(10)),
        };
        Self {
            spec,
            lookup,
            namespace,
            service,
            port,
            resync,
        }
    }
}

#[async_trait]
impl Discover for ClusterServiceDiscover {
    fn component(&self) -> &ComponentSpec {
        &self.spec
    }

    async fn discover(&self, cancel: CancellationToken, emitter: SnapshotEmitter) -> DiscoverResult<()> {
        let mut last: Option<Vec<ServiceInstance>> = None;

        loop {
            let instances = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = self.lookup.lookup(&self.namespace, &self.service, self.port) => result?,
            };

            let mut wait = self.resync;
            if last.as_ref() != Some(&instances) {
                let endpoints = instances
                    .iter()
                    .map(|i| i.to_endpoint(DiscoveryKind::ClusterService))
                    .collect();
                if emitter.emit(&self.spec, endpoints).await? == SendOutcome::Delivered {
                    last = Some(instances);
                } else {
                    wait = wait.min(REDELIVER_AFTER);
                }
            } else {
                debug!(component = %self.spec.id(), "cluster service unchanged");
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_core::{ComponentId, update_channel};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted lookup results; repeats the last one forever.
    struct ScriptedLookup {
        results: Mutex<VecDeque<DiscoverResult<Vec<ServiceInstance>>>>,
        last: Mutex<Vec<ServiceInstance>>,
    }

    impl ScriptedLookup {
        fn new(results: Vec<DiscoverResult<Vec<ServiceInstance>>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                last: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ServiceLookup for ScriptedLookup {
        async fn lookup(&self, namespace: &str, service: &str, port: u16) -> DiscoverResult<Vec<ServiceInstance>> {
            assert_eq!((namespace, service, port), ("shop", "payments", 8080));
            match self.results.lock().unwrap().pop_front() {
                Some(Ok(instances)) => {
                    *self.last.lock().unwrap() = instances.clone();
                    Ok(instances)
                }
                Some(Err(e)) => Err(e),
                None => Ok(self.last.lock().unwrap().clone()),
            }
        }
    }

    fn spec() -> ComponentSpec {
        ComponentSpec {
            namespace: "default".to_string(),
            name: "payments".to_string(),
            discovery: DiscoverySource::ClusterService {
                service: "payments".to_string(),
                namespace: Some("shop".to_string()),
                port: 8080,
                resync_interval: Some("1s".to_string()),
            },
            probe: None,
            uses_static_endpoints: false,
        }
    }

    fn instance(host: &str, ready: bool) -> ServiceInstance {
        ServiceInstance {
            address: EndpointAddr::new(host, 8080),
            ready,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn emits_only_on_change() {
        let lookup = ScriptedLookup::new(vec![
            Ok(vec![instance("10.1.0.1", true)]),
            Ok(vec![instance("10.1.0.1", true)]),
            Ok(vec![instance("10.1.0.1", true), instance("10.1.0.2", false)]),
        ]);
        let (sink, mut stream) = update_channel(8, Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let discover = ClusterServiceDiscover::new(spec(), lookup);
        let emitter = SnapshotEmitter::new(spec().id(), 1, sink, cancel.clone());

        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { discover.discover(cancel, emitter).await }
        });

        tokio::time::sleep(Duration::from_millis(5500)).await;
        cancel.cancel();
        assert!(task.await.unwrap().is_ok());

        let first = stream.try_recv().unwrap();
        assert_eq!(first.endpoints.len(), 1);
        let second = stream.try_recv().unwrap();
        assert_eq!(second.endpoints.len(), 2);
        assert!(!second.endpoints[1].online);
        assert_eq!(second.endpoints[1].source, DiscoveryKind::ClusterService);
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unchanged_set_is_resent_after_a_drop() {
        let lookup = ScriptedLookup::new(vec![Ok(vec![instance("10.1.0.1", true)])]);
        let (sink, mut stream) = update_channel(1, Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let filler = SnapshotEmitter::new(ComponentId::new("default", "filler"), 9, sink.clone(), cancel.clone());
        filler.emit(&spec(), Vec::new()).await.unwrap();

        let mut slow = spec();
        slow.discovery = DiscoverySource::ClusterService {
            service: "payments".to_string(),
            namespace: Some("shop".to_string()),
            port: 8080,
            resync_interval: Some("30s".to_string()),
        };
        let discover = ClusterServiceDiscover::new(slow, lookup);
        let emitter = SnapshotEmitter::new(spec().id(), 1, sink.clone(), cancel.clone());
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { discover.discover(cancel, emitter).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sink.dropped(), 1);
        assert_eq!(stream.recv().await.unwrap().generation, 9);

        // The lookup keeps answering the same set; it still gets through.
        tokio::time::sleep(Duration::from_secs(2)).await;
        let update = stream.try_recv().unwrap();
        assert_eq!(update.generation, 1);
        assert_eq!(update.endpoints.len(), 1);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(stream.try_recv().is_none());

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn lookup_failure_ends_the_run() {
        let lookup = ScriptedLookup::new(vec![Err(DiscoverError::Backend("refused".to_string()))]);
        let (sink, _stream) = update_channel(8, Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let discover = ClusterServiceDiscover::new(spec(), lookup);
        let emitter = SnapshotEmitter::new(spec().id(), 1, sink, cancel.clone());

        let result = discover.discover(cancel, emitter).await;
        assert!(matches!(result, Err(DiscoverError::Backend(_))));
    }

    #[test]
    fn service_namespace_defaults_to_component_namespace() {
        let mut spec = spec();
        spec.discovery = DiscoverySource::ClusterService {
            service: "payments".to_string(),
            namespace: None,
            port: 8080,
            resync_interval: None,
        };
        let discover = ClusterServiceDiscover::new(spec, ScriptedLookup::new(vec![]));
        assert_eq!(discover.namespace, "default");
        assert_eq!(discover.resync, Duration::from_secs(10));
    }
}
