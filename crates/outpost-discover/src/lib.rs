//! outpost-discover: discovery strategies for third-party components.
//!
//! Each strategy implements [`Discover`]: it runs until cancelled, pushing
//! full endpoint snapshots through a [`SnapshotEmitter`]. Callers pick a
//! strategy with [`DiscoverBackends::build`], which dispatches on the
//! component's discovery kind.
//!
//! Only the external registry strategy retries internally. The others
//! return the first backend error and leave restarts to the owner.

pub mod backoff;
pub mod cluster_service;
pub mod emitter;
pub mod error;
pub mod registry;
pub mod static_list;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use outpost_core::{ComponentSpec, DiscoveryKind};

pub use backoff::{Backoff, BackoffPolicy};
pub use cluster_service::{ClusterServiceDiscover, DnsServiceLookup, ServiceInstance, ServiceLookup};
pub use emitter::{REDELIVER_AFTER, SnapshotEmitter};
pub use error::{DiscoverError, DiscoverResult};
pub use registry::{
    ExternalRegistryDiscover, HttpRegistryConnector, RegistryConnector, RegistrySession, RegistryTarget,
};
pub use static_list::StaticDiscover;

/// A discovery strategy for one component.
#[async_trait]
pub trait Discover: Send + Sync {
    /// The component definition this strategy was built from.
    fn component(&self) -> &ComponentSpec;

    /// Run until `cancel` fires or the backend fails.
    async fn discover(&self, cancel: CancellationToken, emitter: SnapshotEmitter) -> DiscoverResult<()>;
}

/// The closed set of discovery strategies.
pub enum Discoverer {
    Static(StaticDiscover),
    ClusterService(ClusterServiceDiscover),
    ExternalRegistry(ExternalRegistryDiscover),
}

impl Discoverer {
    pub fn component(&self) -> &ComponentSpec {
        match self {
            Self::Static(d) => d.component(),
            Self::ClusterService(d) => d.component(),
            Self::ExternalRegistry(d) => d.component(),
        }
    }

    pub fn kind(&self) -> DiscoveryKind {
        match self {
            Self::Static(_) => DiscoveryKind::Static,
            Self::ClusterService(_) => DiscoveryKind::ClusterService,
            Self::ExternalRegistry(_) => DiscoveryKind::ExternalRegistry,
        }
    }

    /// Run the strategy. A run that ends because it was cancelled is `Ok`.
    pub async fn discover(&self, cancel: CancellationToken, emitter: SnapshotEmitter) -> DiscoverResult<()> {
        let result = match self {
            Self::Static(d) => d.discover(cancel, emitter).await,
            Self::ClusterService(d) => d.discover(cancel, emitter).await,
            Self::ExternalRegistry(d) => d.discover(cancel, emitter).await,
        };
        match result {
            Err(DiscoverError::Cancelled) => Ok(()),
            other => other,
        }
    }
}

/// Backends available to the strategies that need one.
#[derive(Clone, Default)]
pub struct DiscoverBackends {
    pub cluster: Option<Arc<dyn ServiceLookup>>,
    pub registry: Option<Arc<dyn RegistryConnector>>,
    pub backoff: BackoffPolicy,
}

impl DiscoverBackends {
    pub fn with_cluster(mut self, lookup: Arc<dyn ServiceLookup>) -> Self {
        self.cluster = Some(lookup);
        self
    }

    pub fn with_registry(mut self, connector: Arc<dyn RegistryConnector>) -> Self {
        self.registry = Some(connector);
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Build the strategy for `spec`, validating the definition first.
    pub fn build(&self, spec: &ComponentSpec) -> DiscoverResult<Discoverer> {
        spec.validate()?;
        match spec.kind() {
            DiscoveryKind::Static => Ok(Discoverer::Static(StaticDiscover::new(spec.clone())?)),
            DiscoveryKind::ClusterService => {
                let lookup = self
                    .cluster
                    .clone()
                    .ok_or(DiscoverError::NoBackend(DiscoveryKind::ClusterService))?;
                Ok(Discoverer::ClusterService(ClusterServiceDiscover::new(spec.clone(), lookup)))
            }
            DiscoveryKind::ExternalRegistry => {
                let connector = self
                    .registry
                    .clone()
                    .ok_or(DiscoverError::NoBackend(DiscoveryKind::ExternalRegistry))?;
                Ok(Discoverer::ExternalRegistry(ExternalRegistryDiscover::new(
                    spec.clone(),
                    connector,
                    self.backoff,
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_core::{DiscoverySource, ProbeSpec};

    fn static_spec(endpoints: &[&str]) -> ComponentSpec {
        ComponentSpec {
            namespace: "default".to_string(),
            name: "ledger".to_string(),
            discovery: DiscoverySource::Static {
                endpoints: endpoints.iter().map(|e| e.to_string()).collect(),
                reaffirm_interval: None,
            },
            probe: None,
            uses_static_endpoints: false,
        }
    }

    #[test]
    fn builds_static_without_backends() {
        let backends = DiscoverBackends::default();
        let d = backends.build(&static_spec(&["10.0.0.1:80"])).unwrap();
        assert_eq!(d.kind(), DiscoveryKind::Static);
        assert_eq!(d.component().name, "ledger");
    }

    #[test]
    fn missing_backend_is_reported() {
        let mut spec = static_spec(&[]);
        spec.discovery = DiscoverySource::ExternalRegistry {
            servers: vec!["127.0.0.1:2379".to_string()],
            key: "ledger".to_string(),
            poll_interval: None,
            max_connect_attempts: None,
        };
        let result = DiscoverBackends::default().build(&spec);
        assert!(matches!(
            result,
            Err(DiscoverError::NoBackend(DiscoveryKind::ExternalRegistry))
        ));

        let backends = DiscoverBackends::default().with_registry(Arc::new(HttpRegistryConnector));
        assert_eq!(backends.build(&spec).unwrap().kind(), DiscoveryKind::ExternalRegistry);
    }

    #[test]
    fn invalid_definition_is_a_config_error() {
        let mut spec = static_spec(&["10.0.0.1:80"]);
        spec.uses_static_endpoints = true;
        assert!(matches!(
            DiscoverBackends::default().build(&spec),
            Err(DiscoverError::Config(_))
        ));

        spec.probe = Some(ProbeSpec::tcp());
        assert!(DiscoverBackends::default().build(&spec).is_ok());
    }
}
