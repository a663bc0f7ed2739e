//! Domain types for third-party components and their endpoints.
//!
//! A `ComponentSpec` is handed to a worker as an immutable value; a changed
//! definition arrives as a new value and triggers a strategy swap. Endpoints
//! are ephemeral value objects recomputed on every discovery cycle.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::duration::{parse_period, require_period};
use crate::error::ConfigError;

// ── Component identity ────────────────────────────────────────────

/// Stable identity of a component: `{namespace}/{name}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId {
    pub namespace: String,
    pub name: String,
}

impl ComponentId {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ComponentId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
                Ok(Self::new(ns, name))
            }
            _ => Err(ConfigError::component(s, "expected {namespace}/{name}")),
        }
    }
}

// ── Discovery source ──────────────────────────────────────────────

/// Which discovery strategy produces a component's endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiscoveryKind {
    Static,
    ClusterService,
    ExternalRegistry,
}

impl DiscoveryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Static => "static",
            Self::ClusterService => "cluster-service",
            Self::ExternalRegistry => "external-registry",
        }
    }
}

impl fmt::Display for DiscoveryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discovery-source kind plus its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum DiscoverySource {
    /// A fixed list of `host:port` addresses.
    Static {
        endpoints: Vec<String>,
        /// Re-emit the list on this interval (e.g. "30s"); emit once if unset.
        #[serde(default)]
        reaffirm_interval: Option<String>,
    },
    /// The cluster's own service objects for this component.
    ClusterService {
        service: String,
        /// Defaults to the component's namespace.
        #[serde(default)]
        namespace: Option<String>,
        port: u16,
        #[serde(default)]
        resync_interval: Option<String>,
    },
    /// An external registry (e.g. a key-value watch) keyed by `key`.
    ExternalRegistry {
        servers: Vec<String>,
        key: String,
        #[serde(default)]
        poll_interval: Option<String>,
        /// Consecutive failed connects tolerated before the run fails.
        #[serde(default)]
        max_connect_attempts: Option<u32>,
    },
}

impl DiscoverySource {
    pub fn kind(&self) -> DiscoveryKind {
        match self {
            Self::Static { .. } => DiscoveryKind::Static,
            Self::ClusterService { .. } => DiscoveryKind::ClusterService,
            Self::ExternalRegistry { .. } => DiscoveryKind::ExternalRegistry,
        }
    }
}

// ── Probe configuration ───────────────────────────────────────────

/// Protocol used for a health probe attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeProtocol {
    Tcp,
    Http,
    Command,
}

/// Health probe parameters for a component's endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeSpec {
    pub protocol: ProbeProtocol,
    /// Probe this port instead of the endpoint's own.
    #[serde(default)]
    pub port: Option<u16>,
    /// HTTP path (defaults to "/").
    #[serde(default)]
    pub path: Option<String>,
    /// Program and arguments for `command` probes.
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default = "default_interval")]
    pub interval: String,
    #[serde(default = "default_timeout")]
    pub timeout: String,
    /// Consecutive successes before an endpoint is healthy.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    /// Consecutive failures before an endpoint is unhealthy.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_interval() -> String {
    "5s".to_string()
}

fn default_timeout() -> String {
    "2s".to_string()
}

fn default_success_threshold() -> u32 {
    1
}

fn default_failure_threshold() -> u32 {
    3
}

impl ProbeSpec {
    /// A TCP probe with default timings.
    pub fn tcp() -> Self {
        Self {
            protocol: ProbeProtocol::Tcp,
            port: None,
            path: None,
            command: Vec::new(),
            interval: default_interval(),
            timeout: default_timeout(),
            success_threshold: default_success_threshold(),
            failure_threshold: default_failure_threshold(),
        }
    }

    pub fn interval(&self) -> Duration {
        parse_period(&self.interval).unwrap_or(Duration::from_secs(5))
    }

    pub fn timeout(&self) -> Duration {
        parse_period(&self.timeout).unwrap_or(Duration::from_secs(2))
    }

    pub fn http_path(&self) -> &str {
        self.path.as_deref().unwrap_or("/")
    }

    fn validate(&self, id: &ComponentId) -> Result<(), ConfigError> {
        require_period("probe.interval", &self.interval)?;
        require_period("probe.timeout", &self.timeout)?;
        if self.success_threshold == 0 || self.failure_threshold == 0 {
            return Err(ConfigError::component(id, "probe thresholds must be at least 1"));
        }
        if self.protocol == ProbeProtocol::Command && self.command.is_empty() {
            return Err(ConfigError::component(id, "command probe requires a command"));
        }
        Ok(())
    }
}

// ── Component ─────────────────────────────────────────────────────

/// Definition of an externally-registered component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentSpec {
    pub namespace: String,
    pub name: String,
    pub discovery: DiscoverySource,
    #[serde(default)]
    pub probe: Option<ProbeSpec>,
    /// Opt the component's endpoints into active probing.
    #[serde(default)]
    pub uses_static_endpoints: bool,
}

impl ComponentSpec {
    pub fn id(&self) -> ComponentId {
        ComponentId::new(&self.namespace, &self.name)
    }

    pub fn kind(&self) -> DiscoveryKind {
        self.discovery.kind()
    }

    /// Probe configuration, if this component is opted into probing.
    pub fn active_probe(&self) -> Option<&ProbeSpec> {
        if self.uses_static_endpoints {
            self.probe.as_ref()
        } else {
            None
        }
    }

    /// Check the definition for configuration errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let id = self.id();
        for part in [&self.namespace, &self.name] {
            if part.is_empty() || part.contains('/') {
                return Err(ConfigError::component(&id, "namespace and name must be non-empty and contain no '/'"));
            }
        }

        match &self.discovery {
            DiscoverySource::Static {
                endpoints,
                reaffirm_interval,
            } => {
                for ep in endpoints {
                    ep.parse::<EndpointAddr>()?;
                }
                if let Some(interval) = reaffirm_interval {
                    require_period("discovery.reaffirm_interval", interval)?;
                }
            }
            DiscoverySource::ClusterService {
                service,
                port,
                resync_interval,
                ..
            } => {
                if service.is_empty() {
                    return Err(ConfigError::component(&id, "cluster-service requires a service name"));
                }
                if *port == 0 {
                    return Err(ConfigError::component(&id, "cluster-service requires a non-zero port"));
                }
                if let Some(interval) = resync_interval {
                    require_period("discovery.resync_interval", interval)?;
                }
            }
            DiscoverySource::ExternalRegistry {
                servers,
                key,
                poll_interval,
                max_connect_attempts,
            } => {
                if servers.is_empty() || key.is_empty() {
                    return Err(ConfigError::component(&id, "external-registry requires servers and a key"));
                }
                if let Some(interval) = poll_interval {
                    require_period("discovery.poll_interval", interval)?;
                }
                if *max_connect_attempts == Some(0) {
                    return Err(ConfigError::component(&id, "max_connect_attempts must be at least 1"));
                }
            }
        }

        match (&self.probe, self.uses_static_endpoints) {
            (Some(probe), _) => probe.validate(&id),
            (None, true) => Err(ConfigError::component(&id, "uses_static_endpoints requires a probe")),
            (None, false) => Ok(()),
        }
    }
}

// ── Endpoint ──────────────────────────────────────────────────────

/// A network address: host (name or IP) plus port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointAddr {
    pub host: String,
    pub port: u16,
}

impl EndpointAddr {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// The same host on a different port.
    pub fn with_port(&self, port: u16) -> Self {
        Self::new(&self.host, port)
    }
}

impl fmt::Display for EndpointAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for EndpointAddr {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidAddress(s.to_string());
        let (host, port) = s.trim().rsplit_once(':').ok_or_else(invalid)?;
        let host = host
            .strip_prefix('[')
            .and_then(|h| h.strip_suffix(']'))
            .unwrap_or(host);
        let port: u16 = port.parse().map_err(|_| invalid())?;
        if host.is_empty() || port == 0 {
            return Err(invalid());
        }
        Ok(Self::new(host, port))
    }
}

impl From<std::net::SocketAddr> for EndpointAddr {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

/// Health as determined by probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    #[default]
    Unknown,
}

/// One discovered instance of a component.
///
/// Equality and hashing consider only the address.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub address: EndpointAddr,
    /// Which discovery strategy produced this endpoint.
    pub source: DiscoveryKind,
    pub online: bool,
    /// Unix timestamp (seconds) of the snapshot that produced this endpoint.
    pub discovered_at: u64,
    /// Probe-assigned health; `None` when the endpoint is not probed.
    pub health: Option<HealthStatus>,
}

impl Endpoint {
    pub fn new(address: EndpointAddr, source: DiscoveryKind) -> Self {
        Self {
            address,
            source,
            online: true,
            discovered_at: epoch_secs(),
            health: None,
        }
    }

    /// Whether traffic may be routed to this endpoint.
    pub fn is_routable(&self) -> bool {
        self.online && self.health != Some(HealthStatus::Unhealthy)
    }
}

impl PartialEq for Endpoint {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Endpoint {}

impl Hash for Endpoint {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

/// Current Unix time in seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn static_spec(endpoints: &[&str]) -> ComponentSpec {
        ComponentSpec {
            namespace: "default".to_string(),
            name: "legacy".to_string(),
            discovery: DiscoverySource::Static {
                endpoints: endpoints.iter().map(|s| s.to_string()).collect(),
                reaffirm_interval: None,
            },
            probe: None,
            uses_static_endpoints: false,
        }
    }

    #[test]
    fn component_id_round_trips_through_display() {
        let id = ComponentId::new("prod", "db");
        assert_eq!(id.to_string(), "prod/db");
        assert_eq!("prod/db".parse::<ComponentId>().unwrap(), id);
        assert!("prod".parse::<ComponentId>().is_err());
        assert!("prod/a/b".parse::<ComponentId>().is_err());
    }

    #[test]
    fn endpoint_addr_parsing() {
        let addr: EndpointAddr = "10.0.0.1:80".parse().unwrap();
        assert_eq!(addr, EndpointAddr::new("10.0.0.1", 80));

        let v6: EndpointAddr = "[::1]:8080".parse().unwrap();
        assert_eq!(v6.host, "::1");
        assert_eq!(v6.to_string(), "[::1]:8080");

        assert!("10.0.0.1".parse::<EndpointAddr>().is_err());
        assert!("10.0.0.1:0".parse::<EndpointAddr>().is_err());
        assert!(":80".parse::<EndpointAddr>().is_err());
    }

    #[test]
    fn endpoints_compare_by_address_only() {
        let a = Endpoint::new(EndpointAddr::new("10.0.0.1", 80), DiscoveryKind::Static);
        let mut b = Endpoint::new(EndpointAddr::new("10.0.0.1", 80), DiscoveryKind::ClusterService);
        b.online = false;
        b.health = Some(HealthStatus::Unhealthy);
        assert_eq!(a, b);

        let set: HashSet<Endpoint> = [a, b].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn unhealthy_or_offline_endpoints_are_not_routable() {
        let mut ep = Endpoint::new(EndpointAddr::new("h", 1), DiscoveryKind::Static);
        assert!(ep.is_routable());
        ep.health = Some(HealthStatus::Unknown);
        assert!(ep.is_routable());
        ep.health = Some(HealthStatus::Unhealthy);
        assert!(!ep.is_routable());
        ep.health = None;
        ep.online = false;
        assert!(!ep.is_routable());
    }

    #[test]
    fn validate_accepts_static_spec() {
        assert!(static_spec(&["10.0.0.1:80", "10.0.0.2:80"]).validate().is_ok());
    }

    #[test]
    fn validate_rejects_bad_static_address() {
        let err = static_spec(&["10.0.0.1"]).validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidAddress(_)));
    }

    #[test]
    fn validate_requires_probe_for_static_endpoints() {
        let mut spec = static_spec(&["10.0.0.1:80"]);
        spec.uses_static_endpoints = true;
        assert!(spec.validate().is_err());

        spec.probe = Some(ProbeSpec::tcp());
        assert!(spec.validate().is_ok());
        assert!(spec.active_probe().is_some());
    }

    #[test]
    fn validate_rejects_zero_thresholds() {
        let mut spec = static_spec(&[]);
        let mut probe = ProbeSpec::tcp();
        probe.failure_threshold = 0;
        spec.probe = Some(probe);
        assert!(spec.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_periods() {
        let mut spec = static_spec(&["10.0.0.1:80"]);
        spec.uses_static_endpoints = true;
        let mut probe = ProbeSpec::tcp();
        probe.interval = "0s".to_string();
        spec.probe = Some(probe.clone());
        assert!(matches!(
            spec.validate(),
            Err(ConfigError::ZeroDuration { field: "probe.interval" })
        ));

        probe.interval = "1s".to_string();
        probe.timeout = "0ms".to_string();
        spec.probe = Some(probe);
        assert!(matches!(
            spec.validate(),
            Err(ConfigError::ZeroDuration { field: "probe.timeout" })
        ));

        let mut reaffirm = static_spec(&["10.0.0.1:80"]);
        reaffirm.discovery = DiscoverySource::Static {
            endpoints: vec!["10.0.0.1:80".to_string()],
            reaffirm_interval: Some("0".to_string()),
        };
        assert!(reaffirm.validate().is_err());

        let mut cluster = static_spec(&[]);
        cluster.discovery = DiscoverySource::ClusterService {
            service: "db".to_string(),
            namespace: None,
            port: 5432,
            resync_interval: Some("0s".to_string()),
        };
        assert!(cluster.validate().is_err());

        let mut registry = static_spec(&[]);
        registry.discovery = DiscoverySource::ExternalRegistry {
            servers: vec!["127.0.0.1:2379".to_string()],
            key: "/svc/db".to_string(),
            poll_interval: Some("0ms".to_string()),
            max_connect_attempts: None,
        };
        assert!(registry.validate().is_err());
    }

    #[test]
    fn zero_interval_accessor_falls_back_to_default() {
        let mut probe = ProbeSpec::tcp();
        probe.interval = "0s".to_string();
        assert_eq!(probe.interval(), Duration::from_secs(5));
    }

    #[test]
    fn probe_without_opt_in_is_inactive() {
        let mut spec = static_spec(&[]);
        spec.probe = Some(ProbeSpec::tcp());
        assert!(spec.validate().is_ok());
        assert!(spec.active_probe().is_none());
    }

    #[test]
    fn discovery_source_deserializes_by_kind_tag() {
        let src: DiscoverySource = serde_json::from_str(
            r#"{"kind":"external-registry","servers":["127.0.0.1:2379"],"key":"/svc/db"}"#,
        )
        .unwrap();
        assert_eq!(src.kind(), DiscoveryKind::ExternalRegistry);

        let unknown = serde_json::from_str::<DiscoverySource>(r#"{"kind":"carrier-pigeon"}"#);
        assert!(unknown.is_err());
    }
}
