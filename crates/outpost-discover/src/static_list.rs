//! Static list discovery: a fixed set of configured addresses.

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use outpost_core::{
    ComponentSpec, DiscoveryKind, DiscoverySource, Endpoint, EndpointAddr, SendOutcome, parse_period,
};

use crate::Discover;
use crate::emitter::{REDELIVER_AFTER, SnapshotEmitter};
use crate::error::DiscoverResult;

/// Emits the configured endpoints once, then optionally re-affirms them on
/// a fixed interval until cancelled. A dropped snapshot is re-sent after
/// [`REDELIVER_AFTER`] at the latest.
#[derive(Debug, Clone)]
pub struct StaticDiscover {
    spec: ComponentSpec,
    addresses: Vec<EndpointAddr>,
    reaffirm: Option<Duration>,
}

impl StaticDiscover {
    pub fn new(spec: ComponentSpec) -> DiscoverResult<Self> {
        let (addresses, reaffirm) = match &spec.discovery {
            DiscoverySource::Static {
                endpoints,
                reaffirm_interval,
            } => {
                let addresses = endpoints
                    .iter()
                    .map(|e| e.parse::<EndpointAddr>())
                    .collect::<Result<Vec<_>, _>>()?;
                (addresses, reaffirm_interval.as_deref().and_then(parse_period))
            }
            _ => (Vec::new(), None),
        };
        Ok(Self {
            spec,
            addresses,
            reaffirm,
        })
    }

    fn snapshot(&self) -> Vec<Endpoint> {
        self.addresses
            .iter()
            .map(|addr| Endpoint::new(addr.clone(), DiscoveryKind::Static))
            .collect()
    }
}

#[async_trait]
impl Discover for StaticDiscover {
    fn component(&self) -> &ComponentSpec {
        &self.spec
    }

    async fn discover(&self, cancel: CancellationToken, emitter: SnapshotEmitter) -> DiscoverResult<()> {
        let mut delivered = emitter.emit(&self.spec, self.snapshot()).await? == SendOutcome::Delivered;

        loop {
            let wait = match (self.reaffirm, delivered) {
                (Some(interval), true) => interval,
                (Some(interval), false) => interval.min(REDELIVER_AFTER),
                (None, false) => REDELIVER_AFTER,
                (None, true) => {
                    cancel.cancelled().await;
                    return Ok(());
                }
            };
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(wait) => {
                    delivered = emitter.emit(&self.spec, self.snapshot()).await? == SendOutcome::Delivered;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use outpost_core::{ComponentId, update_channel};

    fn spec(reaffirm: Option<&str>) -> ComponentSpec {
        ComponentSpec {
            namespace: "default".to_string(),
            name: "c1".to_string(),
            discovery: DiscoverySource::Static {
                endpoints: vec!["10.0.0.1:80".to_string(), "10.0.0.2:80".to_string()],
                reaffirm_interval: reaffirm.map(String::from),
            },
            probe: None,
            uses_static_endpoints: false,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn emits_once_and_waits_for_cancel() {
        let (sink, mut stream) = update_channel(8, Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let discover = StaticDiscover::new(spec(None)).unwrap();
        let emitter = SnapshotEmitter::new(discover.spec.id(), 7, sink, cancel.clone());

        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { discover.discover(cancel, emitter).await }
        });

        let update = stream.recv().await.unwrap();
        assert_eq!(update.generation, 7);
        assert_eq!(update.endpoints.len(), 2);
        assert!(update.endpoints.iter().all(|e| e.source == DiscoveryKind::Static && e.online));

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(stream.try_recv().is_none());

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn reaffirms_on_interval() {
        let (sink, mut stream) = update_channel(8, Duration::from_secs(1));
        let cancel = CancellationToken::new();
        let discover = StaticDiscover::new(spec(Some("10s"))).unwrap();
        let emitter = SnapshotEmitter::new(discover.spec.id(), 1, sink, cancel.clone());

        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { discover.discover(cancel, emitter).await }
        });

        tokio::time::sleep(Duration::from_secs(25)).await;
        let mut count = 0;
        while stream.try_recv().is_some() {
            count += 1;
        }
        assert_eq!(count, 3);

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn resends_a_dropped_snapshot() {
        let (sink, mut stream) = update_channel(1, Duration::from_millis(10));
        let cancel = CancellationToken::new();
        let filler = SnapshotEmitter::new(ComponentId::new("default", "filler"), 1, sink.clone(), cancel.clone());
        filler.emit(&spec(None), Vec::new()).await.unwrap();

        let discover = StaticDiscover::new(spec(None)).unwrap();
        let emitter = SnapshotEmitter::new(discover.spec.id(), 2, sink.clone(), cancel.clone());
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { discover.discover(cancel, emitter).await }
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sink.dropped(), 1);
        assert_eq!(stream.recv().await.unwrap().generation, 1);

        tokio::time::sleep(REDELIVER_AFTER).await;
        let update = stream.try_recv().unwrap();
        assert_eq!(update.generation, 2);
        assert_eq!(update.endpoints.len(), 2);

        // Delivered now, so nothing further until cancelled.
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert!(stream.try_recv().is_none());

        cancel.cancel();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn rejects_malformed_addresses() {
        let mut bad = spec(None);
        bad.discovery = DiscoverySource::Static {
            endpoints: vec!["not-an-address".to_string()],
            reaffirm_interval: None,
        };
        assert!(StaticDiscover::new(bad).is_err());
    }
}
