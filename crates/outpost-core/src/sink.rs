//! The update sink: a bounded conduit from workers to the publisher.
//!
//! Many producers (one discovery task per worker, plus probe tasks) push
//! full endpoint snapshots; one consumer drains them. Producers never block
//! indefinitely: a send waits up to `send_timeout` for buffer space and then
//! drops the snapshot. Since every update is a complete snapshot, the next
//! one supersedes anything lost.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tracing::{debug, warn};

use crate::types::{ComponentId, Endpoint};

/// A full endpoint snapshot for one component.
#[derive(Debug, Clone)]
pub struct EndpointUpdate {
    pub component: ComponentId,
    /// Run generation of the worker task that produced this snapshot.
    pub generation: u64,
    pub endpoints: Vec<Endpoint>,
}

/// What happened to an update handed to [`UpdateSink::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    /// The buffer stayed full for the whole send timeout.
    Dropped,
    /// The consumer is gone.
    Closed,
}

/// Producer half of the update conduit.
#[derive(Debug, Clone)]
pub struct UpdateSink {
    tx: mpsc::Sender<EndpointUpdate>,
    send_timeout: Duration,
    dropped: Arc<AtomicU64>,
}

/// Consumer half of the update conduit.
#[derive(Debug)]
pub struct UpdateStream {
    rx: mpsc::Receiver<EndpointUpdate>,
}

/// Create a sink/stream pair with the given buffer size and backpressure timeout.
pub fn update_channel(capacity: usize, send_timeout: Duration) -> (UpdateSink, UpdateStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        UpdateSink {
            tx,
            send_timeout,
            dropped: Arc::new(AtomicU64::new(0)),
        },
        UpdateStream { rx },
    )
}

impl UpdateSink {
    /// Push a snapshot, waiting at most `send_timeout` for capacity.
    pub async fn send(&self, update: EndpointUpdate) -> SendOutcome {
        match self.tx.send_timeout(update, self.send_timeout).await {
            Ok(()) => SendOutcome::Delivered,
            Err(SendTimeoutError::Timeout(update)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    component = %update.component,
                    generation = update.generation,
                    timeout_ms = self.send_timeout.as_millis() as u64,
                    "update sink full, dropping snapshot"
                );
                SendOutcome::Dropped
            }
            Err(SendTimeoutError::Closed(update)) => {
                debug!(component = %update.component, "update sink closed");
                SendOutcome::Closed
            }
        }
    }

    /// Number of snapshots dropped because the buffer stayed full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl UpdateStream {
    /// Next snapshot, or `None` once every sink has been dropped.
    pub async fn recv(&mut self) -> Option<EndpointUpdate> {
        self.rx.recv().await
    }

    /// Next buffered snapshot without waiting.
    pub fn try_recv(&mut self) -> Option<EndpointUpdate> {
        self.rx.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DiscoveryKind, EndpointAddr};

    fn update(name: &str, generation: u64) -> EndpointUpdate {
        EndpointUpdate {
            component: ComponentId::new("default", name),
            generation,
            endpoints: vec![Endpoint::new(
                EndpointAddr::new("10.0.0.1", 80),
                DiscoveryKind::Static,
            )],
        }
    }

    #[tokio::test]
    async fn delivers_in_order() {
        let (sink, mut stream) = update_channel(8, Duration::from_millis(50));
        for g in 1..=3 {
            assert_eq!(sink.send(update("a", g)).await, SendOutcome::Delivered);
        }
        for g in 1..=3 {
            assert_eq!(stream.recv().await.unwrap().generation, g);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn full_sink_drops_after_timeout() {
        let (sink, mut stream) = update_channel(1, Duration::from_millis(100));
        assert_eq!(sink.send(update("a", 1)).await, SendOutcome::Delivered);

        // Buffer is full and nobody reads: the second send times out.
        assert_eq!(sink.send(update("a", 2)).await, SendOutcome::Dropped);
        assert_eq!(sink.dropped(), 1);

        // The buffered snapshot is intact and the sink still works.
        assert_eq!(stream.recv().await.unwrap().generation, 1);
        assert_eq!(sink.send(update("a", 3)).await, SendOutcome::Delivered);
        assert_eq!(stream.recv().await.unwrap().generation, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn blocked_sender_resumes_when_consumer_drains() {
        let (sink, mut stream) = update_channel(1, Duration::from_secs(5));
        sink.send(update("a", 1)).await;

        let producer = {
            let sink = sink.clone();
            tokio::spawn(async move { sink.send(update("a", 2)).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(stream.recv().await.unwrap().generation, 1);

        assert_eq!(producer.await.unwrap(), SendOutcome::Delivered);
        assert_eq!(stream.recv().await.unwrap().generation, 2);
        assert_eq!(sink.dropped(), 0);
    }

    #[tokio::test]
    async fn closed_stream_reports_closed() {
        let (sink, stream) = update_channel(4, Duration::from_millis(10));
        drop(stream);
        assert!(sink.is_closed());
        assert_eq!(sink.send(update("a", 1)).await, SendOutcome::Closed);
        assert_eq!(sink.dropped(), 0);
    }
}
