//! Controller counters and their Prometheus text rendering.
//!
//! Counters are owned by whoever builds the controller and passed in by
//! `Arc`; nothing here is process-global.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

#[derive(Debug, Default)]
pub struct ControllerMetrics {
    upserts: AtomicU64,
    removals: AtomicU64,
    swaps: AtomicU64,
    starts: AtomicU64,
    start_failures: AtomicU64,
    published: AtomicU64,
    stale: AtomicU64,
}

/// Point-in-time copy of the counters plus the gauges rendered with them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub upserts: u64,
    pub removals: u64,
    pub swaps: u64,
    pub starts: u64,
    pub start_failures: u64,
    pub published: u64,
    pub stale: u64,
    pub sink_dropped: u64,
    pub workers: u64,
    pub probes: u64,
}

impl ControllerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn upsert(&self) {
        self.upserts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn removal(&self) {
        self.removals.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn swap(&self) {
        self.swaps.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn start(&self) {
        self.starts.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn start_failure(&self) {
        self.start_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stale(&self) {
        self.stale.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy the counters; gauges are left at zero for the caller to fill.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            upserts: self.upserts.load(Ordering::Relaxed),
            removals: self.removals.load(Ordering::Relaxed),
            swaps: self.swaps.load(Ordering::Relaxed),
            starts: self.starts.load(Ordering::Relaxed),
            start_failures: self.start_failures.load(Ordering::Relaxed),
            published: self.published.load(Ordering::Relaxed),
            stale: self.stale.load(Ordering::Relaxed),
            ..MetricsSnapshot::default()
        }
    }
}

/// Render a snapshot in the Prometheus text exposition format.
pub fn render_prometheus(s: &MetricsSnapshot) -> String {
    let metrics: [(&str, &str, &str, u64); 10] = [
        ("outpost_upserts_total", "counter", "Component upserts accepted.", s.upserts),
        ("outpost_removals_total", "counter", "Components removed.", s.removals),
        ("outpost_swaps_total", "counter", "Discovery strategy swaps.", s.swaps),
        ("outpost_worker_starts_total", "counter", "Workers started.", s.starts),
        (
            "outpost_worker_start_failures_total",
            "counter",
            "Workers whose task failed inside the start grace window.",
            s.start_failures,
        ),
        (
            "outpost_updates_published_total",
            "counter",
            "Endpoint snapshots handed to the publisher.",
            s.published,
        ),
        (
            "outpost_updates_stale_total",
            "counter",
            "Snapshots discarded because their run was no longer current.",
            s.stale,
        ),
        (
            "outpost_updates_dropped_total",
            "counter",
            "Snapshots dropped because the update sink stayed full.",
            s.sink_dropped,
        ),
        ("outpost_workers", "gauge", "Registered workers.", s.workers),
        ("outpost_probes", "gauge", "Active endpoint probes.", s.probes),
    ];

    let mut out = String::new();
    for (name, kind, help, value) in metrics {
        out.push_str(&format!("# HELP {name} {help}\n"));
        out.push_str(&format!("# TYPE {name} {kind}\n"));
        out.push_str(&format!("{name} {value}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let m = ControllerMetrics::new();
        m.upsert();
        m.upsert();
        m.swap();
        m.stale();
        let s = m.snapshot();
        assert_eq!((s.upserts, s.swaps, s.stale, s.removals), (2, 1, 1, 0));
    }

    #[test]
    fn render_includes_type_declarations() {
        let output = render_prometheus(&MetricsSnapshot::default());
        assert!(output.contains("# TYPE outpost_upserts_total counter"));
        assert!(output.contains("# TYPE outpost_workers gauge"));
        assert!(output.contains("outpost_probes 0\n"));
    }

    #[test]
    fn render_format_is_prometheus_compatible() {
        let snapshot = MetricsSnapshot {
            published: 42,
            workers: 3,
            sink_dropped: 1,
            ..MetricsSnapshot::default()
        };
        let output = render_prometheus(&snapshot);
        assert!(output.contains("outpost_updates_published_total 42\n"));
        assert!(output.contains("outpost_workers 3\n"));
        assert!(output.contains("outpost_updates_dropped_total 1\n"));

        for line in output.lines() {
            if line.starts_with('#') {
                continue;
            }
            let mut parts = line.split(' ');
            let name = parts.next().unwrap();
            assert!(name.starts_with("outpost_"), "bad metric line: {line}");
            assert!(parts.next().unwrap().parse::<u64>().is_ok(), "bad value: {line}");
        }
    }
}
