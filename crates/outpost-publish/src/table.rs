//! Service table: the published endpoint set of every component.
//!
//! Holds the latest snapshot per component and hands out routable
//! endpoints round-robin. Unhealthy and offline endpoints stay listed but
//! are never selected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use serde::Serialize;
use tracing::debug;

use outpost_core::{ComponentId, Endpoint, HealthStatus};

use crate::EndpointPublisher;

struct TableEntry {
    endpoints: Vec<Endpoint>,
    counter: AtomicUsize,
    /// Bumped every time the published set actually changes.
    revision: u64,
}

/// Summary of one published component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ComponentSummary {
    pub component: String,
    pub endpoints: usize,
    pub routable: usize,
    pub revision: u64,
}

/// Totals across the whole table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableStats {
    pub components: usize,
    pub endpoints: usize,
    pub routable: usize,
    pub unhealthy: usize,
}

/// In-memory endpoint table keyed by component.
#[derive(Default)]
pub struct ServiceTable {
    entries: RwLock<HashMap<ComponentId, TableEntry>>,
}

/// The fields a consumer can observe; `Endpoint` equality is address-only.
fn same_snapshot(a: &[Endpoint], b: &[Endpoint]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.address == y.address && x.online == y.online && x.health == y.health && x.source == y.source
        })
}

impl ServiceTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a component's endpoint set. Returns `false` if the snapshot
    /// was identical to the one already published.
    pub fn update(&self, component: &ComponentId, endpoints: &[Endpoint]) -> bool {
        let mut entries = self.entries.write();
        let revision = match entries.get(component) {
            Some(entry) if same_snapshot(&entry.endpoints, endpoints) => return false,
            Some(entry) => entry.revision + 1,
            None => 1,
        };
        debug!(
            component = %component,
            count = endpoints.len(),
            revision,
            "updated component endpoints"
        );
        entries.insert(
            component.clone(),
            TableEntry {
                endpoints: endpoints.to_vec(),
                counter: AtomicUsize::new(0),
                revision,
            },
        );
        true
    }

    /// Drop a component entirely. Returns whether it was present.
    pub fn remove(&self, component: &ComponentId) -> bool {
        self.entries.write().remove(component).is_some()
    }

    /// Select the next routable endpoint for a component (round-robin).
    pub fn next_endpoint(&self, component: &ComponentId) -> Option<Endpoint> {
        let entries = self.entries.read();
        let entry = entries.get(component)?;

        let routable: Vec<&Endpoint> = entry.endpoints.iter().filter(|e| e.is_routable()).collect();
        if routable.is_empty() {
            return None;
        }

        let idx = entry.counter.fetch_add(1, Ordering::Relaxed) % routable.len();
        Some(routable[idx].clone())
    }

    /// All published endpoints for a component, routable or not.
    pub fn endpoints(&self, component: &ComponentId) -> Option<Vec<Endpoint>> {
        self.entries.read().get(component).map(|e| e.endpoints.clone())
    }

    pub fn contains(&self, component: &ComponentId) -> bool {
        self.entries.read().contains_key(component)
    }

    /// Published components, sorted by id.
    pub fn list_components(&self) -> Vec<ComponentSummary> {
        let entries = self.entries.read();
        let mut ids: Vec<&ComponentId> = entries.keys().collect();
        ids.sort();
        ids.into_iter()
            .map(|id| {
                let entry = &entries[id];
                ComponentSummary {
                    component: id.to_string(),
                    endpoints: entry.endpoints.len(),
                    routable: entry.endpoints.iter().filter(|e| e.is_routable()).count(),
                    revision: entry.revision,
                }
            })
            .collect()
    }

    pub fn stats(&self) -> TableStats {
        let entries = self.entries.read();
        let mut stats = TableStats {
            components: entries.len(),
            ..TableStats::default()
        };
        for ep in entries.values().flat_map(|e| e.endpoints.iter()) {
            stats.endpoints += 1;
            if ep.is_routable() {
                stats.routable += 1;
            }
            if ep.health == Some(HealthStatus::Unhealthy) {
                stats.unhealthy += 1;
            }
        }
        stats
    }
}

impl EndpointPublisher for ServiceTable {
    fn publish(&self, component: &ComponentId, endpoints: &[Endpoint]) {
        self.update(component, endpoints);
    }

    fn withdraw(&self, component: &ComponentId) {
        if self.remove(component) {
            debug!(component = %component, "withdrew component endpoints");
        }
    }
}
