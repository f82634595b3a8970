//! Load balancer ↔ logical switch association cache
//!
//! Service controllers record which switches each load balancer is attached
//! to. When a node switch goes away the association has to be dropped here
//! first, otherwise the cache would keep pointing at a row that no longer
//! exists and never get cleaned up.

use std::collections::BTreeSet;

use dashmap::DashMap;
use tracing::debug;

/// The part of the load balancer cache the topology controller touches
pub trait LbSwitchCache: Send + Sync {
    /// Forget every association with `switch`; unknown switches are ignored
    fn remove_switch(&self, switch: &str);
}

/// Load balancer UUID → names of switches it is attached to
#[derive(Default)]
pub struct LoadBalancerCache {
    switches_by_lb: DashMap<String, BTreeSet<String>>,
}

impl LoadBalancerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_switch(&self, lb: &str, switch: &str) {
        self.switches_by_lb
            .entry(lb.to_string())
            .or_default()
            .insert(switch.to_string());
    }

    pub fn switches_for(&self, lb: &str) -> Vec<String> {
        self.switches_by_lb
            .get(lb)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether any load balancer still references `switch`
    pub fn references(&self, switch: &str) -> bool {
        self.switches_by_lb.iter().any(|e| e.contains(switch))
    }
}

impl LbSwitchCache for LoadBalancerCache {
    fn remove_switch(&self, switch: &str) {
        let mut removed = 0;
        for mut entry in self.switches_by_lb.iter_mut() {
            if entry.remove(switch) {
                removed += 1;
            }
        }
        if removed > 0 {
            debug!("Removed switch {} from {} load balancers", switch, removed);
        }
    }
}
