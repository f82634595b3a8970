//! In-process API server
//!
//! Stores nodes and pods in concurrent maps and enforces resource-version
//! checks on node patches, which is enough to exercise the controller's
//! conflict handling. Failures can be injected for the next N calls.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::{KubeClient, KubeError, Node, NodeLister, Pod};

#[derive(Default)]
pub struct InMemoryKube {
    nodes: DashMap<String, Node>,
    pods: DashMap<String, Pod>,
    next_version: AtomicU64,
    conflicts_to_inject: AtomicU32,
    list_failures_to_inject: AtomicU32,
    patch_count: AtomicU32,
}

impl InMemoryKube {
    pub fn new() -> Self {
        Self {
            next_version: AtomicU64::new(1),
            ..Default::default()
        }
    }

    fn bump_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Create or replace a node, assigning it a fresh resource version
    pub fn upsert_node(&self, mut node: Node) -> Node {
        node.metadata.resource_version = self.bump_version();
        self.nodes.insert(node.metadata.name.clone(), node.clone());
        node
    }

    pub fn upsert_pod(&self, pod: Pod) {
        self.pods.insert(pod.qualified_name(), pod);
    }

    /// Make the next `n` node patches fail with a conflict
    pub fn inject_conflicts(&self, n: u32) {
        self.conflicts_to_inject.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` pod listings fail
    pub fn inject_list_failures(&self, n: u32) {
        self.list_failures_to_inject.store(n, Ordering::SeqCst);
    }

    /// Number of successful node patches
    pub fn patch_count(&self) -> u32 {
        self.patch_count.load(Ordering::SeqCst)
    }

    fn take_injected(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl NodeLister for InMemoryKube {
    async fn get_node(&self, name: &str) -> Result<Node, KubeError> {
        self.nodes
            .get(name)
            .map(|n| n.clone())
            .ok_or_else(|| KubeError::NotFound {
                kind: "Node".to_string(),
                name: name.to_string(),
            })
    }
}

#[async_trait]
impl KubeClient for InMemoryKube {
    async fn patch_node(&self, old: &Node, new: &Node) -> Result<(), KubeError> {
        let name = old.metadata.name.clone();
        let conflict = || KubeError::Conflict {
            kind: "Node".to_string(),
            name: name.clone(),
        };

        if Self::take_injected(&self.conflicts_to_inject) {
            return Err(conflict());
        }

        let mut current = self.nodes.get_mut(&name).ok_or_else(|| KubeError::NotFound {
            kind: "Node".to_string(),
            name: name.clone(),
        })?;

        if current.metadata.resource_version != old.metadata.resource_version {
            return Err(conflict());
        }

        let mut updated = new.clone();
        updated.metadata.resource_version = self.bump_version();
        *current = updated;
        self.patch_count.fetch_add(1, Ordering::SeqCst);
        debug!("Patched node {}", name);
        Ok(())
    }

    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>, KubeError> {
        if Self::take_injected(&self.list_failures_to_inject) {
            return Err(KubeError::Unavailable(format!(
                "listing pods on node {}",
                node_name
            )));
        }

        Ok(self
            .pods
            .iter()
            .filter(|p| p.node_name == node_name)
            .map(|p| p.clone())
            .collect())
    }
}
