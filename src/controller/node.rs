//! Node add / update / delete reconciliation
//!
//! Adding a node is a multi-step operation: allocate subnets, build the
//! switch, record the subnets on the node, then attach the router port and
//! requeue the node's pods. Subnets taken from the pool in this pass are
//! handed back if the switch or the annotation step fails, so a failed
//! reconciliation never leaks pool space.

use std::collections::{HashMap, HashSet};

use ipnet::IpNet;
use tracing::{debug, error, info, warn};

use super::{ControllerError, NetworkController};
use crate::allocator::NodeSubnets;
use crate::events::EventType;
use crate::kube::{parse_node_host_subnets, Node};
use crate::netutil::join_subnets;

impl NetworkController {
    /// Allocate host subnets for `node`, preferring the ones its annotation
    /// already records
    pub async fn allocate_node_subnets(&self, node: &Node) -> Result<NodeSubnets, ControllerError> {
        let existing = match parse_node_host_subnets(node, self.network_name()) {
            Ok(subnets) => subnets,
            Err(e) if e.is_not_set() => Vec::new(),
            Err(e) => {
                warn!(
                    "Failed to read existing subnets of node {}, allocating fresh ones: {}",
                    node.name(),
                    e
                );
                Vec::new()
            }
        };

        let subnets = self
            .subnet_allocator
            .allocate_node_subnets(
                node.name(),
                &existing,
                self.config.ipv4_mode(),
                self.config.ipv6_mode(),
            )
            .await?;

        debug!(
            "Node {} host subnets {} (newly allocated: {})",
            node.name(),
            join_subnets(&subnets.host_subnets),
            join_subnets(&subnets.allocated)
        );
        Ok(subnets)
    }

    /// Reconcile a new or updated node. Returns the node's host subnets
    /// (empty for nodes that do not manage any).
    pub async fn add_node(&self, node: &Node) -> Result<Vec<IpNet>, ControllerError> {
        if self.config.is_no_host_subnet_node(&node.metadata.labels) {
            info!("Node {} does not manage host subnets, skipping", node.name());
            return Ok(Vec::new());
        }

        let subnets = self.allocate_node_subnets(node).await?;

        if let Err(e) = self.commit_node_subnets(node.name(), &subnets.host_subnets).await {
            self.release_allocated_subnets(node.name(), &subnets.allocated)
                .await;
            self.ctx.recorder.record(
                &format!("Node/{}", node.name()),
                EventType::Warning,
                "ErrorReconcilingNode",
                &format!("error creating logical network for node {}: {}", node.name(), e),
            );
            return Err(e);
        }

        self.ensure_node_router_port(node, &subnets.host_subnets)
            .await?;

        let errs = self.add_all_pods_on_node(node.name()).await;
        if !errs.is_empty() {
            return Err(ControllerError::Aggregate(errs));
        }

        info!(
            "Node {} ready with host subnets {}",
            node.name(),
            join_subnets(&subnets.host_subnets)
        );
        Ok(subnets.host_subnets)
    }

    async fn commit_node_subnets(
        &self,
        node_name: &str,
        host_subnets: &[IpNet],
    ) -> Result<(), ControllerError> {
        self.ensure_node_switch(
            node_name,
            host_subnets,
            self.config.load_balancer_group.as_deref(),
        )
        .await?;

        let by_network = HashMap::from([(self.network_name().to_string(), host_subnets.to_vec())]);
        self.update_node_annotation_with_retry(node_name, &by_network, &HashMap::new())
            .await
    }

    async fn release_allocated_subnets(&self, node_name: &str, subnets: &[IpNet]) {
        if subnets.is_empty() {
            return;
        }
        match self
            .subnet_allocator
            .release_node_subnets(node_name, subnets)
            .await
        {
            Ok(()) => info!(
                "Released subnets {} of node {} after failed reconciliation",
                join_subnets(subnets),
                node_name
            ),
            Err(e) => error!(
                "Error releasing subnets {} of node {}: {}",
                join_subnets(subnets),
                node_name,
                e
            ),
        }
    }

    /// Re-attach `node`'s router port, e.g. after its chassis changed
    pub async fn sync_node_cluster_router_port(
        &self,
        node: &Node,
        host_subnets: &[IpNet],
    ) -> Result<(), ControllerError> {
        self.ensure_node_router_port(node, host_subnets).await
    }

    /// Tear down a node's topology and return its subnets to the pool
    pub async fn delete_node(
        &self,
        node_name: &str,
        host_subnets: &[IpNet],
    ) -> Result<(), ControllerError> {
        self.delete_node_topology(node_name).await?;

        if !host_subnets.is_empty() {
            self.subnet_allocator
                .release_node_subnets(node_name, host_subnets)
                .await?;
        }
        Ok(())
    }

    /// Seed the allocator from the annotations of nodes that already exist.
    /// Returns the names of the nodes that manage host subnets.
    pub async fn sync_existing_nodes(&self, nodes: &[Node]) -> HashSet<String> {
        let mut managed = HashSet::new();

        for node in nodes {
            if self.config.is_no_host_subnet_node(&node.metadata.labels) {
                continue;
            }
            managed.insert(node.name().to_string());

            let subnets = match parse_node_host_subnets(node, self.network_name()) {
                Ok(subnets) => subnets,
                Err(e) if e.is_not_set() => continue,
                Err(e) => {
                    error!("Skipping subnets of node {}: {}", node.name(), e);
                    continue;
                }
            };

            if let Err(e) = self
                .subnet_allocator
                .mark_subnets_allocated(node.name(), &subnets)
                .await
            {
                error!(
                    "Failed to mark subnets {} of node {} as allocated: {}",
                    join_subnets(&subnets),
                    node.name(),
                    e
                );
            }
        }

        managed
    }
}
