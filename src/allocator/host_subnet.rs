//! First-fit host subnet allocator over the configured cluster subnets
//!
//! Each cluster subnet is split into blocks of its host subnet length;
//! allocation hands out the lowest free block of the requested family.
//! Ownership is tracked per block so a node's own subnets can be re-marked
//! idempotently after a restart.

use std::collections::BTreeMap;

use async_trait::async_trait;
use ipnet::IpNet;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{AllocatorError, NodeSubnets, SubnetAllocator};
use crate::config::ClusterSubnet;
use crate::netutil::is_ipv6;

pub struct HostSubnetAllocator {
    ranges: Vec<ClusterSubnet>,
    /// Allocated block → owning node
    owners: Mutex<BTreeMap<IpNet, String>>,
}

impl HostSubnetAllocator {
    pub fn new(ranges: Vec<ClusterSubnet>) -> Self {
        Self {
            ranges,
            owners: Mutex::new(BTreeMap::new()),
        }
    }

    /// Whether `subnet` is a block this allocator can hand out
    fn in_range(&self, subnet: &IpNet) -> bool {
        self.ranges.iter().any(|r| {
            r.host_subnet_length == subnet.prefix_len() && r.cidr.contains(subnet)
        })
    }

    fn find_free(&self, owners: &BTreeMap<IpNet, String>, v6: bool) -> Option<IpNet> {
        self.ranges
            .iter()
            .filter(|r| is_ipv6(&r.cidr) == v6)
            .filter_map(|r| r.cidr.subnets(r.host_subnet_length).ok())
            .flatten()
            .find(|candidate| !owners.contains_key(candidate))
    }

    pub async fn owner_of(&self, subnet: &IpNet) -> Option<String> {
        self.owners.lock().await.get(subnet).cloned()
    }

    pub async fn allocated_count(&self) -> usize {
        self.owners.lock().await.len()
    }
}

#[async_trait]
impl SubnetAllocator for HostSubnetAllocator {
    async fn allocate_node_subnets(
        &self,
        node: &str,
        existing: &[IpNet],
        ipv4: bool,
        ipv6: bool,
    ) -> Result<NodeSubnets, AllocatorError> {
        if !ipv4 && !ipv6 {
            return Err(AllocatorError::NoFamilyEnabled);
        }

        let mut owners = self.owners.lock().await;
        // restored if the request fails part way
        let before = owners.clone();
        let mut result = NodeSubnets::default();
        let mut found_v4 = false;
        let mut found_v6 = false;

        // Reuse at most one valid existing subnet per family
        for subnet in existing {
            let v6 = is_ipv6(subnet);
            let wanted = if v6 { ipv6 && !found_v6 } else { ipv4 && !found_v4 };

            if wanted && self.in_range(subnet) {
                match owners.get(subnet).cloned() {
                    Some(owner) if owner != node => {
                        warn!(
                            "Node {} claims subnet {} already owned by {}",
                            node, subnet, owner
                        );
                        continue;
                    }
                    Some(_) => {}
                    None => {
                        owners.insert(*subnet, node.to_string());
                    }
                }
                result.host_subnets.push(*subnet);
                if v6 {
                    found_v6 = true;
                } else {
                    found_v4 = true;
                }
                continue;
            }

            // No longer needed by this node
            if owners.get(subnet).map(|o| o == node).unwrap_or(false) {
                owners.remove(subnet);
            }
            debug!("Dropping stale subnet {} of node {}", subnet, node);
        }

        for (needed, v6, family) in [
            (ipv4 && !found_v4, false, "IPv4"),
            (ipv6 && !found_v6, true, "IPv6"),
        ] {
            if !needed {
                continue;
            }
            match self.find_free(&owners, v6) {
                Some(subnet) => {
                    owners.insert(subnet, node.to_string());
                    result.host_subnets.push(subnet);
                    result.allocated.push(subnet);
                }
                None => {
                    *owners = before;
                    return Err(AllocatorError::Exhausted {
                        family,
                        node: node.to_string(),
                    });
                }
            }
        }

        if !result.allocated.is_empty() {
            info!(
                "Allocated subnets {:?} for node {}",
                result.allocated, node
            );
        }
        Ok(result)
    }

    async fn release_node_subnets(
        &self,
        node: &str,
        subnets: &[IpNet],
    ) -> Result<(), AllocatorError> {
        let mut owners = self.owners.lock().await;
        let mut first_err = None;

        for subnet in subnets {
            match owners.get(subnet).cloned() {
                Some(owner) if owner == node => {
                    owners.remove(subnet);
                    debug!("Released subnet {} of node {}", subnet, node);
                }
                Some(owner) => {
                    first_err.get_or_insert(AllocatorError::OwnedByOther {
                        subnet: *subnet,
                        owner,
                    });
                }
                None => debug!("Subnet {} of node {} was not allocated", subnet, node),
            }
        }

        first_err.map_or(Ok(()), Err)
    }

    async fn mark_subnets_allocated(
        &self,
        node: &str,
        subnets: &[IpNet],
    ) -> Result<(), AllocatorError> {
        let mut owners = self.owners.lock().await;

        for subnet in subnets {
            if !self.in_range(subnet) {
                return Err(AllocatorError::NotInRange(*subnet));
            }
            match owners.get(subnet).cloned() {
                Some(owner) if owner != node => {
                    return Err(AllocatorError::OwnedByOther {
                        subnet: *subnet,
                        owner,
                    });
                }
                Some(_) => {}
                None => {
                    owners.insert(*subnet, node.to_string());
                }
            }
        }
        Ok(())
    }
}
