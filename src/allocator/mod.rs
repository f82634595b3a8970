//! Node host subnet allocation
//!
//! The allocator is the authority on which node owns which subnet. The
//! controller asks it for a node's subnets (passing whatever the node's
//! annotation already claims as hints), hands back subnets when a node
//! goes away or a reconciliation fails, and seeds it from annotations on
//! startup.

pub mod host_subnet;

pub use host_subnet::HostSubnetAllocator;

use async_trait::async_trait;
use ipnet::IpNet;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocatorError {
    #[error("no {family} subnets left to allocate for node {node}")]
    Exhausted { family: &'static str, node: String },

    #[error("subnet {0} is not part of any cluster subnet")]
    NotInRange(IpNet),

    #[error("subnet {subnet} is already allocated to node {owner}")]
    OwnedByOther { subnet: IpNet, owner: String },

    #[error("neither IPv4 nor IPv6 is enabled")]
    NoFamilyEnabled,
}

/// Result of an allocation request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSubnets {
    /// Every subnet the node now owns (reused hints plus new allocations)
    pub host_subnets: Vec<IpNet>,
    /// Only the subnets taken from the free pool by this request
    pub allocated: Vec<IpNet>,
}

#[async_trait]
pub trait SubnetAllocator: Send + Sync {
    /// Give `node` one subnet per enabled family, reusing valid entries of
    /// `existing` first
    async fn allocate_node_subnets(
        &self,
        node: &str,
        existing: &[IpNet],
        ipv4: bool,
        ipv6: bool,
    ) -> Result<NodeSubnets, AllocatorError>;

    /// Return subnets owned by `node` to the free pool
    async fn release_node_subnets(&self, node: &str, subnets: &[IpNet])
        -> Result<(), AllocatorError>;

    /// Record subnets a node already owns (from its annotation)
    async fn mark_subnets_allocated(
        &self,
        node: &str,
        subnets: &[IpNet],
    ) -> Result<(), AllocatorError>;
}
