//! OVN northbound database access
//!
//! [`NbClient`] is the create-or-update / delete surface the controller
//! needs. Every operation is keyed by row name and is idempotent: writing
//! the same row twice leaves the database unchanged, and deleting an absent
//! row succeeds.

pub mod memory;
pub mod model;

pub use memory::MemoryNbClient;
pub use model::{
    Copp, GatewayChassis, LogicalRouter, LogicalRouterPort, LogicalSwitch, LogicalSwitchPort,
    PortGroup,
};

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

/// Name of the distributed cluster router
pub const OVN_CLUSTER_ROUTER: &str = "ovn_cluster_router";

/// Prefix of router ports facing a node switch
pub const ROUTER_TO_SWITCH_PREFIX: &str = "rtos-";

/// Prefix of switch ports facing the cluster router
pub const SWITCH_TO_ROUTER_PREFIX: &str = "stor-";

/// Port group holding every node's switch-to-router port (multicast relay)
pub const CLUSTER_RTR_PORT_GROUP: &str = "clusterRtrPortGroup";

/// Name of the default control plane protection profile
pub const DEFAULT_COPP_NAME: &str = "ovnkube-default";

/// Router external id marking the cluster router
pub const CLUSTER_ROUTER_EXTERNAL_ID: &str = "k8s-cluster-router";

/// Router external id carrying the topology version
pub const TOPOLOGY_VERSION_EXTERNAL_ID: &str = "k8s-ovn-topo-version";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NbError {
    #[error("{table} '{name}' not found")]
    NotFound { table: &'static str, name: String },

    #[error("northbound database unavailable: {0}")]
    Unavailable(String),

    #[error("transaction failed: {0}")]
    Transaction(String),
}

impl NbError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, NbError::NotFound { .. })
    }
}

#[async_trait]
pub trait NbClient: Send + Sync {
    /// Create or update a control plane protection profile by name (meters
    /// are replaced). Returns the row UUID.
    async fn create_or_update_copp(&self, copp: &Copp) -> Result<String, NbError>;

    /// Create or update a router by name. External ids are merged into the
    /// existing row; options and COPP are replaced. Returns the row UUID.
    async fn create_or_update_logical_router(
        &self,
        router: &LogicalRouter,
    ) -> Result<String, NbError>;

    /// Fetch a router by name; [`NbError::NotFound`] if it does not exist
    async fn get_logical_router(&self, name: &str) -> Result<LogicalRouter, NbError>;

    /// Merge `external_ids` into an existing router's external ids
    async fn set_logical_router_external_ids(
        &self,
        name: &str,
        external_ids: &BTreeMap<String, String>,
    ) -> Result<(), NbError>;

    /// Create or update a router port on `router` (MAC and networks are
    /// replaced). When `chassis` is given it becomes the port's only gateway
    /// chassis. Returns the port UUID.
    async fn create_or_update_logical_router_port(
        &self,
        router: &str,
        port: &LogicalRouterPort,
        chassis: Option<&GatewayChassis>,
    ) -> Result<String, NbError>;

    /// Delete router ports by name; absent router or ports are ignored
    async fn delete_logical_router_ports(
        &self,
        router: &str,
        ports: &[String],
    ) -> Result<(), NbError>;

    /// Create or update a switch by name (other_config and load balancer
    /// groups are replaced, ports are kept). Returns the switch UUID.
    async fn create_or_update_logical_switch(
        &self,
        switch: &LogicalSwitch,
    ) -> Result<String, NbError>;

    /// Create or update a port on an existing switch. Returns the port UUID.
    async fn create_or_update_logical_switch_port(
        &self,
        switch: &str,
        port: &LogicalSwitchPort,
    ) -> Result<String, NbError>;

    /// Delete a switch and its ports; an absent switch is ignored
    async fn delete_logical_switch(&self, name: &str) -> Result<(), NbError>;

    /// Add switch ports (by UUID) to a port group, creating the group if needed
    async fn add_ports_to_port_group(
        &self,
        group: &str,
        port_uuids: &[String],
    ) -> Result<(), NbError>;
}
