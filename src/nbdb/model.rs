//! Northbound database rows managed by the controller
//!
//! Rows are identified by name; `uuid` is assigned by the database on first
//! insert and is empty on rows built by the controller.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// Distributed router shared by all nodes of a network
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalRouter {
    #[serde(default)]
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub external_ids: BTreeMap<String, String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
    /// UUID of the control plane protection profile
    #[serde(default)]
    pub copp: Option<String>,
    /// Names of the router's ports
    #[serde(default)]
    pub ports: BTreeSet<String>,
}

/// Router side of a router ↔ switch link
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalRouterPort {
    #[serde(default)]
    pub uuid: String,
    pub name: String,
    pub mac: String,
    pub networks: Vec<String>,
    /// Names of the gateway chassis bound to this port
    #[serde(default)]
    pub gateway_chassis: Vec<String>,
}

/// Pins a router port to a physical chassis
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayChassis {
    #[serde(default)]
    pub uuid: String,
    pub name: String,
    pub chassis_name: String,
    pub priority: i32,
}

/// Per-node L2 switch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalSwitch {
    #[serde(default)]
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub other_config: BTreeMap<String, String>,
    #[serde(default)]
    pub load_balancer_group: Vec<String>,
    /// Names of the switch's ports
    #[serde(default)]
    pub ports: BTreeSet<String>,
}

/// Switch port; the controller only creates `type=router` ports
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalSwitchPort {
    #[serde(default)]
    pub uuid: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub port_type: String,
    #[serde(default)]
    pub addresses: Vec<String>,
    #[serde(default)]
    pub options: BTreeMap<String, String>,
}

/// Control plane protection profile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Copp {
    #[serde(default)]
    pub uuid: String,
    pub name: String,
    /// Protocol → meter name
    #[serde(default)]
    pub meters: BTreeMap<String, String>,
}

/// Named set of logical switch ports (by UUID)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortGroup {
    #[serde(default)]
    pub uuid: String,
    pub name: String,
    #[serde(default)]
    pub ports: BTreeSet<String>,
}
