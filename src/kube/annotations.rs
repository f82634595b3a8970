//! Node annotations owned or read by the topology controller
//!
//! `k8s.ovn.org/node-subnets` maps network names to the node's host subnets.
//! A single-stack network is stored as a CIDR string, a dual-stack network
//! as an array of CIDR strings:
//!
//! ```text
//! {"default":["10.244.0.0/24","fd00:10:244:1::/64"],"blue":"10.10.3.0/24"}
//! ```

use std::collections::{BTreeMap, HashMap};

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::types::Node;

/// Host subnets per network name
pub const NODE_SUBNETS_ANNOTATION: &str = "k8s.ovn.org/node-subnets";

/// OVS system-id of the chassis the node runs
pub const NODE_CHASSIS_ID_ANNOTATION: &str = "k8s.ovn.org/node-chassis-id";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AnnotationError {
    #[error("annotation {annotation} not set on node {node}")]
    NotSet { annotation: String, node: String },

    #[error("malformed annotation {annotation} on node {node}: {reason}")]
    Malformed {
        annotation: String,
        node: String,
        reason: String,
    },
}

impl AnnotationError {
    pub fn is_not_set(&self) -> bool {
        matches!(self, AnnotationError::NotSet { .. })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum SubnetValue {
    One(String),
    Many(Vec<String>),
}

impl SubnetValue {
    fn into_strings(self) -> Vec<String> {
        match self {
            SubnetValue::One(s) => vec![s],
            SubnetValue::Many(v) => v,
        }
    }
}

fn malformed(node: &str, reason: impl Into<String>) -> AnnotationError {
    AnnotationError::Malformed {
        annotation: NODE_SUBNETS_ANNOTATION.to_string(),
        node: node.to_string(),
        reason: reason.into(),
    }
}

fn parse_subnet_map(
    node: &str,
    raw: &str,
) -> Result<BTreeMap<String, SubnetValue>, AnnotationError> {
    serde_json::from_str(raw).map_err(|e| malformed(node, e.to_string()))
}

/// Parse the host subnets of `network` from a node's annotations
pub fn parse_node_host_subnets(node: &Node, network: &str) -> Result<Vec<IpNet>, AnnotationError> {
    let not_set = || AnnotationError::NotSet {
        annotation: NODE_SUBNETS_ANNOTATION.to_string(),
        node: node.name().to_string(),
    };

    let raw = node
        .metadata
        .annotations
        .get(NODE_SUBNETS_ANNOTATION)
        .ok_or_else(not_set)?;

    let mut map = parse_subnet_map(node.name(), raw)?;
    let value = map.remove(network).ok_or_else(not_set)?;

    let strings = value.into_strings();
    if strings.is_empty() {
        return Err(malformed(
            node.name(),
            format!("empty subnet list for network {}", network),
        ));
    }

    strings
        .iter()
        .map(|s| {
            s.parse::<IpNet>()
                .map_err(|e| malformed(node.name(), format!("invalid subnet {:?}: {}", s, e)))
        })
        .collect()
}

/// Write `subnets` for `network` into an annotation map, keeping the
/// entries of other networks. An empty list removes the network's entry.
pub fn update_node_host_subnet_annotation(
    node_name: &str,
    annotations: &mut HashMap<String, String>,
    subnets: &[IpNet],
    network: &str,
) -> Result<(), AnnotationError> {
    let mut map = match annotations.get(NODE_SUBNETS_ANNOTATION) {
        Some(raw) => parse_subnet_map(node_name, raw)?,
        None => BTreeMap::new(),
    };

    match subnets {
        [] => {
            map.remove(network);
        }
        [one] => {
            map.insert(network.to_string(), SubnetValue::One(one.to_string()));
        }
        many => {
            map.insert(
                network.to_string(),
                SubnetValue::Many(many.iter().map(|s| s.to_string()).collect()),
            );
        }
    }

    if map.is_empty() {
        annotations.remove(NODE_SUBNETS_ANNOTATION);
        return Ok(());
    }

    let raw = serde_json::to_string(&map).map_err(|e| malformed(node_name, e.to_string()))?;
    annotations.insert(NODE_SUBNETS_ANNOTATION.to_string(), raw);
    Ok(())
}

/// Read the chassis id a node's ovn-controller registered with
pub fn parse_node_chassis_id(node: &Node) -> Result<String, AnnotationError> {
    match node.metadata.annotations.get(NODE_CHASSIS_ID_ANNOTATION) {
        Some(id) if !id.trim().is_empty() => Ok(id.clone()),
        Some(_) => Err(AnnotationError::Malformed {
            annotation: NODE_CHASSIS_ID_ANNOTATION.to_string(),
            node: node.name().to_string(),
            reason: "empty chassis id".to_string(),
        }),
        None => Err(AnnotationError::NotSet {
            annotation: NODE_CHASSIS_ID_ANNOTATION.to_string(),
            node: node.name().to_string(),
        }),
    }
}
