pub mod validation;

pub use validation::validate_config;

use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use ipnet::{IpNet, Ipv4Net};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::retry::RetryConfig;

/// Name of the default (primary) pod network
pub const DEFAULT_NETWORK_NAME: &str = "default";

/// Errors for loading and validating the controller configuration
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// A cluster-wide pod CIDR and the prefix length carved out for each node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSubnet {
    pub cidr: IpNet,

    #[serde(rename = "hostSubnetLength")]
    pub host_subnet_length: u8,
}

/// Backoff settings for optimistic-concurrency retries on node patches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictRetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for ConflictRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl ConflictRetryConfig {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts,
            initial_delay: Duration::from_millis(self.initial_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            backoff_multiplier: self.backoff_multiplier,
        }
    }
}

/// Configuration for one network controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Logical network this controller manages
    #[serde(rename = "networkName", default = "default_network_name")]
    pub network_name: String,

    /// Pod CIDRs that node subnets are carved from
    #[serde(rename = "clusterSubnets", default = "default_cluster_subnets")]
    pub cluster_subnets: Vec<ClusterSubnet>,

    /// Enable IGMP/MLD snooping and multicast relay
    #[serde(rename = "multicastEnabled", default)]
    pub multicast_enabled: bool,

    /// Reserve the hybrid overlay address on every node switch
    #[serde(rename = "hybridOverlayEnabled", default)]
    pub hybrid_overlay_enabled: bool,

    #[serde(rename = "sctpSupport", default)]
    pub sctp_support: bool,

    /// Nodes carrying all of these labels do not get a host subnet
    #[serde(rename = "noHostSubnetLabels", default)]
    pub no_host_subnet_labels: HashMap<String, String>,

    /// Delay before a deleted namespace's address set is destroyed
    #[serde(
        rename = "namespaceAddressSetGraceSecs",
        default = "default_address_set_grace_secs"
    )]
    pub namespace_address_set_grace_secs: u64,

    #[serde(rename = "conflictRetry", default)]
    pub conflict_retry: ConflictRetryConfig,

    /// Load balancer group UUID attached to every node switch
    #[serde(rename = "loadBalancerGroup", default)]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load_balancer_group: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            network_name: default_network_name(),
            cluster_subnets: default_cluster_subnets(),
            multicast_enabled: false,
            hybrid_overlay_enabled: false,
            sctp_support: false,
            no_host_subnet_labels: HashMap::new(),
            namespace_address_set_grace_secs: default_address_set_grace_secs(),
            conflict_retry: ConflictRetryConfig::default(),
            load_balancer_group: None,
        }
    }
}

impl ControllerConfig {
    /// Whether any IPv4 cluster subnet is configured
    pub fn ipv4_mode(&self) -> bool {
        self.cluster_subnets
            .iter()
            .any(|s| matches!(s.cidr, IpNet::V4(_)))
    }

    /// Whether any IPv6 cluster subnet is configured
    pub fn ipv6_mode(&self) -> bool {
        self.cluster_subnets
            .iter()
            .any(|s| matches!(s.cidr, IpNet::V6(_)))
    }

    pub fn address_set_grace(&self) -> Duration {
        Duration::from_secs(self.namespace_address_set_grace_secs)
    }

    /// Whether the given node labels select a node without a host subnet
    pub fn is_no_host_subnet_node(&self, labels: &HashMap<String, String>) -> bool {
        !self.no_host_subnet_labels.is_empty()
            && self
                .no_host_subnet_labels
                .iter()
                .all(|(k, v)| labels.get(k) == Some(v))
    }
}

fn default_network_name() -> String {
    DEFAULT_NETWORK_NAME.to_string()
}

fn default_cluster_subnets() -> Vec<ClusterSubnet> {
    Ipv4Net::new(Ipv4Addr::new(10, 244, 0, 0), 16)
        .into_iter()
        .map(|cidr| ClusterSubnet {
            cidr: IpNet::V4(cidr),
            host_subnet_length: 24,
        })
        .collect()
}

fn default_address_set_grace_secs() -> u64 {
    20
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay_ms() -> u64 {
    10
}

fn default_max_delay_ms() -> u64 {
    1000
}

fn default_backoff_multiplier() -> f64 {
    5.0
}

/// Parse a config from YAML and validate it
pub fn parse_config(content: &str) -> Result<ControllerConfig, ConfigError> {
    let config: ControllerConfig = serde_yaml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Load, parse and validate a config file from disk
pub fn load_config_file(path: &Path) -> Result<ControllerConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}
