//! Structural validation of the controller configuration
//!
//! Runs once at load time so that malformed cluster subnets are rejected
//! before any node gets a subnet carved from them.

use ipnet::IpNet;

use super::{ConfigError, ControllerConfig};

/// Check a config for values the controller cannot work with
pub fn validate_config(config: &ControllerConfig) -> Result<(), ConfigError> {
    if config.network_name.trim().is_empty() {
        return Err(ConfigError::Invalid("networkName must not be empty".into()));
    }

    if config.cluster_subnets.is_empty() {
        return Err(ConfigError::Invalid(
            "at least one cluster subnet is required".into(),
        ));
    }

    for subnet in &config.cluster_subnets {
        let max_len = match subnet.cidr {
            IpNet::V4(_) => 32,
            IpNet::V6(_) => 128,
        };
        if subnet.host_subnet_length <= subnet.cidr.prefix_len() {
            return Err(ConfigError::Invalid(format!(
                "host subnet length /{} must be longer than cluster subnet {}",
                subnet.host_subnet_length, subnet.cidr
            )));
        }
        // a node subnet needs room for gateway, management and hybrid overlay addresses
        if subnet.host_subnet_length > max_len - 2 {
            return Err(ConfigError::Invalid(format!(
                "host subnet length /{} is too long for {}",
                subnet.host_subnet_length, subnet.cidr
            )));
        }
    }

    if config.conflict_retry.max_attempts == 0 {
        return Err(ConfigError::Invalid(
            "conflictRetry.maxAttempts must be at least 1".into(),
        ));
    }

    Ok(())
}
