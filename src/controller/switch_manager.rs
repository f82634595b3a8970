//! In-memory registry of node switches and their subnets
//!
//! Pod IP management reads the subnets of a node's switch from here instead
//! of going back to the database.

use dashmap::DashMap;
use ipnet::IpNet;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchInfo {
    pub uuid: String,
    pub subnets: Vec<IpNet>,
}

#[derive(Debug, Default)]
pub struct LogicalSwitchManager {
    switches: DashMap<String, SwitchInfo>,
}

impl LogicalSwitchManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) a switch with its subnets
    pub fn add_switch(&self, name: &str, uuid: &str, subnets: &[IpNet]) {
        let info = SwitchInfo {
            uuid: uuid.to_string(),
            subnets: subnets.to_vec(),
        };
        if let Some(previous) = self.switches.insert(name.to_string(), info) {
            if previous.subnets != subnets {
                warn!(
                    "Logical switch {} subnets changed from {:?} to {:?}",
                    name, previous.subnets, subnets
                );
            }
        }
        debug!("Registered logical switch {} with subnets {:?}", name, subnets);
    }

    pub fn delete_switch(&self, name: &str) {
        self.switches.remove(name);
    }

    pub fn get_switch_subnets(&self, name: &str) -> Option<Vec<IpNet>> {
        self.switches.get(name).map(|s| s.subnets.clone())
    }

    pub fn get_switch_uuid(&self, name: &str) -> Option<String> {
        self.switches.get(name).map(|s| s.uuid.clone())
    }

    pub fn len(&self) -> usize {
        self.switches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.switches.is_empty()
    }
}
