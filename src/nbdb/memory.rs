//! In-process northbound database
//!
//! Keeps every table in a single `RwLock` so that each operation is one
//! atomic transaction, the way a real OVSDB transact call is. A mutation
//! counter only moves when a row actually changes, which makes idempotent
//! re-ensures observable.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use super::{
    Copp, GatewayChassis, LogicalRouter, LogicalRouterPort, LogicalSwitch, LogicalSwitchPort,
    NbClient, NbError, PortGroup,
};

#[derive(Debug, Default)]
struct Tables {
    copps: BTreeMap<String, Copp>,
    routers: BTreeMap<String, LogicalRouter>,
    router_ports: BTreeMap<String, LogicalRouterPort>,
    gateway_chassis: BTreeMap<String, GatewayChassis>,
    switches: BTreeMap<String, LogicalSwitch>,
    switch_ports: BTreeMap<String, LogicalSwitchPort>,
    port_groups: BTreeMap<String, PortGroup>,
}

fn new_uuid() -> String {
    Uuid::new_v4().to_string()
}

/// Insert `row` under `name`; returns whether the table changed
fn upsert<T: PartialEq>(table: &mut BTreeMap<String, T>, name: &str, row: T) -> bool {
    if table.get(name) == Some(&row) {
        return false;
    }
    table.insert(name.to_string(), row);
    true
}

#[derive(Default)]
pub struct MemoryNbClient {
    tables: RwLock<Tables>,
    mutations: AtomicU64,
    failures: DashMap<&'static str, u32>,
}

impl MemoryNbClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` calls of the named [`NbClient`] method fail
    pub fn fail_next(&self, operation: &'static str, n: u32) {
        self.failures.insert(operation, n);
    }

    fn check_injected(&self, operation: &'static str) -> Result<(), NbError> {
        if let Some(mut remaining) = self.failures.get_mut(operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(NbError::Transaction(format!(
                    "injected failure in {}",
                    operation
                )));
            }
        }
        Ok(())
    }

    fn record(&self, changed: bool) {
        if changed {
            self.mutations.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Number of transactions that changed at least one row
    pub fn mutation_count(&self) -> u64 {
        self.mutations.load(Ordering::SeqCst)
    }

    pub async fn logical_switch(&self, name: &str) -> Option<LogicalSwitch> {
        self.tables.read().await.switches.get(name).cloned()
    }

    pub async fn logical_switch_port(&self, name: &str) -> Option<LogicalSwitchPort> {
        self.tables.read().await.switch_ports.get(name).cloned()
    }

    pub async fn logical_router_port(&self, name: &str) -> Option<LogicalRouterPort> {
        self.tables.read().await.router_ports.get(name).cloned()
    }

    /// Gateway chassis rows bound to a router port
    pub async fn gateway_chassis_for_port(&self, port: &str) -> Vec<GatewayChassis> {
        let tables = self.tables.read().await;
        tables
            .router_ports
            .get(port)
            .map(|p| {
                p.gateway_chassis
                    .iter()
                    .filter_map(|name| tables.gateway_chassis.get(name).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn gateway_chassis_count(&self) -> usize {
        self.tables.read().await.gateway_chassis.len()
    }

    pub async fn port_group(&self, name: &str) -> Option<PortGroup> {
        self.tables.read().await.port_groups.get(name).cloned()
    }

    pub async fn copp_count(&self) -> usize {
        self.tables.read().await.copps.len()
    }
}

#[async_trait]
impl NbClient for MemoryNbClient {
    async fn create_or_update_copp(&self, copp: &Copp) -> Result<String, NbError> {
        self.check_injected("create_or_update_copp")?;
        let mut tables = self.tables.write().await;

        let mut row = tables.copps.get(&copp.name).cloned().unwrap_or_else(|| Copp {
            uuid: new_uuid(),
            name: copp.name.clone(),
            ..Default::default()
        });
        row.meters = copp.meters.clone();

        let uuid = row.uuid.clone();
        let changed = upsert(&mut tables.copps, &copp.name, row);
        self.record(changed);
        Ok(uuid)
    }

    async fn create_or_update_logical_router(
        &self,
        router: &LogicalRouter,
    ) -> Result<String, NbError> {
        self.check_injected("create_or_update_logical_router")?;
        let mut tables = self.tables.write().await;

        let mut row = tables
            .routers
            .get(&router.name)
            .cloned()
            .unwrap_or_else(|| LogicalRouter {
                uuid: new_uuid(),
                name: router.name.clone(),
                ..Default::default()
            });
        row.external_ids.extend(router.external_ids.clone());
        row.options = router.options.clone();
        row.copp = router.copp.clone();

        let uuid = row.uuid.clone();
        let changed = upsert(&mut tables.routers, &router.name, row);
        if changed {
            debug!("Wrote logical router {}", router.name);
        }
        self.record(changed);
        Ok(uuid)
    }

    async fn get_logical_router(&self, name: &str) -> Result<LogicalRouter, NbError> {
        self.check_injected("get_logical_router")?;
        self.tables
            .read()
            .await
            .routers
            .get(name)
            .cloned()
            .ok_or_else(|| NbError::NotFound {
                table: "Logical_Router",
                name: name.to_string(),
            })
    }

    async fn set_logical_router_external_ids(
        &self,
        name: &str,
        external_ids: &BTreeMap<String, String>,
    ) -> Result<(), NbError> {
        self.check_injected("set_logical_router_external_ids")?;
        let mut tables = self.tables.write().await;

        let mut row = tables
            .routers
            .get(name)
            .cloned()
            .ok_or_else(|| NbError::NotFound {
                table: "Logical_Router",
                name: name.to_string(),
            })?;
        row.external_ids.extend(external_ids.clone());

        let changed = upsert(&mut tables.routers, name, row);
        self.record(changed);
        Ok(())
    }

    async fn create_or_update_logical_router_port(
        &self,
        router: &str,
        port: &LogicalRouterPort,
        chassis: Option<&GatewayChassis>,
    ) -> Result<String, NbError> {
        self.check_injected("create_or_update_logical_router_port")?;
        let mut tables = self.tables.write().await;

        let mut router_row = tables
            .routers
            .get(router)
            .cloned()
            .ok_or_else(|| NbError::NotFound {
                table: "Logical_Router",
                name: router.to_string(),
            })?;

        let mut port_row = tables
            .router_ports
            .get(&port.name)
            .cloned()
            .unwrap_or_else(|| LogicalRouterPort {
                uuid: new_uuid(),
                name: port.name.clone(),
                ..Default::default()
            });
        port_row.mac = port.mac.clone();
        port_row.networks = port.networks.clone();

        let mut changed = false;
        if let Some(chassis) = chassis {
            let mut chassis_row = tables
                .gateway_chassis
                .get(&chassis.name)
                .cloned()
                .unwrap_or_else(|| GatewayChassis {
                    uuid: new_uuid(),
                    name: chassis.name.clone(),
                    ..Default::default()
                });
            chassis_row.chassis_name = chassis.chassis_name.clone();
            chassis_row.priority = chassis.priority;
            changed |= upsert(&mut tables.gateway_chassis, &chassis.name, chassis_row);

            // drop bindings to any previous chassis
            for stale in port_row
                .gateway_chassis
                .iter()
                .filter(|name| **name != chassis.name)
            {
                changed |= tables.gateway_chassis.remove(stale).is_some();
            }
            port_row.gateway_chassis = vec![chassis.name.clone()];
        }

        let uuid = port_row.uuid.clone();
        changed |= upsert(&mut tables.router_ports, &port.name, port_row);

        router_row.ports.insert(port.name.clone());
        changed |= upsert(&mut tables.routers, router, router_row);

        self.record(changed);
        Ok(uuid)
    }

    async fn delete_logical_router_ports(
        &self,
        router: &str,
        ports: &[String],
    ) -> Result<(), NbError> {
        self.check_injected("delete_logical_router_ports")?;
        let mut tables = self.tables.write().await;
        let mut changed = false;

        for name in ports {
            if let Some(port) = tables.router_ports.remove(name) {
                changed = true;
                for chassis in &port.gateway_chassis {
                    tables.gateway_chassis.remove(chassis);
                }
            }
            if let Some(router_row) = tables.routers.get_mut(router) {
                changed |= router_row.ports.remove(name);
            }
        }

        self.record(changed);
        Ok(())
    }

    async fn create_or_update_logical_switch(
        &self,
        switch: &LogicalSwitch,
    ) -> Result<String, NbError> {
        self.check_injected("create_or_update_logical_switch")?;
        let mut tables = self.tables.write().await;

        let mut row = tables
            .switches
            .get(&switch.name)
            .cloned()
            .unwrap_or_else(|| LogicalSwitch {
                uuid: new_uuid(),
                name: switch.name.clone(),
                ..Default::default()
            });
        row.other_config = switch.other_config.clone();
        row.load_balancer_group = switch.load_balancer_group.clone();

        let uuid = row.uuid.clone();
        let changed = upsert(&mut tables.switches, &switch.name, row);
        self.record(changed);
        Ok(uuid)
    }

    async fn create_or_update_logical_switch_port(
        &self,
        switch: &str,
        port: &LogicalSwitchPort,
    ) -> Result<String, NbError> {
        self.check_injected("create_or_update_logical_switch_port")?;
        let mut tables = self.tables.write().await;

        let mut switch_row = tables
            .switches
            .get(switch)
            .cloned()
            .ok_or_else(|| NbError::NotFound {
                table: "Logical_Switch",
                name: switch.to_string(),
            })?;

        let mut port_row = tables
            .switch_ports
            .get(&port.name)
            .cloned()
            .unwrap_or_else(|| LogicalSwitchPort {
                uuid: new_uuid(),
                name: port.name.clone(),
                ..Default::default()
            });
        port_row.port_type = port.port_type.clone();
        port_row.addresses = port.addresses.clone();
        port_row.options = port.options.clone();

        let uuid = port_row.uuid.clone();
        let mut changed = upsert(&mut tables.switch_ports, &port.name, port_row);
        switch_row.ports.insert(port.name.clone());
        changed |= upsert(&mut tables.switches, switch, switch_row);

        self.record(changed);
        Ok(uuid)
    }

    async fn delete_logical_switch(&self, name: &str) -> Result<(), NbError> {
        self.check_injected("delete_logical_switch")?;
        let mut tables = self.tables.write().await;

        let Some(switch) = tables.switches.remove(name) else {
            return Ok(());
        };

        let removed: Vec<String> = switch
            .ports
            .iter()
            .filter_map(|port| tables.switch_ports.remove(port).map(|p| p.uuid))
            .collect();
        for group in tables.port_groups.values_mut() {
            for uuid in &removed {
                group.ports.remove(uuid);
            }
        }

        debug!("Deleted logical switch {} and {} ports", name, removed.len());
        self.record(true);
        Ok(())
    }

    async fn add_ports_to_port_group(
        &self,
        group: &str,
        port_uuids: &[String],
    ) -> Result<(), NbError> {
        self.check_injected("add_ports_to_port_group")?;
        let mut tables = self.tables.write().await;

        let mut row = tables
            .port_groups
            .get(group)
            .cloned()
            .unwrap_or_else(|| PortGroup {
                uuid: new_uuid(),
                name: group.to_string(),
                ..Default::default()
            });
        row.ports.extend(port_uuids.iter().cloned());

        let changed = upsert(&mut tables.port_groups, group, row);
        self.record(changed);
        Ok(())
    }
}
