//! Northbound topology for the cluster router and node switches
//!
//! Every builder here is create-or-update: running it twice with the same
//! inputs leaves the database as the first run left it.

use std::collections::BTreeMap;

use ipnet::IpNet;
use tracing::{debug, error, info};

use super::{ControllerError, NetworkController};
use crate::kube::{parse_node_chassis_id, parse_node_host_subnets, Node};
use crate::nbdb::{
    Copp, GatewayChassis, LogicalRouter, LogicalRouterPort, LogicalSwitch, LogicalSwitchPort,
    CLUSTER_ROUTER_EXTERNAL_ID, CLUSTER_RTR_PORT_GROUP, DEFAULT_COPP_NAME, OVN_CLUSTER_ROUTER,
    ROUTER_TO_SWITCH_PREFIX, SWITCH_TO_ROUTER_PREFIX,
};
use crate::netutil::{
    gateway_if_addr, hw_addr_to_ipv6_lla, hybrid_overlay_if_addr, is_ipv6, join_subnets,
    management_if_addr, router_port_mac,
};

/// Protocols rate limited by the default control plane protection profile
const DEFAULT_COPP_PROTOCOLS: &[&str] = &[
    "arp",
    "arp-resolve",
    "bfd",
    "event-elb",
    "icmp4-error",
    "icmp6-error",
    "reject",
    "tcp-reset",
    "svc-monitor",
];

/// Name of the router port facing `node`'s switch
pub fn router_to_switch_port(node: &str) -> String {
    format!("{}{}", ROUTER_TO_SWITCH_PREFIX, node)
}

/// Name of the switch port facing the cluster router
pub fn switch_to_router_port(node: &str) -> String {
    format!("{}{}", SWITCH_TO_ROUTER_PREFIX, node)
}

impl NetworkController {
    /// Ensure the control plane protection profile the cluster router uses
    pub async fn ensure_default_copp(&self) -> Result<String, ControllerError> {
        let meters = DEFAULT_COPP_PROTOCOLS
            .iter()
            .map(|proto| (proto.to_string(), format!("{}-rate-limiter", proto)))
            .collect();
        let copp = Copp {
            name: DEFAULT_COPP_NAME.to_string(),
            meters,
            ..Default::default()
        };

        self.ctx
            .nb
            .create_or_update_copp(&copp)
            .await
            .map_err(|e| ControllerError::database("unable to create router control plane protection", e))
    }

    /// Create or update the distributed cluster router
    pub async fn ensure_cluster_router(&self) -> Result<LogicalRouter, ControllerError> {
        let copp_uuid = self.ensure_default_copp().await?;

        let mut external_ids = BTreeMap::new();
        external_ids.insert(CLUSTER_ROUTER_EXTERNAL_ID.to_string(), "yes".to_string());

        let mut options = BTreeMap::new();
        if self.ctx.multicast_support {
            options.insert("mcast_relay".to_string(), "true".to_string());
        } else {
            options.insert("always_learn_from_arp_request".to_string(), "false".to_string());
        }

        let mut router = LogicalRouter {
            name: OVN_CLUSTER_ROUTER.to_string(),
            external_ids,
            options,
            copp: Some(copp_uuid),
            ..Default::default()
        };

        router.uuid = self
            .ctx
            .nb
            .create_or_update_logical_router(&router)
            .await
            .map_err(|e| {
                ControllerError::database(
                    format!("failed to create distributed router {}", OVN_CLUSTER_ROUTER),
                    e,
                )
            })?;

        info!("Ensured cluster router {}", OVN_CLUSTER_ROUTER);
        Ok(router)
    }

    /// Create or update the router port for `node` and pin it to the node's
    /// chassis. With no `host_subnets` the node's annotation is used.
    pub async fn ensure_node_router_port(
        &self,
        node: &Node,
        host_subnets: &[IpNet],
    ) -> Result<(), ControllerError> {
        let chassis_id = parse_node_chassis_id(node)?;

        let subnets = if host_subnets.is_empty() {
            parse_node_host_subnets(node, self.network_name())?
        } else {
            host_subnets.to_vec()
        };

        let mac = router_port_mac(&subnets)
            .ok_or_else(|| ControllerError::NoHostSubnets(node.name().to_string()))?;

        let port_name = router_to_switch_port(node.name());
        let port = LogicalRouterPort {
            name: port_name.clone(),
            mac: mac.to_string(),
            networks: subnets
                .iter()
                .map(|s| gateway_if_addr(s).to_string())
                .collect(),
            ..Default::default()
        };
        let chassis = GatewayChassis {
            name: format!("{}-{}", port_name, chassis_id),
            chassis_name: chassis_id.clone(),
            priority: 1,
            ..Default::default()
        };

        self.ctx
            .nb
            .create_or_update_logical_router_port(OVN_CLUSTER_ROUTER, &port, Some(&chassis))
            .await
            .map_err(|e| {
                error!(
                    "Failed to add gateway chassis {} to logical router port {}: {}",
                    chassis_id, port_name, e
                );
                ControllerError::database(
                    format!("failed to create router port {} for node {}", port_name, node.name()),
                    e,
                )
            })?;

        debug!(
            "Router port {} for node {} pinned to chassis {}",
            port_name,
            node.name(),
            chassis_id
        );
        Ok(())
    }

    /// Create or update the switch of `node_name` and its link to the
    /// cluster router, then register the switch locally
    pub async fn ensure_node_switch(
        &self,
        node_name: &str,
        host_subnets: &[IpNet],
        load_balancer_group: Option<&str>,
    ) -> Result<String, ControllerError> {
        let mac = router_port_mac(host_subnets);

        let mut other_config = BTreeMap::new();
        let mut v4_gateway = None;
        let mut v6_gateway = None;
        let mut exclude_ips = Vec::new();

        for subnet in host_subnets {
            let gateway = gateway_if_addr(subnet);
            let management = management_if_addr(subnet);

            if is_ipv6(subnet) {
                other_config.insert("ipv6_prefix".to_string(), subnet.network().to_string());
                v6_gateway = Some(gateway);
            } else {
                other_config.insert("subnet".to_string(), subnet.to_string());
                v4_gateway = Some(gateway);

                let mut excluded = management.addr().to_string();
                if self.config.hybrid_overlay_enabled {
                    excluded = format!("{}..{}", excluded, hybrid_overlay_if_addr(subnet).addr());
                }
                exclude_ips.push(excluded);
            }
        }
        if !exclude_ips.is_empty() {
            other_config.insert("exclude_ips".to_string(), exclude_ips.join(" "));
        }

        if self.ctx.multicast_support {
            other_config.insert("mcast_snoop".to_string(), "true".to_string());

            // the querier needs a source address; without a gateway it stays off
            if v4_gateway.is_some() || v6_gateway.is_some() {
                other_config.insert("mcast_querier".to_string(), "true".to_string());
                if let Some(mac) = mac {
                    other_config.insert("mcast_eth_src".to_string(), mac.to_string());
                }
                if let Some(gw) = v4_gateway {
                    other_config.insert("mcast_ip4_src".to_string(), gw.addr().to_string());
                }
                if let (Some(_), Some(mac)) = (v6_gateway, mac) {
                    other_config.insert(
                        "mcast_ip6_src".to_string(),
                        hw_addr_to_ipv6_lla(mac).to_string(),
                    );
                }
            } else {
                other_config.insert("mcast_querier".to_string(), "false".to_string());
            }
        }

        let switch = LogicalSwitch {
            name: node_name.to_string(),
            other_config,
            load_balancer_group: load_balancer_group
                .map(|g| vec![g.to_string()])
                .unwrap_or_default(),
            ..Default::default()
        };

        let switch_uuid = self
            .ctx
            .nb
            .create_or_update_logical_switch(&switch)
            .await
            .map_err(|e| {
                ControllerError::database(format!("failed to create logical switch {}", node_name), e)
            })?;

        let stor = LogicalSwitchPort {
            name: switch_to_router_port(node_name),
            port_type: "router".to_string(),
            addresses: vec!["router".to_string()],
            options: BTreeMap::from([(
                "router-port".to_string(),
                router_to_switch_port(node_name),
            )]),
            ..Default::default()
        };
        let stor_uuid = self
            .ctx
            .nb
            .create_or_update_logical_switch_port(node_name, &stor)
            .await
            .map_err(|e| {
                ControllerError::database(
                    format!(
                        "failed to add logical port {} to switch {}",
                        stor.name, node_name
                    ),
                    e,
                )
            })?;

        if self.ctx.multicast_support {
            self.ctx
                .nb
                .add_ports_to_port_group(CLUSTER_RTR_PORT_GROUP, &[stor_uuid])
                .await
                .map_err(|e| {
                    ControllerError::database(
                        format!(
                            "failed to add port {} to port group {}",
                            stor.name, CLUSTER_RTR_PORT_GROUP
                        ),
                        e,
                    )
                })?;
        }

        self.switches.add_switch(node_name, &switch_uuid, host_subnets);
        info!(
            "Ensured logical switch {} with subnets {}",
            node_name,
            join_subnets(host_subnets)
        );
        Ok(switch_uuid)
    }

    /// Remove everything the node builders created for `node_name`
    pub async fn delete_node_topology(&self, node_name: &str) -> Result<(), ControllerError> {
        // drop cached references before the switch rows go away
        self.lb_cache.remove_switch(node_name);

        self.ctx
            .nb
            .delete_logical_switch(node_name)
            .await
            .map_err(|e| {
                ControllerError::database(format!("failed to delete logical switch {}", node_name), e)
            })?;

        let port_name = router_to_switch_port(node_name);
        self.ctx
            .nb
            .delete_logical_router_ports(OVN_CLUSTER_ROUTER, &[port_name.clone()])
            .await
            .map_err(|e| {
                ControllerError::database(
                    format!("failed to delete logical router port {}", port_name),
                    e,
                )
            })?;

        self.switches.delete_switch(node_name);
        info!("Deleted logical network of node {}", node_name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::harness;
    use super::*;
    use crate::config::{ClusterSubnet, ControllerConfig};
    use crate::kube::{NODE_CHASSIS_ID_ANNOTATION, NODE_SUBNETS_ANNOTATION};
    use crate::nbdb::NbClient;

    fn net(s: &str) -> IpNet {
        s.parse().unwrap()
    }

    fn dual_stack_config(multicast: bool) -> ControllerConfig {
        ControllerConfig {
            multicast_enabled: multicast,
            cluster_subnets: vec![
                ClusterSubnet {
                    cidr: net("10.244.0.0/16"),
                    host_subnet_length: 24,
                },
                ClusterSubnet {
                    cidr: net("fd00:10:244::/48"),
                    host_subnet_length: 64,
                },
            ],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_cluster_router_options() {
        let h = harness(ControllerConfig::default());
        let router = h.controller.ensure_cluster_router().await.unwrap();
        assert_eq!(
            router.options.get("always_learn_from_arp_request").map(String::as_str),
            Some("false")
        );
        assert!(!router.options.contains_key("mcast_relay"));
        assert!(router.copp.is_some());

        let stored = h.nb.get_logical_router(OVN_CLUSTER_ROUTER).await.unwrap();
        assert_eq!(
            stored.external_ids.get(CLUSTER_ROUTER_EXTERNAL_ID).map(String::as_str),
            Some("yes")
        );
    }

    #[tokio::test]
    async fn test_cluster_router_multicast_relay() {
        let h = harness(dual_stack_config(true));
        let router = h.controller.ensure_cluster_router().await.unwrap();
        assert_eq!(router.options.get("mcast_relay").map(String::as_str), Some("true"));
        assert!(!router.options.contains_key("always_learn_from_arp_request"));
    }

    #[tokio::test]
    async fn test_cluster_router_is_idempotent() {
        let h = harness(ControllerConfig::default());
        h.controller.ensure_cluster_router().await.unwrap();
        let mutations = h.nb.mutation_count();

        h.controller.ensure_cluster_router().await.unwrap();
        assert_eq!(h.nb.mutation_count(), mutations);
        assert_eq!(h.nb.copp_count().await, 1);
    }

    #[tokio::test]
    async fn test_copp_failure_aborts_router() {
        let h = harness(ControllerConfig::default());
        h.nb.fail_next("create_or_update_copp", 1);

        let err = h.controller.ensure_cluster_router().await.unwrap_err();
        assert!(err.to_string().contains("control plane protection"));
        assert!(h.nb.get_logical_router(OVN_CLUSTER_ROUTER).await.is_err());
    }

    #[tokio::test]
    async fn test_node_switch_multicast_querier() {
        let h = harness(dual_stack_config(true));
        h.controller.ensure_cluster_router().await.unwrap();
        let subnets = [net("10.244.1.0/24"), net("fd00:10:244:1::/64")];

        h.controller.ensure_node_switch("n1", &subnets, None).await.unwrap();

        let sw = h.nb.logical_switch("n1").await.unwrap();
        let cfg = &sw.other_config;
        assert_eq!(cfg.get("subnet").map(String::as_str), Some("10.244.1.0/24"));
        assert_eq!(cfg.get("ipv6_prefix").map(String::as_str), Some("fd00:10:244:1::"));
        assert_eq!(cfg.get("exclude_ips").map(String::as_str), Some("10.244.1.2"));
        assert_eq!(cfg.get("mcast_querier").map(String::as_str), Some("true"));
        assert_eq!(cfg.get("mcast_eth_src").map(String::as_str), Some("0a:58:0a:f4:01:01"));
        assert_eq!(cfg.get("mcast_ip4_src").map(String::as_str), Some("10.244.1.1"));
        assert_eq!(
            cfg.get("mcast_ip6_src").map(String::as_str),
            Some("fe80::858:aff:fef4:101")
        );

        let group = h.nb.port_group(CLUSTER_RTR_PORT_GROUP).await.unwrap();
        assert_eq!(group.ports.len(), 1);
    }

    #[tokio::test]
    async fn test_node_switch_multicast_without_gateway() {
        let h = harness(ControllerConfig {
            multicast_enabled: true,
            ..Default::default()
        });
        h.controller.ensure_node_switch("n1", &[], None).await.unwrap();

        let sw = h.nb.logical_switch("n1").await.unwrap();
        let cfg = &sw.other_config;
        assert_eq!(cfg.get("mcast_snoop").map(String::as_str), Some("true"));
        assert_eq!(cfg.get("mcast_querier").map(String::as_str), Some("false"));
        assert!(!cfg.contains_key("mcast_eth_src"));
        assert!(!cfg.contains_key("mcast_ip4_src"));
        assert!(!cfg.contains_key("mcast_ip6_src"));
    }

    #[tokio::test]
    async fn test_node_switch_without_multicast() {
        let h = harness(ControllerConfig {
            hybrid_overlay_enabled: true,
            ..Default::default()
        });
        h.controller
            .ensure_node_switch("n1", &[net("10.244.1.0/24")], Some("lbg-1"))
            .await
            .unwrap();

        let sw = h.nb.logical_switch("n1").await.unwrap();
        assert!(!sw.other_config.contains_key("mcast_snoop"));
        assert_eq!(
            sw.other_config.get("exclude_ips").map(String::as_str),
            Some("10.244.1.2..10.244.1.3")
        );
        assert_eq!(sw.load_balancer_group, vec!["lbg-1".to_string()]);
        assert!(h.nb.port_group(CLUSTER_RTR_PORT_GROUP).await.is_none());

        let stor = h.nb.logical_switch_port("stor-n1").await.unwrap();
        assert_eq!(stor.port_type, "router");
        assert_eq!(stor.options.get("router-port").map(String::as_str), Some("rtos-n1"));
        assert_eq!(
            h.controller.switches().get_switch_subnets("n1"),
            Some(vec![net("10.244.1.0/24")])
        );
    }

    #[tokio::test]
    async fn test_router_port_chassis_rebinding() {
        let h = harness(ControllerConfig::default());
        h.controller.ensure_cluster_router().await.unwrap();
        let subnets = [net("10.244.1.0/24")];

        let node = Node::new("n1").with_annotation(NODE_CHASSIS_ID_ANNOTATION, "chassis-a");
        h.controller.ensure_node_router_port(&node, &subnets).await.unwrap();

        let port = h.nb.logical_router_port("rtos-n1").await.unwrap();
        assert_eq!(port.mac, "0a:58:0a:f4:01:01");
        assert_eq!(port.networks, vec!["10.244.1.1/24".to_string()]);

        let node = node.with_annotation(NODE_CHASSIS_ID_ANNOTATION, "chassis-b");
        h.controller.ensure_node_router_port(&node, &subnets).await.unwrap();

        let chassis = h.nb.gateway_chassis_for_port("rtos-n1").await;
        assert_eq!(chassis.len(), 1);
        assert_eq!(chassis[0].name, "rtos-n1-chassis-b");
        assert_eq!(chassis[0].chassis_name, "chassis-b");
        assert_eq!(chassis[0].priority, 1);
        assert_eq!(h.nb.gateway_chassis_count().await, 1);
    }

    #[tokio::test]
    async fn test_router_port_falls_back_to_annotation() {
        let h = harness(ControllerConfig::default());
        h.controller.ensure_cluster_router().await.unwrap();

        let node = Node::new("n1")
            .with_annotation(NODE_CHASSIS_ID_ANNOTATION, "chassis-a")
            .with_annotation(NODE_SUBNETS_ANNOTATION, r#"{"default":"10.244.7.0/24"}"#);
        h.controller.ensure_node_router_port(&node, &[]).await.unwrap();

        let port = h.nb.logical_router_port("rtos-n1").await.unwrap();
        assert_eq!(port.networks, vec!["10.244.7.1/24".to_string()]);
    }

    #[tokio::test]
    async fn test_router_port_requires_chassis() {
        let h = harness(ControllerConfig::default());
        let err = h
            .controller
            .ensure_node_router_port(&Node::new("n1"), &[net("10.244.1.0/24")])
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Annotation(_)));
    }

    #[tokio::test]
    async fn test_delete_node_topology_is_tolerant() {
        let h = harness(ControllerConfig::default());
        h.controller.ensure_cluster_router().await.unwrap();
        h.controller
            .ensure_node_switch("n1", &[net("10.244.1.0/24")], None)
            .await
            .unwrap();
        h.lb_cache.add_switch("lb-1", "n1");

        h.controller.delete_node_topology("n1").await.unwrap();
        assert!(h.nb.logical_switch("n1").await.is_none());
        assert!(h.nb.logical_switch_port("stor-n1").await.is_none());
        assert!(!h.lb_cache.references("n1"));
        assert!(h.controller.switches().get_switch_subnets("n1").is_none());

        // nothing left to delete
        h.controller.delete_node_topology("n1").await.unwrap();
    }

    #[tokio::test]
    async fn test_delete_node_topology_clears_lb_cache_first() {
        let h = harness(ControllerConfig::default());
        h.controller
            .ensure_node_switch("n1", &[net("10.244.1.0/24")], None)
            .await
            .unwrap();
        h.lb_cache.add_switch("lb-1", "n1");
        h.nb.fail_next("delete_logical_switch", 1);

        let err = h.controller.delete_node_topology("n1").await.unwrap_err();
        assert!(matches!(err, ControllerError::Database { .. }));
        assert!(!h.lb_cache.references("n1"));
        assert!(h.nb.logical_switch("n1").await.is_some());
    }
}
