//! Integration tests for node reconciliation
//!
//! These tests drive a `NetworkController` wired to the in-memory API
//! server, northbound database and subnet allocator, and check the rows
//! and annotations a node leaves behind.

use std::sync::Arc;

use async_trait::async_trait;
use ipnet::IpNet;
use tokio::sync::Mutex;
use tokio_test::{assert_err, assert_ok};

use ovn_topology_controller::addressset::MemoryAddressSetFactory;
use ovn_topology_controller::allocator::{
    AllocatorError, HostSubnetAllocator, NodeSubnets, SubnetAllocator,
};
use ovn_topology_controller::config::{
    ClusterSubnet, ConflictRetryConfig, ControllerConfig, DEFAULT_NETWORK_NAME,
};
use ovn_topology_controller::controller::version::NO_TOPOLOGY_VERSION;
use ovn_topology_controller::controller::{
    ControllerDeps, ControllerError, NetworkController, SharedContext,
};
use ovn_topology_controller::events::MemoryEventRecorder;
use ovn_topology_controller::kube::{
    parse_node_host_subnets, InMemoryKube, Node, NodeLister, Pod, PodPhase,
    NODE_CHASSIS_ID_ANNOTATION, NODE_SUBNETS_ANNOTATION,
};
use ovn_topology_controller::loadbalancer::LoadBalancerCache;
use ovn_topology_controller::nbdb::{
    LogicalRouter, MemoryNbClient, NbClient, OVN_CLUSTER_ROUTER, TOPOLOGY_VERSION_EXTERNAL_ID,
};
use ovn_topology_controller::retry::RetryQueue;

fn net(s: &str) -> IpNet {
    s.parse().unwrap()
}

/// Allocator wrapper that records every release request
struct RecordingAllocator {
    inner: HostSubnetAllocator,
    releases: Mutex<Vec<(String, Vec<IpNet>)>>,
}

impl RecordingAllocator {
    fn new(ranges: Vec<ClusterSubnet>) -> Self {
        Self {
            inner: HostSubnetAllocator::new(ranges),
            releases: Mutex::new(Vec::new()),
        }
    }

    async fn releases(&self) -> Vec<(String, Vec<IpNet>)> {
        self.releases.lock().await.clone()
    }
}

#[async_trait]
impl SubnetAllocator for RecordingAllocator {
    async fn allocate_node_subnets(
        &self,
        node: &str,
        existing: &[IpNet],
        ipv4: bool,
        ipv6: bool,
    ) -> Result<NodeSubnets, AllocatorError> {
        self.inner
            .allocate_node_subnets(node, existing, ipv4, ipv6)
            .await
    }

    async fn release_node_subnets(
        &self,
        node: &str,
        subnets: &[IpNet],
    ) -> Result<(), AllocatorError> {
        self.releases
            .lock()
            .await
            .push((node.to_string(), subnets.to_vec()));
        self.inner.release_node_subnets(node, subnets).await
    }

    async fn mark_subnets_allocated(
        &self,
        node: &str,
        subnets: &[IpNet],
    ) -> Result<(), AllocatorError> {
        self.inner.mark_subnets_allocated(node, subnets).await
    }
}

struct Cluster {
    controller: NetworkController,
    kube: Arc<InMemoryKube>,
    nb: Arc<MemoryNbClient>,
    allocator: Arc<RecordingAllocator>,
    retry_pods: Arc<RetryQueue<Pod>>,
    recorder: Arc<MemoryEventRecorder>,
}

fn cluster(config: ControllerConfig) -> Cluster {
    let kube = Arc::new(InMemoryKube::new());
    let nb = Arc::new(MemoryNbClient::new());
    let allocator = Arc::new(RecordingAllocator::new(config.cluster_subnets.clone()));
    let retry_pods = Arc::new(RetryQueue::<Pod>::new("pods"));
    let recorder = Arc::new(MemoryEventRecorder::new());

    let ctx = Arc::new(SharedContext::new(
        kube.clone(),
        kube.clone(),
        nb.clone(),
        recorder.clone(),
        config.sctp_support,
        config.multicast_enabled,
    ));
    let deps = ControllerDeps {
        subnet_allocator: allocator.clone(),
        address_sets: Arc::new(MemoryAddressSetFactory::new()),
        lb_cache: Arc::new(LoadBalancerCache::new()),
        retry_pods: retry_pods.clone(),
        retry_nodes: Arc::new(RetryQueue::<Node>::new("nodes")),
    };

    Cluster {
        controller: NetworkController::new(ctx, config, deps),
        kube,
        nb,
        allocator,
        retry_pods,
        recorder,
    }
}

fn dual_stack() -> ControllerConfig {
    ControllerConfig {
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
async fn test_worker_joins_fresh_cluster() {
    let c = cluster(ControllerConfig::default());
    assert_ok!(c.controller.ensure_cluster_router().await);

    c.kube.upsert_pod(Pod::new("default", "web", "worker-1").with_phase(PodPhase::Running));
    let worker = c.kube.upsert_node(
        Node::new("worker-1").with_annotation(NODE_CHASSIS_ID_ANNOTATION, "chassis-w1"),
    );

    let subnets = c.controller.add_node(&worker).await.unwrap();
    assert_eq!(subnets, vec![net("10.244.0.0/24")]);

    // switch
    let switch = c.nb.logical_switch("worker-1").await.unwrap();
    assert_eq!(
        switch.other_config.get("subnet").map(String::as_str),
        Some("10.244.0.0/24")
    );
    assert_eq!(
        switch.other_config.get("exclude_ips").map(String::as_str),
        Some("10.244.0.2")
    );

    // router port and its single gateway chassis
    let port = c.nb.logical_router_port("rtos-worker-1").await.unwrap();
    assert_eq!(port.networks, vec!["10.244.0.1/24".to_string()]);
    assert_eq!(port.mac, "0a:58:0a:f4:00:01");

    let chassis = c.nb.gateway_chassis_for_port("rtos-worker-1").await;
    assert_eq!(chassis.len(), 1);
    assert_eq!(chassis[0].chassis_name, "chassis-w1");
    assert_eq!(chassis[0].priority, 1);

    // annotation and pod requeue
    let stored = c.kube.get_node("worker-1").await.unwrap();
    assert_eq!(
        parse_node_host_subnets(&stored, DEFAULT_NETWORK_NAME).unwrap(),
        vec![net("10.244.0.0/24")]
    );
    assert!(c.retry_pods.contains("default/web"));
    assert_eq!(c.retry_pods.flush_count(), 1);
}

#[tokio::test]
async fn test_failed_annotation_releases_only_new_subnets() {
    let c = cluster(ControllerConfig {
        conflict_retry: ConflictRetryConfig {
            max_attempts: 2,
            initial_delay_ms: 1,
            max_delay_ms: 1,
            ..Default::default()
        },
        ..dual_stack()
    });
    assert_ok!(c.controller.ensure_cluster_router().await);

    // the node already claims an IPv4 subnet; only IPv6 is new
    let hint = net("10.244.9.0/24");
    let worker = c.kube.upsert_node(
        Node::new("worker-1")
            .with_annotation(NODE_CHASSIS_ID_ANNOTATION, "chassis-w1")
            .with_annotation(
                NODE_SUBNETS_ANNOTATION,
                format!(r#"{{"{}":"{}"}}"#, DEFAULT_NETWORK_NAME, hint),
            ),
    );
    c.kube.inject_conflicts(10);

    let err = c.controller.add_node(&worker).await.unwrap_err();
    assert!(matches!(err, ControllerError::NodeAnnotationUpdate { .. }));

    let releases = c.allocator.releases().await;
    assert_eq!(releases.len(), 1);
    let (node, released) = &releases[0];
    assert_eq!(node, "worker-1");
    assert_eq!(released, &vec![net("fd00:10:244::/64")]);
    assert!(!released.contains(&hint));

    assert_eq!(c.recorder.events().await.len(), 1);
}

#[tokio::test]
async fn test_allocation_failure_leaves_nothing_behind() {
    let c = cluster(ControllerConfig {
        cluster_subnets: vec![ClusterSubnet {
            cidr: net("10.0.0.0/24"),
            host_subnet_length: 24,
        }],
        ..Default::default()
    });
    assert_ok!(c.controller.ensure_cluster_router().await);

    let a = c
        .kube
        .upsert_node(Node::new("a").with_annotation(NODE_CHASSIS_ID_ANNOTATION, "ca"));
    let b = c
        .kube
        .upsert_node(Node::new("b").with_annotation(NODE_CHASSIS_ID_ANNOTATION, "cb"));

    assert_ok!(c.controller.add_node(&a).await);
    let err = c.controller.add_node(&b).await.unwrap_err();
    assert!(matches!(err, ControllerError::Allocator(_)));
    assert!(c.nb.logical_switch("b").await.is_none());
    assert!(c.allocator.releases().await.is_empty());
}

#[tokio::test]
async fn test_chassis_change_rebinds_router_port() {
    let c = cluster(ControllerConfig::default());
    assert_ok!(c.controller.ensure_cluster_router().await);

    let worker = c.kube.upsert_node(
        Node::new("worker-1").with_annotation(NODE_CHASSIS_ID_ANNOTATION, "chassis-old"),
    );
    assert_ok!(c.controller.add_node(&worker).await);

    let moved = c
        .kube
        .get_node("worker-1")
        .await
        .unwrap()
        .with_annotation(NODE_CHASSIS_ID_ANNOTATION, "chassis-new");
    assert_ok!(c.controller.sync_node_cluster_router_port(&moved, &[]).await);

    let chassis = c.nb.gateway_chassis_for_port("rtos-worker-1").await;
    assert_eq!(chassis.len(), 1);
    assert_eq!(chassis[0].chassis_name, "chassis-new");
    assert_eq!(c.nb.gateway_chassis_count().await, 1);
}

#[tokio::test]
async fn test_delete_unknown_node_is_tolerated() {
    let c = cluster(ControllerConfig::default());
    assert_ok!(c.controller.delete_node_topology("never-existed").await);
    assert_ok!(c.controller.delete_node("never-existed", &[]).await);
}

#[tokio::test]
async fn test_node_readd_after_delete_gets_subnet_back() {
    let c = cluster(ControllerConfig::default());
    assert_ok!(c.controller.ensure_cluster_router().await);

    let worker = c.kube.upsert_node(
        Node::new("worker-1").with_annotation(NODE_CHASSIS_ID_ANNOTATION, "chassis-w1"),
    );
    let subnets = c.controller.add_node(&worker).await.unwrap();
    assert_ok!(c.controller.delete_node("worker-1", &subnets).await);
    assert!(c.nb.logical_switch("worker-1").await.is_none());

    let again = c.controller.add_node(&worker).await.unwrap();
    assert_eq!(again, subnets);
}

#[tokio::test]
async fn test_router_ensure_is_idempotent() {
    let c = cluster(ControllerConfig {
        multicast_enabled: true,
        ..Default::default()
    });
    assert_ok!(c.controller.ensure_cluster_router().await);
    let before = c.nb.mutation_count();

    assert_ok!(c.controller.ensure_cluster_router().await);
    assert_eq!(c.nb.mutation_count(), before);
}

#[tokio::test]
async fn test_topology_version_detection() {
    let c = cluster(ControllerConfig::default());
    assert_eq!(c.controller.detect_version().await.unwrap(), NO_TOPOLOGY_VERSION);

    assert_ok!(c.controller.ensure_cluster_router().await);
    assert_eq!(c.controller.detect_version().await.unwrap(), 0);

    for (raw, expected) in [("3", Some(3)), ("abc", None)] {
        let mut router = LogicalRouter {
            name: OVN_CLUSTER_ROUTER.to_string(),
            ..Default::default()
        };
        router
            .external_ids
            .insert(TOPOLOGY_VERSION_EXTERNAL_ID.to_string(), raw.to_string());
        assert_ok!(c.nb.create_or_update_logical_router(&router).await);

        match expected {
            Some(v) => assert_eq!(c.controller.detect_version().await.unwrap(), v),
            None => {
                assert_err!(c.controller.detect_version().await);
            }
        }
    }
}
