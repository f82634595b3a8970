use std::process;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use futures::future::join_all;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use ovn_topology_controller::addressset::MemoryAddressSetFactory;
use ovn_topology_controller::allocator::HostSubnetAllocator;
use ovn_topology_controller::cli::{format_dry_run, format_router_summary, parse_node_arg, Args};
use ovn_topology_controller::config::{load_config_file, ControllerConfig};
use ovn_topology_controller::controller::version::NO_TOPOLOGY_VERSION;
use ovn_topology_controller::controller::{
    ControllerDeps, NetworkController, SharedContext, CURRENT_TOPOLOGY_VERSION,
};
use ovn_topology_controller::events::LogEventRecorder;
use ovn_topology_controller::kube::{InMemoryKube, Node, Pod, NODE_CHASSIS_ID_ANNOTATION};
use ovn_topology_controller::loadbalancer::LoadBalancerCache;
use ovn_topology_controller::nbdb::{MemoryNbClient, NbClient, OVN_CLUSTER_ROUTER};
use ovn_topology_controller::retry::RetryQueue;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Initialize logging
    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    // Load and validate config
    let config = match load_config_file(&args.config_file) {
        Ok(config) => config,
        Err(e) => {
            error!(
                "Failed to load config file {}: {}",
                args.config_file.display(),
                e
            );
            process::exit(1);
        }
    };

    // Dry-run mode: print settings and exit
    if args.dry_run {
        let output = format_dry_run(&config, &args);
        println!("{}", output);
        return;
    }

    match bootstrap(config, &args).await {
        Ok(summary) => println!("{}", summary),
        Err(e) => {
            error!("Bootstrap failed: {:#}", e);
            process::exit(1);
        }
    }
}

/// Build the cluster router and the requested nodes against in-memory
/// backends, returning a summary of the resulting router
async fn bootstrap(config: ControllerConfig, args: &Args) -> anyhow::Result<String> {
    let kube = Arc::new(InMemoryKube::new());
    let nb = Arc::new(MemoryNbClient::new());

    let ctx = Arc::new(SharedContext::new(
        kube.clone(),
        kube.clone(),
        nb.clone(),
        Arc::new(LogEventRecorder),
        config.sctp_support,
        config.multicast_enabled,
    ));
    let deps = ControllerDeps {
        subnet_allocator: Arc::new(HostSubnetAllocator::new(config.cluster_subnets.clone())),
        address_sets: Arc::new(MemoryAddressSetFactory::new()),
        lb_cache: Arc::new(LoadBalancerCache::new()),
        retry_pods: Arc::new(RetryQueue::<Pod>::new("pods")),
        retry_nodes: Arc::new(RetryQueue::<Node>::new("nodes")),
    };
    let controller = NetworkController::new(ctx, config, deps);

    match controller.detect_version().await? {
        NO_TOPOLOGY_VERSION => info!("No existing topology, starting fresh"),
        v if v < CURRENT_TOPOLOGY_VERSION => {
            info!("Upgrading topology from version {} to {}", v, CURRENT_TOPOLOGY_VERSION)
        }
        v => info!("Topology already at version {}", v),
    }
    controller.ensure_cluster_router().await?;

    let mut nodes = Vec::new();
    for arg in &args.nodes {
        let (name, chassis) = parse_node_arg(arg)
            .ok_or_else(|| anyhow!("invalid node {:?}, expected NAME=CHASSIS", arg))?;
        nodes.push(kube.upsert_node(
            Node::new(name).with_annotation(NODE_CHASSIS_ID_ANNOTATION, chassis),
        ));
    }

    let managed = controller.sync_existing_nodes(&nodes).await;
    info!("{} of {} nodes manage host subnets", managed.len(), nodes.len());

    controller.watch_nodes().await?;
    controller.watch_pods().await?;

    let results = join_all(nodes.iter().map(|node| controller.add_node(node))).await;
    for (node, result) in nodes.iter().zip(results) {
        match result {
            Ok(subnets) => info!("Added node {} with {} host subnets", node.name(), subnets.len()),
            Err(e) => warn!("Failed to add node {}: {}", node.name(), e),
        }
    }

    controller.update_l3_topology_version().await?;

    let router = nb
        .get_logical_router(OVN_CLUSTER_ROUTER)
        .await
        .context("reading back the cluster router")?;
    let version = controller.detect_version().await?;

    controller.stop();
    controller.wait_for_deferred_tasks().await;

    Ok(format_router_summary(&router, version))
}
