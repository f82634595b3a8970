//! Network controller - turns cluster state into OVN logical topology
//!
//! One [`NetworkController`] runs per logical network. All of them share a
//! single [`SharedContext`] holding the cluster-wide clients.
//!
//! The controller is responsible for:
//! - The cluster router and its topology version marker
//! - Per-node switches, router ports and gateway chassis pinning
//! - Host subnet allocation and the node subnet annotation
//! - Per-namespace state with deferred address set cleanup
//! - Re-queuing a node's pods once the node is ready

pub mod annotation;
pub mod namespace;
pub mod node;
pub mod pods;
pub mod switch_manager;
pub mod topology;
pub mod version;

pub use namespace::{NamespaceGuard, NamespaceInfo, NamespaceRegistry};
pub use switch_manager::LogicalSwitchManager;
pub use version::CURRENT_TOPOLOGY_VERSION;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::addressset::{AddressSetError, AddressSetFactory};
use crate::allocator::{AllocatorError, SubnetAllocator};
use crate::config::ControllerConfig;
use crate::events::EventRecorder;
use crate::kube::{AnnotationError, KubeClient, KubeError, Node, NodeLister, Pod};
use crate::loadbalancer::LbSwitchCache;
use crate::nbdb::{NbClient, NbError};
use crate::retry::{RetryCoordinator, RetryError, WatchHandle};

/// Errors that can occur while reconciling topology
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("{context}: {source}")]
    Database {
        context: String,
        #[source]
        source: NbError,
    },

    #[error(transparent)]
    Kube(#[from] KubeError),

    #[error(transparent)]
    Annotation(#[from] AnnotationError),

    #[error(transparent)]
    Allocator(#[from] AllocatorError),

    #[error(transparent)]
    AddressSet(#[from] AddressSetError),

    #[error(transparent)]
    Retry(#[from] RetryError),

    #[error("invalid OVN topology version string {value:?} for the cluster: {reason}")]
    InvalidTopologyVersion { value: String, reason: String },

    #[error("failed to update node {node} annotation: {source}")]
    NodeAnnotationUpdate {
        node: String,
        #[source]
        source: Box<ControllerError>,
    },

    #[error("node {0} has no host subnets")]
    NoHostSubnets(String),

    #[error("{} errors: [{}]", .0.len(), join_errors(.0))]
    Aggregate(Vec<ControllerError>),
}

fn join_errors(errs: &[ControllerError]) -> String {
    errs.iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ControllerError {
    /// Wrap a database error with the operation that failed
    pub fn database(context: impl Into<String>, source: NbError) -> Self {
        ControllerError::Database {
            context: context.into(),
            source,
        }
    }

    /// Whether this is an optimistic-concurrency conflict worth retrying
    pub fn is_conflict(&self) -> bool {
        matches!(self, ControllerError::Kube(e) if e.is_conflict())
    }
}

/// Cluster-wide clients shared by every network controller
pub struct SharedContext {
    pub kube: Arc<dyn KubeClient>,
    pub watch: Arc<dyn NodeLister>,
    pub nb: Arc<dyn NbClient>,
    pub recorder: Arc<dyn EventRecorder>,
    pub sctp_support: bool,
    pub multicast_support: bool,
}

impl SharedContext {
    pub fn new(
        kube: Arc<dyn KubeClient>,
        watch: Arc<dyn NodeLister>,
        nb: Arc<dyn NbClient>,
        recorder: Arc<dyn EventRecorder>,
        sctp_support: bool,
        multicast_support: bool,
    ) -> Self {
        Self {
            kube,
            watch,
            nb,
            recorder,
            sctp_support,
            multicast_support,
        }
    }
}

/// Per-network collaborators injected into a [`NetworkController`]
pub struct ControllerDeps {
    pub subnet_allocator: Arc<dyn SubnetAllocator>,
    pub address_sets: Arc<dyn AddressSetFactory>,
    pub lb_cache: Arc<dyn LbSwitchCache>,
    pub retry_pods: Arc<dyn RetryCoordinator<Pod>>,
    pub retry_nodes: Arc<dyn RetryCoordinator<Node>>,
}

/// State of the controller for one logical network
pub struct NetworkController {
    ctx: Arc<SharedContext>,
    config: Arc<ControllerConfig>,

    /// Known namespaces; see [`NamespaceRegistry`] for the locking rules
    namespaces: NamespaceRegistry,

    /// Node switches and their subnets, consumed by pod IP management
    switches: LogicalSwitchManager,

    lb_cache: Arc<dyn LbSwitchCache>,
    address_sets: Arc<dyn AddressSetFactory>,
    subnet_allocator: Arc<dyn SubnetAllocator>,

    retry_pods: Arc<dyn RetryCoordinator<Pod>>,
    retry_nodes: Arc<dyn RetryCoordinator<Node>>,
    pod_handler: Mutex<Option<WatchHandle>>,
    node_handler: Mutex<Option<WatchHandle>>,

    shutdown: CancellationToken,
}

impl NetworkController {
    pub fn new(ctx: Arc<SharedContext>, config: ControllerConfig, deps: ControllerDeps) -> Self {
        let shutdown = CancellationToken::new();
        let namespaces = NamespaceRegistry::new(config.address_set_grace(), shutdown.clone());

        Self {
            ctx,
            config: Arc::new(config),
            namespaces,
            switches: LogicalSwitchManager::new(),
            lb_cache: deps.lb_cache,
            address_sets: deps.address_sets,
            subnet_allocator: deps.subnet_allocator,
            retry_pods: deps.retry_pods,
            retry_nodes: deps.retry_nodes,
            pod_handler: Mutex::new(None),
            node_handler: Mutex::new(None),
            shutdown,
        }
    }

    pub fn context(&self) -> &SharedContext {
        &self.ctx
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    pub fn network_name(&self) -> &str {
        &self.config.network_name
    }

    pub fn namespaces(&self) -> &NamespaceRegistry {
        &self.namespaces
    }

    pub fn switches(&self) -> &LogicalSwitchManager {
        &self.switches
    }

    /// Start watching nodes; a second call is a no-op
    pub async fn watch_nodes(&self) -> Result<(), ControllerError> {
        let mut handler = self.node_handler.lock().await;
        if handler.is_none() {
            *handler = Some(self.retry_nodes.watch_resource().await?);
        }
        Ok(())
    }

    /// Start watching pods; a second call is a no-op
    pub async fn watch_pods(&self) -> Result<(), ControllerError> {
        let mut handler = self.pod_handler.lock().await;
        if handler.is_none() {
            *handler = Some(self.retry_pods.watch_resource().await?);
        }
        Ok(())
    }

    /// Signal shutdown; pending deferred cleanups exit without running
    pub fn stop(&self) {
        info!("Stopping network controller for {}", self.network_name());
        self.shutdown.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Wait for background tasks spawned by this controller to finish
    pub async fn wait_for_deferred_tasks(&self) {
        self.namespaces.wait_for_deferred_tasks().await;
    }
}
