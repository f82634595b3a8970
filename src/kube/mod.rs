//! Kubernetes API surface used by the topology controller
//!
//! The controller never owns the API server connection. It sees two seams:
//! - [`NodeLister`]: reads from the watch cache (informer)
//! - [`KubeClient`]: writes nodes and lists pods on the API server
//!
//! [`InMemoryKube`] implements both over a single in-process store.

pub mod annotations;
pub mod memory;
pub mod types;

pub use annotations::{
    parse_node_chassis_id, parse_node_host_subnets, update_node_host_subnet_annotation,
    AnnotationError, NODE_CHASSIS_ID_ANNOTATION, NODE_SUBNETS_ANNOTATION,
};
pub use memory::InMemoryKube;
pub use types::{Node, ObjectMeta, Pod, PodPhase};

use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by the API server
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KubeError {
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    #[error("conflict updating {kind} '{name}': the object has been modified")]
    Conflict { kind: String, name: String },

    #[error("API server unavailable: {0}")]
    Unavailable(String),
}

impl KubeError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, KubeError::Conflict { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, KubeError::NotFound { .. })
    }
}

/// Read access to the node watch cache
#[async_trait]
pub trait NodeLister: Send + Sync {
    /// Fetch the current cached copy of a node
    async fn get_node(&self, name: &str) -> Result<Node, KubeError>;
}

/// Write access to the API server
#[async_trait]
pub trait KubeClient: Send + Sync {
    /// Patch `old` into `new`. Fails with [`KubeError::Conflict`] if the
    /// node changed since `old` was read.
    async fn patch_node(&self, old: &Node, new: &Node) -> Result<(), KubeError>;

    /// List every pod whose `nodeName` is `node_name`, across namespaces
    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>, KubeError>;
}
