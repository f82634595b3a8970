//! Minimal Node and Pod resources
//!
//! Only the fields the topology controller reads are modelled: names,
//! labels, annotations, the resource version used for optimistic
//! concurrency, and the pod placement/phase.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::retry::Retryable;

/// Object metadata shared by nodes and pods
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    #[serde(default)]
    pub labels: HashMap<String, String>,

    #[serde(default)]
    pub annotations: HashMap<String, String>,

    /// Opaque version bumped by the API server on every write
    #[serde(rename = "resourceVersion", default)]
    pub resource_version: u64,
}

/// A cluster node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    pub metadata: ObjectMeta,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.into(),
                ..Default::default()
            },
        }
    }

    /// Set an annotation
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.annotations.insert(key.into(), value.into());
        self
    }

    /// Set a label
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.labels.insert(key.into(), value.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.metadata.name
    }
}

impl Retryable for Node {
    fn retry_key(&self) -> String {
        self.metadata.name.clone()
    }
}

/// Lifecycle phase of a pod
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

/// A pod scheduled onto a node
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pod {
    pub metadata: ObjectMeta,

    #[serde(rename = "nodeName", default)]
    pub node_name: String,

    #[serde(default)]
    pub phase: PodPhase,
}

impl Pod {
    pub fn new(
        namespace: impl Into<String>,
        name: impl Into<String>,
        node_name: impl Into<String>,
    ) -> Self {
        Self {
            metadata: ObjectMeta {
                name: name.into(),
                namespace: namespace.into(),
                ..Default::default()
            },
            node_name: node_name.into(),
            phase: PodPhase::Pending,
        }
    }

    pub fn with_phase(mut self, phase: PodPhase) -> Self {
        self.phase = phase;
        self
    }

    /// A pod that has run to completion no longer needs networking
    pub fn is_completed(&self) -> bool {
        matches!(self.phase, PodPhase::Succeeded | PodPhase::Failed)
    }

    /// `namespace/name`
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.metadata.namespace, self.metadata.name)
    }
}

impl Retryable for Pod {
    fn retry_key(&self) -> String {
        self.qualified_name()
    }
}
