//! Re-queue a node's pods once the node's topology exists
//!
//! Pods scheduled before their node finished reconciling failed to get a
//! port. They are put back on the retry queue without backoff.

use tracing::{debug, error};

use super::{ControllerError, NetworkController};

impl NetworkController {
    /// Queue every non-completed pod on `node_name` and flush the queue.
    ///
    /// Errors are collected rather than returned early; the flush happens
    /// regardless.
    pub async fn add_all_pods_on_node(&self, node_name: &str) -> Vec<ControllerError> {
        let mut errs: Vec<ControllerError> = Vec::new();

        match self.ctx.kube.list_pods_on_node(node_name).await {
            Ok(pods) => {
                debug!("Found {} pods on node {}", pods.len(), node_name);
                for pod in pods {
                    if pod.is_completed() {
                        continue;
                    }
                    let name = pod.qualified_name();
                    debug!("Adding pod {} to the retry queue", name);
                    if let Err(e) = self.retry_pods.enqueue_no_backoff(pod).await {
                        error!("Failed to queue pod {} for retry: {}", name, e);
                        errs.push(e.into());
                    }
                }
            }
            Err(e) => {
                error!(
                    "Unable to list existing pods on node: {}, existing pods on this node may not function: {}",
                    node_name, e
                );
                errs.push(e.into());
            }
        }

        self.retry_pods.flush().await;
        errs
    }
}
