//! Node subnet annotation writes
//!
//! The annotation is written with a read-modify-patch loop against the
//! watch cache. A conflict means another writer got there first, so the
//! node is read again and the change re-applied; any other error ends the
//! loop at once.

use std::collections::HashMap;

use ipnet::IpNet;
use tracing::info;

use super::{ControllerError, NetworkController};
use crate::kube::update_node_host_subnet_annotation;
use crate::netutil::join_subnets;
use crate::retry::retry_if;

impl NetworkController {
    /// Write `host_subnets` (per network) plus any `extra` annotations onto
    /// the node, retrying on conflict
    pub async fn update_node_annotation_with_retry(
        &self,
        node_name: &str,
        host_subnets: &HashMap<String, Vec<IpNet>>,
        extra: &HashMap<String, String>,
    ) -> Result<(), ControllerError> {
        let config = self.config.conflict_retry.to_retry_config();
        let ctx = &self.ctx;

        retry_if(
            &config,
            "update_node_annotation",
            ControllerError::is_conflict,
            move || async move {
                let node = ctx.watch.get_node(node_name).await?;

                let mut updated = node.clone();
                for (network, subnets) in host_subnets {
                    update_node_host_subnet_annotation(
                        node_name,
                        &mut updated.metadata.annotations,
                        subnets,
                        network,
                    )?;
                }
                for (key, value) in extra {
                    updated
                        .metadata
                        .annotations
                        .insert(key.clone(), value.clone());
                }

                ctx.kube.patch_node(&node, &updated).await?;
                Ok::<(), ControllerError>(())
            },
        )
        .await
        .map_err(|e| ControllerError::NodeAnnotationUpdate {
            node: node_name.to_string(),
            source: Box::new(e),
        })?;

        for (network, subnets) in host_subnets {
            info!(
                "Set host subnets {} of network {} on node {}",
                join_subnets(subnets),
                network,
                node_name
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testutil::harness;
    use super::*;
    use crate::config::{ConflictRetryConfig, ControllerConfig, DEFAULT_NETWORK_NAME};
    use crate::kube::{parse_node_host_subnets, Node, NodeLister, NODE_SUBNETS_ANNOTATION};

    fn subnets(list: &[&str]) -> HashMap<String, Vec<IpNet>> {
        HashMap::from([(
            DEFAULT_NETWORK_NAME.to_string(),
            list.iter().map(|s| s.parse().unwrap()).collect(),
        )])
    }

    #[tokio::test]
    async fn test_annotation_written() {
        let h = harness(ControllerConfig::default());
        h.kube.upsert_node(Node::new("n1"));

        h.controller
            .update_node_annotation_with_retry(
                "n1",
                &subnets(&["10.244.1.0/24"]),
                &HashMap::from([("extra".to_string(), "yes".to_string())]),
            )
            .await
            .unwrap();

        let node = h.kube.get_node("n1").await.unwrap();
        assert_eq!(
            parse_node_host_subnets(&node, DEFAULT_NETWORK_NAME).unwrap(),
            vec!["10.244.1.0/24".parse::<IpNet>().unwrap()]
        );
        assert_eq!(node.metadata.annotations.get("extra").map(String::as_str), Some("yes"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflicts_are_retried() {
        let h = harness(ControllerConfig::default());
        h.kube.upsert_node(Node::new("n1"));
        h.kube.inject_conflicts(2);

        h.controller
            .update_node_annotation_with_retry("n1", &subnets(&["10.244.1.0/24"]), &HashMap::new())
            .await
            .unwrap();
        assert_eq!(h.kube.patch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflicts_exhaust_attempts() {
        let h = harness(ControllerConfig {
            conflict_retry: ConflictRetryConfig {
                max_attempts: 3,
                ..Default::default()
            },
            ..Default::default()
        });
        h.kube.upsert_node(Node::new("n1"));
        h.kube.inject_conflicts(10);

        let err = h
            .controller
            .update_node_annotation_with_retry("n1", &subnets(&["10.244.1.0/24"]), &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::NodeAnnotationUpdate { .. }));
        assert_eq!(h.kube.patch_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_annotation_is_not_retried() {
        let h = harness(ControllerConfig::default());
        h.kube
            .upsert_node(Node::new("n1").with_annotation(NODE_SUBNETS_ANNOTATION, "not json"));

        let err = h
            .controller
            .update_node_annotation_with_retry("n1", &subnets(&["10.244.1.0/24"]), &HashMap::new())
            .await
            .unwrap_err();
        match err {
            ControllerError::NodeAnnotationUpdate { source, .. } => {
                assert!(matches!(*source, ControllerError::Annotation(_)))
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[tokio::test]
    async fn test_missing_node_fails() {
        let h = harness(ControllerConfig::default());
        let err = h
            .controller
            .update_node_annotation_with_retry("ghost", &subnets(&["10.244.1.0/24"]), &HashMap::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }
}
