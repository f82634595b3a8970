//! Topology version marker on the cluster router
//!
//! The router's `k8s-ovn-topo-version` external id tells a starting
//! controller which layout an earlier release left in the database.

use std::collections::BTreeMap;

use tracing::info;

use super::{ControllerError, NetworkController};
use crate::nbdb::{OVN_CLUSTER_ROUTER, TOPOLOGY_VERSION_EXTERNAL_ID};

/// Topology layout written by this release
pub const CURRENT_TOPOLOGY_VERSION: i32 = 4;

/// Reported when there is no cluster router at all: a fresh database needs
/// no upgrade handling, so it compares newer than any real version
pub const NO_TOPOLOGY_VERSION: i32 = i32::MAX;

impl NetworkController {
    /// Write `version` to the cluster router
    pub async fn record_version(&self, version: i32) -> Result<(), ControllerError> {
        let external_ids = BTreeMap::from([(
            TOPOLOGY_VERSION_EXTERNAL_ID.to_string(),
            version.to_string(),
        )]);

        self.ctx
            .nb
            .set_logical_router_external_ids(OVN_CLUSTER_ROUTER, &external_ids)
            .await
            .map_err(|e| {
                ControllerError::database(
                    format!("failed to set topology version on {}", OVN_CLUSTER_ROUTER),
                    e,
                )
            })?;

        info!("Recorded topology version {} on {}", version, OVN_CLUSTER_ROUTER);
        Ok(())
    }

    /// Mark the database as carrying this release's topology
    pub async fn update_l3_topology_version(&self) -> Result<(), ControllerError> {
        self.record_version(CURRENT_TOPOLOGY_VERSION).await
    }

    /// Read the topology version from the cluster router.
    ///
    /// Returns [`NO_TOPOLOGY_VERSION`] if the router does not exist and 0 if
    /// it predates version tracking.
    pub async fn detect_version(&self) -> Result<i32, ControllerError> {
        let router = match self.ctx.nb.get_logical_router(OVN_CLUSTER_ROUTER).await {
            Ok(router) => router,
            Err(e) if e.is_not_found() => return Ok(NO_TOPOLOGY_VERSION),
            Err(e) => {
                return Err(ControllerError::database(
                    format!("error getting router {}", OVN_CLUSTER_ROUTER),
                    e,
                ))
            }
        };

        let Some(raw) = router.external_ids.get(TOPOLOGY_VERSION_EXTERNAL_ID) else {
            info!("No version string found. The OVN topology is before versioning is introduced. Upgrade needed");
            return Ok(0);
        };

        raw.parse::<i32>()
            .map_err(|e| ControllerError::InvalidTopologyVersion {
                value: raw.clone(),
                reason: e.to_string(),
            })
    }
}
