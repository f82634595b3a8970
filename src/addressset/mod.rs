//! Namespace address sets
//!
//! Network policies match pod IPs of a namespace through a named address
//! set. The controller only needs to create one per namespace, replace its
//! members, and destroy it.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressSetError {
    #[error("address set '{0}' has been destroyed")]
    Destroyed(String),

    #[error("address set '{name}' operation failed: {reason}")]
    Backend { name: String, reason: String },
}

#[async_trait]
pub trait AddressSet: Send + Sync {
    fn name(&self) -> &str;

    /// Replace the set's members
    async fn set_ips(&self, ips: &[IpAddr]) -> Result<(), AddressSetError>;

    /// Remove the set from the database
    async fn destroy(&self) -> Result<(), AddressSetError>;
}

#[async_trait]
pub trait AddressSetFactory: Send + Sync {
    /// Create (or adopt an existing) address set for a namespace
    async fn new_address_set(
        &self,
        namespace: &str,
        ips: &[IpAddr],
    ) -> Result<Arc<dyn AddressSet>, AddressSetError>;
}

/// Address set held in process memory
pub struct MemoryAddressSet {
    name: String,
    ips: RwLock<BTreeSet<IpAddr>>,
    destroyed: AtomicBool,
    destroy_calls: AtomicU32,
}

impl MemoryAddressSet {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ips: RwLock::new(BTreeSet::new()),
            destroyed: AtomicBool::new(false),
            destroy_calls: AtomicU32::new(0),
        }
    }

    pub async fn ips(&self) -> Vec<IpAddr> {
        self.ips.read().await.iter().copied().collect()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Number of times `destroy` was called
    pub fn destroy_calls(&self) -> u32 {
        self.destroy_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AddressSet for MemoryAddressSet {
    fn name(&self) -> &str {
        &self.name
    }

    async fn set_ips(&self, ips: &[IpAddr]) -> Result<(), AddressSetError> {
        if self.is_destroyed() {
            return Err(AddressSetError::Destroyed(self.name.clone()));
        }
        *self.ips.write().await = ips.iter().copied().collect();
        Ok(())
    }

    async fn destroy(&self) -> Result<(), AddressSetError> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        self.destroyed.store(true, Ordering::SeqCst);
        self.ips.write().await.clear();
        debug!("Destroyed address set {}", self.name);
        Ok(())
    }
}

/// Factory that hands out [`MemoryAddressSet`]s and remembers every set it
/// created, so callers can inspect them after the controller let go
#[derive(Default)]
pub struct MemoryAddressSetFactory {
    created: DashMap<String, Vec<Arc<MemoryAddressSet>>>,
}

impl MemoryAddressSetFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every set created for a namespace, oldest first
    pub fn created_for(&self, namespace: &str) -> Vec<Arc<MemoryAddressSet>> {
        self.created
            .get(namespace)
            .map(|v| v.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AddressSetFactory for MemoryAddressSetFactory {
    async fn new_address_set(
        &self,
        namespace: &str,
        ips: &[IpAddr],
    ) -> Result<Arc<dyn AddressSet>, AddressSetError> {
        let set = Arc::new(MemoryAddressSet::new(format!("a-ns-{}", namespace)));
        set.set_ips(ips).await?;
        self.created
            .entry(namespace.to_string())
            .or_default()
            .push(set.clone());
        Ok(set as Arc<dyn AddressSet>)
    }
}
