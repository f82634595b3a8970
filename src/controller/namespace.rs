//! Per-namespace state with lazy creation and deferred cleanup
//!
//! Two levels of locking:
//! - The registry map (a `DashMap`) guards which entries exist. Its shard
//!   locks are only held for a single map operation.
//! - Each [`NamespaceInfo`] sits behind its own `RwLock`.
//!
//! A lookup clones the entry's `Arc` out of the map, drops the map guard,
//! waits for the entry lock, then checks that the map still points at the
//! same entry. A deleter may have removed it in the meantime; in that case
//! the lookup reports the namespace as absent rather than handing out a
//! detached entry.
//!
//! When a namespace with an address set is deleted the set is emptied right
//! away and destroyed after a grace period, unless a namespace of the same
//! name has an address set again by then.

use std::future::Future;
use std::net::IpAddr;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::{ControllerError, NetworkController};
use crate::addressset::AddressSet;

/// State the controller keeps for one namespace
#[derive(Default)]
pub struct NamespaceInfo {
    /// Address set holding the IPs of the namespace's pods
    pub address_set: Option<Arc<dyn AddressSet>>,
    pub multicast_enabled: bool,
}

impl std::fmt::Debug for NamespaceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamespaceInfo")
            .field("address_set", &self.address_set.as_ref().map(|a| a.name()))
            .field("multicast_enabled", &self.multicast_enabled)
            .finish()
    }
}

type SharedInfo = Arc<RwLock<NamespaceInfo>>;

/// Entry lock held in the mode the caller asked for
pub enum NamespaceGuard {
    Read(OwnedRwLockReadGuard<NamespaceInfo>),
    Write(OwnedRwLockWriteGuard<NamespaceInfo>),
}

impl NamespaceGuard {
    /// Mutable access; `None` for a read guard
    pub fn get_mut(&mut self) -> Option<&mut NamespaceInfo> {
        match self {
            NamespaceGuard::Read(_) => None,
            NamespaceGuard::Write(guard) => Some(guard.deref_mut()),
        }
    }
}

impl Deref for NamespaceGuard {
    type Target = NamespaceInfo;

    fn deref(&self) -> &NamespaceInfo {
        match self {
            NamespaceGuard::Read(guard) => &**guard,
            NamespaceGuard::Write(guard) => &**guard,
        }
    }
}

#[derive(Clone)]
pub struct NamespaceRegistry {
    entries: Arc<DashMap<String, SharedInfo>>,
    grace: Duration,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl NamespaceRegistry {
    /// `grace` is how long a deleted namespace's address set survives
    pub fn new(grace: Duration, shutdown: CancellationToken) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            grace,
            shutdown,
            tasks: TaskTracker::new(),
        }
    }

    fn snapshot(&self, name: &str) -> Option<SharedInfo> {
        self.entries.get(name).map(|e| e.value().clone())
    }

    fn is_current(&self, name: &str, entry: &SharedInfo) -> bool {
        self.entries
            .get(name)
            .map(|current| Arc::ptr_eq(current.value(), entry))
            .unwrap_or(false)
    }

    /// Lock the current entry for `name`, or `None` if there is none or it
    /// was removed while we waited for its lock
    async fn lock_current<G, F, Fut>(&self, name: &str, lock: F) -> Option<G>
    where
        F: FnOnce(SharedInfo) -> Fut,
        Fut: Future<Output = G>,
    {
        let entry = self.snapshot(name)?;
        let guard = lock(entry.clone()).await;

        if !self.is_current(name, &entry) {
            debug!("Namespace {} was deleted while waiting for its lock", name);
            return None;
        }
        Some(guard)
    }

    /// Find a namespace and lock it for reading or writing
    pub async fn lookup_locked(&self, name: &str, read_only: bool) -> Option<NamespaceGuard> {
        if read_only {
            self.get_read(name).await.map(NamespaceGuard::Read)
        } else {
            self.get_write(name).await.map(NamespaceGuard::Write)
        }
    }

    pub async fn get_read(&self, name: &str) -> Option<OwnedRwLockReadGuard<NamespaceInfo>> {
        self.lock_current(name, |entry| entry.read_owned()).await
    }

    pub async fn get_write(&self, name: &str) -> Option<OwnedRwLockWriteGuard<NamespaceInfo>> {
        self.lock_current(name, |entry| entry.write_owned()).await
    }

    /// Lock `name` for writing, creating an empty entry if none exists.
    /// The flag is `true` when the entry was created by this call.
    pub async fn get_or_create_locked(
        &self,
        name: &str,
    ) -> (OwnedRwLockWriteGuard<NamespaceInfo>, bool) {
        loop {
            if let Some(guard) = self.get_write(name).await {
                return (guard, false);
            }

            let fresh: SharedInfo = Arc::new(RwLock::new(NamespaceInfo::default()));
            // nobody else can see `fresh` yet
            let guard = match fresh.clone().try_write_owned() {
                Ok(guard) => guard,
                Err(_) => continue,
            };

            match self.entries.entry(name.to_string()) {
                Entry::Vacant(vacant) => {
                    vacant.insert(fresh);
                    debug!("Created namespace entry {}", name);
                    return (guard, true);
                }
                // lost the race to another creator; lock theirs instead
                Entry::Occupied(_) => continue,
            }
        }
    }

    /// Remove `name` and return its write-locked entry.
    ///
    /// An owned address set is emptied immediately and destroyed once the
    /// grace period has passed. Returns `None` if there was nothing to
    /// delete by the time the entry lock was acquired.
    pub async fn delete_locked(&self, name: &str) -> Option<OwnedRwLockWriteGuard<NamespaceInfo>> {
        let entry = self.snapshot(name)?;
        let guard = entry.clone().write_owned().await;

        let removed = self
            .entries
            .remove_if(name, |_, current| Arc::ptr_eq(current, &entry));
        if removed.is_none() {
            debug!("Namespace {} was already deleted", name);
            return None;
        }

        if let Some(address_set) = guard.address_set.clone() {
            if let Err(e) = address_set.set_ips(&[]).await {
                warn!(
                    "Failed to clear address set {} of namespace {}: {}",
                    address_set.name(),
                    name,
                    e
                );
            }
            self.schedule_address_set_destroy(name, address_set);
        }

        Some(guard)
    }

    fn schedule_address_set_destroy(&self, name: &str, address_set: Arc<dyn AddressSet>) {
        let registry = self.clone();
        let name = name.to_string();
        let shutdown = self.shutdown.clone();
        let grace = self.grace;

        self.tasks.spawn(async move {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    debug!(
                        "Shutdown before address set {} of namespace {} was destroyed",
                        address_set.name(),
                        name
                    );
                }
                _ = tokio::time::sleep(grace) => {
                    registry.finish_address_set_destroy(&name, address_set).await;
                }
            }
        });
    }

    async fn finish_address_set_destroy(&self, name: &str, address_set: Arc<dyn AddressSet>) {
        if let Some(info) = self.get_read(name).await {
            if info.address_set.is_some() {
                info!(
                    "Namespace {} was re-created with an address set, keeping {}",
                    name,
                    address_set.name()
                );
                return;
            }
        }

        match address_set.destroy().await {
            Ok(()) => debug!("Destroyed address set {} of namespace {}", address_set.name(), name),
            Err(e) => error!(
                "Failed to destroy address set {} of namespace {}: {}",
                address_set.name(),
                name,
                e
            ),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deferred destroys that have not finished yet
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Wait until every deferred destroy spawned so far has finished
    pub async fn wait_for_deferred_tasks(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }
}

impl NetworkController {
    /// Make sure the namespace exists and owns an address set
    pub async fn add_namespace(&self, name: &str, ips: &[IpAddr]) -> Result<(), ControllerError> {
        let (mut entry, created) = self.namespaces.get_or_create_locked(name).await;
        if created {
            info!("Adding namespace {}", name);
        }

        if let Some(address_set) = entry.address_set.clone() {
            address_set.set_ips(ips).await?;
        } else {
            entry.address_set = Some(self.address_sets.new_address_set(name, ips).await?);
        }
        Ok(())
    }

    /// Replace the pod IPs of an existing namespace
    pub async fn update_namespace_ips(
        &self,
        name: &str,
        ips: &[IpAddr],
    ) -> Result<bool, ControllerError> {
        let Some(entry) = self.namespaces.get_read(name).await else {
            return Ok(false);
        };
        match &entry.address_set {
            Some(address_set) => {
                address_set.set_ips(ips).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Forget a namespace; returns whether it existed
    pub async fn delete_namespace(&self, name: &str) -> bool {
        match self.namespaces.delete_locked(name).await {
            Some(_info) => {
                info!("Deleted namespace {}", name);
                true
            }
            None => false,
        }
    }
}
