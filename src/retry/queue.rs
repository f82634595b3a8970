//! Retry queue for objects that need (re)processing
//!
//! The controller only talks to the [`RetryCoordinator`] trait: it enqueues
//! objects and asks for the queue to be flushed. [`RetryQueue`] is the
//! in-process implementation; whoever consumes it drains ready entries with
//! [`RetryQueue::drain_ready`] after a flush notification.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

use super::RetryError;

/// Objects that can be tracked by a retry queue
pub trait Retryable: Clone + Send + Sync + 'static {
    /// Stable key identifying the object across updates
    fn retry_key(&self) -> String;
}

/// Handle returned when a watch is registered for a resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchHandle {
    pub id: u64,
    pub resource: String,
}

/// The parts of a retry framework the controller relies on
#[async_trait]
pub trait RetryCoordinator<T: Retryable>: Send + Sync {
    /// Queue `obj` for an add, eligible immediately (no backoff)
    async fn enqueue_no_backoff(&self, obj: T) -> Result<(), RetryError>;

    /// Ask for all ready entries to be processed now
    async fn flush(&self);

    /// Start watching the underlying resource
    async fn watch_resource(&self) -> Result<WatchHandle, RetryError>;
}

#[derive(Debug, Clone)]
struct RetryEntry<T> {
    obj: T,
    ready_at: Instant,
    attempts: u32,
}

/// In-memory retry queue keyed by [`Retryable::retry_key`]
pub struct RetryQueue<T: Retryable> {
    resource: String,
    entries: DashMap<String, RetryEntry<T>>,
    backoff: Duration,
    flushes: AtomicU64,
    next_handle: AtomicU64,
    closed: AtomicBool,
    notify: Notify,
}

impl<T: Retryable> RetryQueue<T> {
    /// Create a queue for the named resource type (e.g. "pods")
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            entries: DashMap::new(),
            backoff: Duration::from_secs(1),
            flushes: AtomicU64::new(0),
            next_handle: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Set the backoff applied by [`RetryQueue::enqueue_with_backoff`]
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Queue an object behind the configured backoff
    pub fn enqueue_with_backoff(&self, obj: T) -> Result<(), RetryError> {
        self.insert(obj, Instant::now() + self.backoff)
    }

    fn insert(&self, obj: T, ready_at: Instant) -> Result<(), RetryError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RetryError::Closed(self.resource.clone()));
        }
        let key = obj.retry_key();
        let mut entry = self.entries.entry(key).or_insert_with(|| RetryEntry {
            obj: obj.clone(),
            ready_at,
            attempts: 0,
        });
        entry.obj = obj;
        entry.ready_at = ready_at;
        entry.attempts += 1;
        Ok(())
    }

    /// Remove and return every entry whose backoff has elapsed
    pub fn drain_ready(&self) -> Vec<T> {
        let now = Instant::now();
        let ready: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.ready_at <= now)
            .map(|e| e.key().clone())
            .collect();

        ready
            .into_iter()
            .filter_map(|key| self.entries.remove(&key).map(|(_, e)| e.obj))
            .collect()
    }

    /// Wait until the next flush request
    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    /// Stop accepting new entries
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of times `key` has been queued since it was last drained
    pub fn attempts(&self, key: &str) -> u32 {
        self.entries.get(key).map(|e| e.attempts).unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of flush requests received
    pub fn flush_count(&self) -> u64 {
        self.flushes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Retryable> RetryCoordinator<T> for RetryQueue<T> {
    async fn enqueue_no_backoff(&self, obj: T) -> Result<(), RetryError> {
        self.insert(obj, Instant::now())
    }

    async fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        debug!("Flushing {} retry queue ({} entries)", self.resource, self.len());
        self.notify.notify_waiters();
    }

    async fn watch_resource(&self) -> Result<WatchHandle, RetryError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(RetryError::Closed(self.resource.clone()));
        }
        let id = self.next_handle.fetch_add(1, Ordering::SeqCst);
        Ok(WatchHandle {
            id,
            resource: self.resource.clone(),
        })
    }
}
