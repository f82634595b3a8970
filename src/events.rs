//! Cluster events posted by the controller
//!
//! Reconciliation failures that an operator should see on the object
//! itself (`kubectl describe node`) are recorded as warning events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// `Kind/name` of the object the event is about
    pub involved_object: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

pub trait EventRecorder: Send + Sync {
    fn record(&self, involved_object: &str, event_type: EventType, reason: &str, message: &str);
}

/// Recorder that only writes events to the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventRecorder;

impl EventRecorder for LogEventRecorder {
    fn record(&self, involved_object: &str, event_type: EventType, reason: &str, message: &str) {
        match event_type {
            EventType::Normal => info!("{} {}: {}", involved_object, reason, message),
            EventType::Warning => warn!("{} {}: {}", involved_object, reason, message),
        }
    }
}

/// Recorder that keeps events in memory
#[derive(Debug, Default)]
pub struct MemoryEventRecorder {
    events: RwLock<Vec<Event>>,
}

impl MemoryEventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.read().await.clone()
    }
}

impl EventRecorder for MemoryEventRecorder {
    fn record(&self, involved_object: &str, event_type: EventType, reason: &str, message: &str) {
        let event = Event {
            involved_object: involved_object.to_string(),
            event_type,
            reason: reason.to_string(),
            message: message.to_string(),
            timestamp: Utc::now(),
        };
        // recording must never block a reconciliation
        match self.events.try_write() {
            Ok(mut events) => events.push(event),
            Err(_) => warn!("Dropped event {} for {}", reason, involved_object),
        }
    }
}
