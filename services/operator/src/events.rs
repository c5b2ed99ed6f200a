//! Event recording.
//!
//! Reconcilers report user-visible outcomes (creations, updates, deletions,
//! scaling steps, failures) as events attached to the resource involved.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use gridop_api::ResourceKey;
use serde::Serialize;
use tracing::{info, warn};

/// Event reasons.
pub mod reasons {
    pub const SUCCESSFUL_CREATE: &str = "SuccessfulCreate";
    pub const FAILED_CREATE: &str = "FailedCreate";
    pub const SUCCESSFUL_UPDATE: &str = "SuccessfulUpdate";
    pub const FAILED_UPDATE: &str = "FailedUpdate";
    pub const SCALING: &str = "Scaling";
    pub const SUCCESSFUL_DELETE: &str = "SuccessfulDelete";
    pub const FAILED_DELETE: &str = "FailedDelete";
    pub const FAILED: &str = "Failed";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventType {
    Normal,
    Warning,
}

/// A recorded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub involved: ResourceKey,
    pub event_type: EventType,
    pub reason: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn normal(involved: ResourceKey, reason: &str, message: impl Into<String>) -> Self {
        Self {
            involved,
            event_type: EventType::Normal,
            reason: reason.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn warning(involved: ResourceKey, reason: &str, message: impl Into<String>) -> Self {
        Self {
            involved,
            event_type: EventType::Warning,
            reason: reason.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Sink for events.
pub trait EventRecorder: Send + Sync {
    fn record(&self, event: Event);
}

/// Writes events to the log.
#[derive(Debug, Default)]
pub struct LogRecorder;

impl EventRecorder for LogRecorder {
    fn record(&self, event: Event) {
        match event.event_type {
            EventType::Normal => info!(
                involved = %event.involved,
                reason = %event.reason,
                message = %event.message,
                "event"
            ),
            EventType::Warning => warn!(
                involved = %event.involved,
                reason = %event.reason,
                message = %event.message,
                "event"
            ),
        }
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    events: Mutex<Vec<Event>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Events with the given reason, in recording order.
    pub fn with_reason(&self, reason: &str) -> Vec<Event> {
        self.events()
            .into_iter()
            .filter(|e| e.reason == reason)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl EventRecorder for MemoryRecorder {
    fn record(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridop_api::ResourceKind;

    #[test]
    fn memory_recorder_filters_by_reason() {
        let recorder = MemoryRecorder::new();
        let key = ResourceKey::new(ResourceKind::Cluster, "ns", "c");

        recorder.record(Event::normal(key.clone(), reasons::SUCCESSFUL_CREATE, "a"));
        recorder.record(Event::warning(key, reasons::FAILED_CREATE, "b"));

        assert_eq!(recorder.len(), 2);
        let failed = recorder.with_reason(reasons::FAILED_CREATE);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].event_type, EventType::Warning);
        assert_eq!(failed[0].message, "b");
    }
}
