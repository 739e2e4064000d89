use chrono::Utc;
use serde::{Deserialize, Serialize};

/// A discrete interaction event awaiting batched transmission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedEvent {
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub ts_ms: i64,
}

impl QueuedEvent {
    pub fn now(
        event_type: impl Into<String>,
        x: Option<i64>,
        y: Option<i64>,
        data: Option<serde_json::Value>,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            x,
            y,
            data,
            ts_ms: Utc::now().timestamp_millis(),
        }
    }
}

/// FIFO buffer of events. A failed batch goes back to the head so
/// chronological order survives the retry.
#[derive(Debug, Default)]
pub struct EventQueue {
    events: Vec<QueuedEvent>,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, event: QueuedEvent) {
        self.events.push(event);
    }

    /// Swap the buffer for an empty one and return the captured batch.
    pub fn take_batch(&mut self) -> Vec<QueuedEvent> {
        std::mem::take(&mut self.events)
    }

    /// Prepend a failed batch onto the current buffer.
    pub fn requeue_front(&mut self, batch: Vec<QueuedEvent>) {
        self.events.splice(0..0, batch);
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}
