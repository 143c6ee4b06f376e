//! Application state and event fan-out.
//!
//! Events are broadcast over a `tokio::sync::broadcast` channel so any
//! number of observers (UI layers, tests) can follow the worker without
//! coupling to it. Lagging observers lose old events, never block the
//! worker.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Coarse daemon state, driven only by the worker thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AppState {
    Idle,
    Transcribing {
        job_id: String,
        completed: usize,
        total: usize,
    },
}

impl Default for AppState {
    fn default() -> Self {
        AppState::Idle
    }
}

/// Events emitted at job boundaries and file-progress boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AppEvent {
    JobStarted {
        job_id: String,
        files: Vec<String>,
    },
    Progress {
        job_id: String,
        completed: usize,
        total: usize,
    },
    JobFinished {
        job_id: String,
        success: bool,
        partial: bool,
        error: Option<String>,
    },
    StateChanged {
        state: AppState,
    },
}

const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Cloneable broadcaster handle. Sending never fails; with no subscribers
/// the event is simply dropped.
#[derive(Clone)]
pub struct EventBroadcaster {
    sender: broadcast::Sender<AppEvent>,
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn send(&self, event: AppEvent) {
        // Err only means nobody is listening right now.
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
