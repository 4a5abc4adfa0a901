//! Fire-and-forget lifecycle event bus.
//!
//! Every observer owns a bounded queue. `publish` never waits: a full queue
//! drops the event for that observer only, a closed queue unregisters it.
//! Events from one publisher reach each observer in publication order.

use chrono::{DateTime, Utc};
use machined_shared::RebootCmd;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Default per-observer queue depth.
pub const DEFAULT_OBSERVER_CAPACITY: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// The machine is ready for operator interaction.
    Activate,
    ConfigLoaded,
    ConfigLoadError { error: String },
    Installed,
    Upgraded,
    Rebooted,
    Failure,
    /// The sequence ended asking the caller to execute `cmd`.
    Restart { cmd: RebootCmd },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl Event {
    pub fn new(kind: EventKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn restart(cmd: RebootCmd) -> Self {
        Self::new(EventKind::Restart { cmd }, format!("requesting {}", cmd))
    }
}

/// Receiving side handed to an observer.
pub type EventStream = mpsc::Receiver<Event>;

#[derive(Clone, Default)]
pub struct EventBus {
    observers: Arc<Mutex<Vec<mpsc::Sender<Event>>>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("observers", &self.observers.lock().len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer with the default queue depth.
    pub fn subscribe(&self) -> EventStream {
        self.subscribe_with_capacity(DEFAULT_OBSERVER_CAPACITY)
    }

    pub fn subscribe_with_capacity(&self, capacity: usize) -> EventStream {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.observers.lock().push(tx);
        rx
    }

    pub fn publish(&self, event: Event) {
        tracing::debug!(kind = ?event.kind, message = %event.message, "Publishing event");

        let mut observers = self.observers.lock();
        observers.retain(|tx| match tx.try_send(event.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(dropped)) => {
                tracing::warn!(kind = ?dropped.kind, "Event observer is full, dropping event");
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
    }

    pub fn observer_count(&self) -> usize {
        self.observers.lock().len()
    }
}
