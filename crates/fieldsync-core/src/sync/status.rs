//! Sync status snapshots and subscriber delivery.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Engine state machine position.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncState {
    #[default]
    Idle,
    Syncing,
    Error,
    Offline,
}

impl SyncState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Error => "error",
            Self::Offline => "offline",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Items handled so far in the running cycle
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncProgress {
    pub completed: usize,
    pub total: usize,
}

/// Everything a subscriber learns on each transition
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub status: SyncState,
    /// Unix ms of the last completed cycle
    pub last_sync_at: Option<i64>,
    /// Queued mutations
    pub pending_count: usize,
    /// Unresolved conflict records
    pub conflict_count: usize,
    /// Queued mutations that stopped retrying automatically
    pub error_count: usize,
    pub progress: SyncProgress,
    pub last_error: Option<String>,
    /// Running on the in-memory fallback store
    pub storage_degraded: bool,
}

type Callback = Arc<dyn Fn(&EngineStatus) + Send + Sync>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    callbacks: Vec<(u64, Callback)>,
}

/// Fan-out of status snapshots to callbacks and `watch` receivers
pub struct StatusPublisher {
    subscribers: Arc<Mutex<Subscribers>>,
    sender: watch::Sender<EngineStatus>,
}

impl StatusPublisher {
    pub fn new(initial: EngineStatus) -> Self {
        let (sender, _receiver) = watch::channel(initial);
        Self {
            subscribers: Arc::new(Mutex::new(Subscribers::default())),
            sender,
        }
    }

    /// Register a callback invoked synchronously on every publish
    pub fn subscribe(&self, callback: impl Fn(&EngineStatus) + Send + Sync + 'static) -> Subscription {
        let mut subscribers = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        subscribers.next_id += 1;
        let id = subscribers.next_id;
        subscribers.callbacks.push((id, Arc::new(callback)));

        Subscription {
            id,
            subscribers: Arc::downgrade(&self.subscribers),
        }
    }

    /// Latest-wins receiver
    pub fn watch(&self) -> watch::Receiver<EngineStatus> {
        self.sender.subscribe()
    }

    pub fn current(&self) -> EngineStatus {
        self.sender.borrow().clone()
    }

    pub fn publish(&self, status: &EngineStatus) {
        self.sender.send_replace(status.clone());

        // Callbacks run outside the lock so they may unsubscribe themselves
        let callbacks: Vec<Callback> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .callbacks
            .iter()
            .map(|(_, callback)| Arc::clone(callback))
            .collect();
        for callback in callbacks {
            callback(status);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .callbacks
            .len()
    }
}

/// Handle returned by `subscribe`
#[must_use = "keep the handle to unsubscribe later"]
pub struct Subscription {
    id: u64,
    subscribers: Weak<Mutex<Subscribers>>,
}

impl Subscription {
    /// Stop receiving status snapshots
    pub fn unsubscribe(self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .callbacks
                .retain(|(id, _)| *id != self.id);
        }
    }
}
