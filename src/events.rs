//! Publish/subscribe channel for finalized runs.
//!
//! The execution side publishes one [`FinalizedRun`] per run that reaches a
//! terminal state. Subscribers receive events on unbounded channels so that
//! publishing never blocks the thread that finalized the run. Delivery goes
//! to subscribers in descending [`Priority`], ties in subscription order.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Where a run executed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionSlot {
    /// One-off slot; the run record does not say which node hosted it
    Ephemeral,
    /// Statically assigned executor on the named node
    Node(String),
    /// The executor record was already released when the run finalized
    Released,
}

impl std::fmt::Display for ExecutionSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionSlot::Ephemeral => write!(f, "ephemeral"),
            ExecutionSlot::Node(name) => write!(f, "node:{}", name),
            ExecutionSlot::Released => write!(f, "released"),
        }
    }
}

/// A run that reached a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedRun {
    pub run_id: Uuid,
    pub queue_id: u64,
    pub slot: ExecutionSlot,
}

impl FinalizedRun {
    pub fn new(queue_id: u64, slot: ExecutionSlot) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            queue_id,
            slot,
        }
    }

    pub fn on_node(queue_id: u64, node_name: impl Into<String>) -> Self {
        Self::new(queue_id, ExecutionSlot::Node(node_name.into()))
    }

    pub fn ephemeral(queue_id: u64) -> Self {
        Self::new(queue_id, ExecutionSlot::Ephemeral)
    }
}

/// Observation priority of a subscriber. Higher values are notified first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Priority(pub i32);

impl Priority {
    pub const HIGHEST: Priority = Priority(i32::MAX);
    pub const NORMAL: Priority = Priority(0);
}

struct Subscriber {
    priority: Priority,
    tx: mpsc::UnboundedSender<FinalizedRun>,
}

/// Fan-out of finalized runs to prioritized subscribers.
#[derive(Default)]
pub struct RunEventBus {
    subscribers: Mutex<Vec<Subscriber>>,
}

impl RunEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber and return its receiving end.
    pub fn subscribe(&self, priority: Priority) -> mpsc::UnboundedReceiver<FinalizedRun> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subscribers = self.lock();
        // Stable position: after every subscriber with priority >= ours
        let pos = subscribers
            .iter()
            .position(|s| s.priority < priority)
            .unwrap_or(subscribers.len());
        subscribers.insert(pos, Subscriber { priority, tx });
        rx
    }

    /// Deliver an event to every live subscriber. Returns how many received it.
    pub fn publish(&self, run: FinalizedRun) -> usize {
        let mut subscribers = self.lock();
        subscribers.retain(|s| !s.tx.is_closed());

        let mut delivered = 0;
        for subscriber in subscribers.iter() {
            if subscriber.tx.send(run.clone()).is_ok() {
                delivered += 1;
            }
        }

        tracing::debug!(
            run_id = %run.run_id,
            queue_id = run.queue_id,
            slot = %run.slot,
            delivered,
            "Published finalized run"
        );
        delivered
    }

    /// Number of subscribers whose receiver is still open
    pub fn subscriber_count(&self) -> usize {
        self.lock().iter().filter(|s| !s.tx.is_closed()).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber>> {
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
