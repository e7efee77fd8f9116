//! Shared shutdown state: which nodes are draining and who asked, and
//! whether a full-system shutdown is waiting on queued work.
//!
//! One [`ShutdownCoordinator`] is created at startup and handed to every
//! component that reads or changes drain state. Nothing here talks to the
//! nodes themselves; taking a node offline is the idle probe's job.

use std::collections::{HashMap, HashSet};

use tokio::sync::{watch, RwLock};

#[derive(Debug, Default)]
struct FullShutdown {
    in_progress: bool,
    active_queue_ids: HashSet<u64>,
}

#[derive(Debug)]
pub struct ShutdownCoordinator {
    /// Draining node name -> user who requested the drain
    draining: RwLock<HashMap<String, Option<String>>>,
    full_shutdown: RwLock<FullShutdown>,
    active_tx: watch::Sender<usize>,
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        let (active_tx, _) = watch::channel(0);
        Self {
            draining: RwLock::new(HashMap::new()),
            full_shutdown: RwLock::new(FullShutdown::default()),
            active_tx,
        }
    }

    // ----- node drain -----

    /// Mark a node as draining on behalf of `user`.
    ///
    /// Marking an already draining node reassigns the drain to the new user;
    /// the probe attributes the offline cause to whoever owns the drain when
    /// it fires. Returns true if the node was not draining before.
    pub async fn mark_draining(&self, node: &str, user: Option<String>) -> bool {
        let previous = self
            .draining
            .write()
            .await
            .insert(node.to_string(), user.clone());
        tracing::info!(node, user = ?user, reassigned = previous.is_some(), "Node marked draining");
        previous.is_none()
    }

    /// Cancel a node's drain. Returns false if it was not draining.
    pub async fn clear_draining(&self, node: &str) -> bool {
        let removed = self.draining.write().await.remove(node).is_some();
        if removed {
            tracing::info!(node, "Node drain cancelled");
        }
        removed
    }

    pub async fn is_draining(&self, node: &str) -> bool {
        self.draining.read().await.contains_key(node)
    }

    /// Names of all draining nodes, sorted
    pub async fn draining_nodes(&self) -> Vec<String> {
        let mut nodes: Vec<String> = self.draining.read().await.keys().cloned().collect();
        nodes.sort();
        nodes
    }

    /// User who owns the drain of `node`, if draining and attributed
    pub async fn drained_by(&self, node: &str) -> Option<String> {
        self.draining.read().await.get(node).cloned().flatten()
    }

    // ----- full shutdown -----

    /// Enter full-shutdown mode, tracking the given queue ids as still active.
    pub async fn begin_full_shutdown(&self, queue_ids: impl IntoIterator<Item = u64>) {
        let mut state = self.full_shutdown.write().await;
        state.in_progress = true;
        state.active_queue_ids = queue_ids.into_iter().collect();
        let remaining = state.active_queue_ids.len();
        self.active_tx.send_replace(remaining);
        tracing::info!(active_queue_ids = remaining, "Full shutdown started");
    }

    /// Leave full-shutdown mode and forget the tracked queue ids.
    pub async fn cancel_full_shutdown(&self) {
        let mut state = self.full_shutdown.write().await;
        state.in_progress = false;
        state.active_queue_ids.clear();
        self.active_tx.send_replace(0);
        tracing::info!("Full shutdown cancelled");
    }

    pub async fn is_going_to_shutdown(&self) -> bool {
        self.full_shutdown.read().await.in_progress
    }

    /// Stop tracking a queue id. Returns false if it was not tracked.
    pub async fn remove_active_queue_id(&self, queue_id: u64) -> bool {
        let mut state = self.full_shutdown.write().await;
        let removed = state.active_queue_ids.remove(&queue_id);
        if removed {
            let remaining = state.active_queue_ids.len();
            self.active_tx.send_replace(remaining);
            tracing::debug!(queue_id, remaining, "Active queue id finished");
        }
        removed
    }

    /// Tracked queue ids, sorted
    pub async fn active_queue_ids(&self) -> Vec<u64> {
        let mut ids: Vec<u64> = self
            .full_shutdown
            .read()
            .await
            .active_queue_ids
            .iter()
            .copied()
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Watch the number of queue ids a full shutdown is still waiting on.
    pub fn subscribe_active_count(&self) -> watch::Receiver<usize> {
        self.active_tx.subscribe()
    }
}
