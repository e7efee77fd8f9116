use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::cluster::{Cluster, Computer, OfflineCause};
use crate::config::DrainConfig;
use crate::coordinator::ShutdownCoordinator;

/// What a fired idle probe found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// The node was idle and has been taken offline
    TookOffline,
    /// The drain was cancelled during the delay
    NotDraining,
    /// The node left the cluster during the delay
    NodeMissing,
    /// Something else took the node offline first
    AlreadyOffline,
    /// Runs are still executing on the node
    Busy,
    /// The scheduler shut down before the probe fired
    Cancelled,
}

impl std::fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProbeOutcome::TookOffline => write!(f, "took_offline"),
            ProbeOutcome::NotDraining => write!(f, "not_draining"),
            ProbeOutcome::NodeMissing => write!(f, "node_missing"),
            ProbeOutcome::AlreadyOffline => write!(f, "already_offline"),
            ProbeOutcome::Busy => write!(f, "busy"),
            ProbeOutcome::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Schedules delayed idle checks for draining nodes.
///
/// A probe is a spawned task that sleeps for the configured delay and then
/// re-validates everything: the drain may have been cancelled, the node may
/// have been removed, taken offline, or picked up new work in the meantime.
/// Probes for the same node may overlap; each one acts on its own and taking
/// an offline node offline again is a no-op.
///
/// With [`DrainConfig::dedupe_probes`] set, a node with a pending probe gets
/// no second one until the first fires.
pub struct IdleProbeScheduler {
    coordinator: Arc<ShutdownCoordinator>,
    cluster: Arc<Cluster>,
    delay: Duration,
    dedupe: bool,
    pending: Arc<Mutex<HashSet<String>>>,
    tracker: TaskTracker,
    shutdown: CancellationToken,
}

impl IdleProbeScheduler {
    pub fn new(
        config: &DrainConfig,
        coordinator: Arc<ShutdownCoordinator>,
        cluster: Arc<Cluster>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            coordinator,
            cluster,
            delay: config.probe_delay,
            dedupe: config.dedupe_probes,
            pending: Arc::new(Mutex::new(HashSet::new())),
            tracker: TaskTracker::new(),
            shutdown,
        }
    }

    /// Schedule one idle probe for `node_name` if it is draining right now.
    ///
    /// `computer` is the node's handle when the caller already resolved it;
    /// otherwise the probe looks the node up by name when it fires. Returns
    /// `None` when nothing was scheduled.
    pub async fn schedule_idle_check(
        &self,
        node_name: &str,
        computer: Option<Arc<Computer>>,
    ) -> Option<JoinHandle<ProbeOutcome>> {
        if !self.coordinator.is_draining(node_name).await {
            return None;
        }

        if self.dedupe && !lock(&self.pending).insert(node_name.to_string()) {
            tracing::debug!(node = node_name, "Idle probe already pending, skipping");
            return None;
        }

        let probe = Probe {
            node_name: node_name.to_string(),
            computer,
            coordinator: self.coordinator.clone(),
            cluster: self.cluster.clone(),
            pending: self.dedupe.then(|| self.pending.clone()),
        };
        let delay = self.delay;
        let shutdown = self.shutdown.clone();

        tracing::debug!(node = node_name, delay = ?delay, "Idle probe scheduled");

        Some(self.tracker.spawn(async move {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    probe.release();
                    ProbeOutcome::Cancelled
                }
                _ = tokio::time::sleep(delay) => probe.fire().await,
            }
        }))
    }

    /// Number of probes spawned and not yet finished
    pub fn pending_probes(&self) -> usize {
        self.tracker.len()
    }

    /// Wait until every probe spawned so far has finished.
    ///
    /// New probes may still be scheduled while waiting; they are included.
    pub async fn wait_for_probes(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Abandon all pending probes
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

struct Probe {
    node_name: String,
    computer: Option<Arc<Computer>>,
    coordinator: Arc<ShutdownCoordinator>,
    cluster: Arc<Cluster>,
    pending: Option<Arc<Mutex<HashSet<String>>>>,
}

impl Probe {
    /// Clear this node's pending marker so the next completion can schedule
    /// a fresh probe.
    fn release(&self) {
        if let Some(pending) = &self.pending {
            lock(pending).remove(&self.node_name);
        }
    }

    async fn fire(self) -> ProbeOutcome {
        self.release();
        let node = self.node_name.as_str();

        if !self.coordinator.is_draining(node).await {
            tracing::debug!(node, "Drain cancelled before idle probe fired");
            return ProbeOutcome::NotDraining;
        }

        let computer = match self.computer {
            Some(computer) => computer,
            None => match self.cluster.computer(node).await {
                Some(computer) => computer,
                None => {
                    tracing::debug!(node, "Node gone before idle probe fired");
                    return ProbeOutcome::NodeMissing;
                }
            },
        };
        if computer.is_removed().await {
            tracing::debug!(node, "Node gone before idle probe fired");
            return ProbeOutcome::NodeMissing;
        }

        if computer.is_temporarily_offline().await {
            return ProbeOutcome::AlreadyOffline;
        }

        if computer.is_busy().await {
            let running = computer.running_count().await;
            tracing::debug!(node, running, "Node still busy, leaving it draining");
            return ProbeOutcome::Busy;
        }

        // Attribute to whoever owns the drain now, not at schedule time
        let user = self.coordinator.drained_by(node).await;
        let cause = OfflineCause::lenient_shutdown(user.clone());
        if !computer.set_temporarily_offline(cause).await {
            return ProbeOutcome::AlreadyOffline;
        }

        tracing::info!(
            node,
            user = ?user,
            "Node idle; setting offline since lenient shutdown was active for this node"
        );
        ProbeOutcome::TookOffline
    }
}

fn lock(pending: &Mutex<HashSet<String>>) -> std::sync::MutexGuard<'_, HashSet<String>> {
    pending
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
