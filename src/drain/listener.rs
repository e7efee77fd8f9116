use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::cluster::Cluster;
use crate::coordinator::ShutdownCoordinator;
use crate::drain::probe::{IdleProbeScheduler, ProbeOutcome};
use crate::events::{ExecutionSlot, FinalizedRun, Priority, RunEventBus};

/// Reacts to finalized runs by scheduling idle probes for draining nodes.
pub struct CompletionListener {
    coordinator: Arc<ShutdownCoordinator>,
    cluster: Arc<Cluster>,
    scheduler: Arc<IdleProbeScheduler>,
    progress: Option<Arc<watch::Sender<u64>>>,
}

impl CompletionListener {
    pub fn new(
        coordinator: Arc<ShutdownCoordinator>,
        cluster: Arc<Cluster>,
        scheduler: Arc<IdleProbeScheduler>,
    ) -> Self {
        Self {
            coordinator,
            cluster,
            scheduler,
            progress: None,
        }
    }

    /// Count handled events on `progress`, so callers can tell when the
    /// listener has caught up with the bus.
    pub fn with_progress(mut self, progress: Arc<watch::Sender<u64>>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Handle one finalized run.
    ///
    /// - **Ephemeral slot**: the hosting node is unknown, so every draining
    ///   node gets a probe.
    /// - **Node slot**: only that node, and only if it is draining.
    /// - **Released slot**: no node to check.
    ///
    /// While a full shutdown is in progress the run's queue id is dropped
    /// from the active set whatever slot it used. Returns the probes that
    /// were scheduled; none of them are awaited here.
    pub async fn on_run_finalized(&self, run: &FinalizedRun) -> Vec<JoinHandle<ProbeOutcome>> {
        let mut probes = Vec::new();

        match &run.slot {
            ExecutionSlot::Ephemeral => {
                for node_name in self.coordinator.draining_nodes().await {
                    if let Some(probe) = self.scheduler.schedule_idle_check(&node_name, None).await
                    {
                        probes.push(probe);
                    }
                }
            }
            ExecutionSlot::Node(node_name) => {
                if self.coordinator.is_draining(node_name).await {
                    // A missing node is left for the probe to notice
                    let computer = self.cluster.computer(node_name).await;
                    if let Some(probe) = self
                        .scheduler
                        .schedule_idle_check(node_name, computer)
                        .await
                    {
                        probes.push(probe);
                    }
                }
            }
            ExecutionSlot::Released => {}
        }

        if self.coordinator.is_going_to_shutdown().await {
            self.coordinator.remove_active_queue_id(run.queue_id).await;
        }

        tracing::debug!(
            run_id = %run.run_id,
            queue_id = run.queue_id,
            slot = %run.slot,
            probes = probes.len(),
            "Handled finalized run"
        );
        probes
    }

    /// Consume finalized runs until the channel closes or `shutdown` fires.
    pub async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<FinalizedRun>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("Completion listener shutting down");
                    break;
                }
                event = events.recv() => {
                    match event {
                        Some(run) => {
                            self.on_run_finalized(&run).await;
                            if let Some(progress) = &self.progress {
                                progress.send_modify(|handled| *handled += 1);
                            }
                        }
                        None => {
                            // All publishers gone
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Subscribe to `bus` at `priority` and spawn the listener loop.
    pub fn spawn(
        self,
        bus: &RunEventBus,
        priority: Priority,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        let events = bus.subscribe(priority);
        tokio::spawn(async move {
            self.run(events, shutdown).await;
        })
    }
}
