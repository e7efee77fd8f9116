use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cluster::Cluster;
use crate::config::DrainConfig;
use crate::coordinator::ShutdownCoordinator;
use crate::drain::{CompletionListener, IdleProbeScheduler};
use crate::error::{DrainError, Result};
use crate::events::{ExecutionSlot, FinalizedRun, RunEventBus};

/// A run that has started and not yet been finalized.
#[derive(Debug, Clone)]
pub struct ActiveRun {
    pub run_id: Uuid,
    pub queue_id: u64,
    /// Node actually executing the run, if any
    pub host: Option<String>,
    /// Slot the run will report when it finalizes
    pub slot: ExecutionSlot,
}

/// Wires the shutdown coordinator, the cluster, the run event bus, the probe
/// scheduler and the completion listener together.
pub struct DrainService {
    pub config: DrainConfig,
    pub coordinator: Arc<ShutdownCoordinator>,
    pub cluster: Arc<Cluster>,
    pub bus: Arc<RunEventBus>,
    pub scheduler: Arc<IdleProbeScheduler>,
    shutdown: CancellationToken,
    /// Set once the listener holds its bus subscription
    started: Mutex<bool>,
    /// Runs published while the listener was subscribed
    published: AtomicU64,
    handled_tx: Arc<watch::Sender<u64>>,
}

impl DrainService {
    pub fn new(config: DrainConfig, shutdown: CancellationToken) -> Self {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let cluster = Arc::new(Cluster::new());
        let scheduler = Arc::new(IdleProbeScheduler::new(
            &config,
            coordinator.clone(),
            cluster.clone(),
            shutdown.child_token(),
        ));
        let (handled_tx, _) = watch::channel(0);

        Self {
            config,
            coordinator,
            cluster,
            bus: Arc::new(RunEventBus::new()),
            scheduler,
            shutdown,
            started: Mutex::new(false),
            published: AtomicU64::new(0),
            handled_tx: Arc::new(handled_tx),
        }
    }

    /// Subscribe the completion listener to the bus and spawn it. A service
    /// runs at most one listener.
    pub fn start(&self) -> Result<JoinHandle<()>> {
        let mut started = self.started();
        if *started {
            return Err(DrainError::AlreadyStarted);
        }

        let listener = CompletionListener::new(
            self.coordinator.clone(),
            self.cluster.clone(),
            self.scheduler.clone(),
        )
        .with_progress(self.handled_tx.clone());

        tracing::info!(
            probe_delay = ?self.config.probe_delay,
            dedupe_probes = self.config.dedupe_probes,
            priority = self.config.listener_priority.0,
            "Starting completion listener"
        );
        let handle = listener.spawn(
            &self.bus,
            self.config.listener_priority,
            self.shutdown.child_token(),
        );
        *started = true;
        Ok(handle)
    }

    /// Record a run starting. A `host` names the node that executes it.
    pub async fn begin_run(
        &self,
        queue_id: u64,
        slot: ExecutionSlot,
        host: Option<&str>,
    ) -> Result<ActiveRun> {
        let run_id = Uuid::new_v4();
        if let Some(name) = host {
            let computer = self
                .cluster
                .computer(name)
                .await
                .ok_or_else(|| DrainError::NodeNotFound(name.to_string()))?;
            computer.start_run(run_id).await;
        }

        tracing::debug!(run_id = %run_id, queue_id, slot = %slot, host = ?host, "Run started");
        Ok(ActiveRun {
            run_id,
            queue_id,
            host: host.map(str::to_string),
            slot,
        })
    }

    /// Finish a run on its host and publish it as finalized.
    pub async fn finalize_run(&self, run: ActiveRun) {
        if let Some(name) = &run.host {
            // The host may have been removed while the run executed
            if let Some(computer) = self.cluster.computer(name).await {
                computer.finish_run(&run.run_id).await;
            }
        }

        // Only runs the listener receives count towards settle()
        let started = self.started();
        if *started {
            self.published.fetch_add(1, Ordering::SeqCst);
        }
        self.bus.publish(FinalizedRun {
            run_id: run.run_id,
            queue_id: run.queue_id,
            slot: run.slot,
        });
    }

    /// Wait until the listener handled every published run and every probe
    /// it scheduled has resolved. Returns early on shutdown.
    pub async fn settle(&self) {
        let target = self.published.load(Ordering::SeqCst);
        let mut handled = self.handled_tx.subscribe();

        tokio::select! {
            _ = self.shutdown.cancelled() => return,
            result = handled.wait_for(|n| *n >= target) => {
                if result.is_err() {
                    return;
                }
            }
        }

        self.scheduler.wait_for_probes().await;
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn started(&self) -> MutexGuard<'_, bool> {
        self.started
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
