//! Test harness for drain integration tests.
//!
//! Builds an in-process cluster with a shutdown coordinator, an idle probe
//! scheduler and a completion listener wired together. Tests run on paused
//! tokio time, so probe delays elapse instantly once every task is idle.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use lenient_shutdown::cluster::{Cluster, Computer};
use lenient_shutdown::config::DrainConfig;
use lenient_shutdown::coordinator::ShutdownCoordinator;
use lenient_shutdown::drain::{CompletionListener, IdleProbeScheduler, ProbeOutcome};
use lenient_shutdown::service::DrainService;
use lenient_shutdown::simulation::{NodeReport, ScenarioReport};

/// Probe delay used by the harness, matching the production default
#[allow(dead_code)]
pub const PROBE_DELAY: Duration = Duration::from_secs(10);

/// Drain config for tests
#[allow(dead_code)]
pub fn test_drain_config() -> DrainConfig {
    DrainConfig::new(PROBE_DELAY)
}

/// In-process cluster with the drain components attached
#[allow(dead_code)]
pub struct TestCluster {
    pub coordinator: Arc<ShutdownCoordinator>,
    pub cluster: Arc<Cluster>,
    pub scheduler: Arc<IdleProbeScheduler>,
    pub listener: CompletionListener,
    pub shutdown: CancellationToken,
}

#[allow(dead_code)]
impl TestCluster {
    /// Create a cluster with the given nodes and the default test config
    pub async fn new(nodes: &[&str]) -> Self {
        Self::with_config(test_drain_config(), nodes).await
    }

    pub async fn with_config(config: DrainConfig, nodes: &[&str]) -> Self {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let cluster = Arc::new(Cluster::new());
        let shutdown = CancellationToken::new();
        let scheduler = Arc::new(IdleProbeScheduler::new(
            &config,
            coordinator.clone(),
            cluster.clone(),
            shutdown.clone(),
        ));
        let listener =
            CompletionListener::new(coordinator.clone(), cluster.clone(), scheduler.clone());

        for node in nodes {
            cluster.add_node(node).await.unwrap();
        }

        Self {
            coordinator,
            cluster,
            scheduler,
            listener,
            shutdown,
        }
    }

    /// Get a node's runtime handle, panicking if it is not registered
    pub async fn computer(&self, node: &str) -> Arc<Computer> {
        self.cluster
            .computer(node)
            .await
            .unwrap_or_else(|| panic!("node {node} not registered"))
    }

    /// Mark a node draining on behalf of `user`
    pub async fn drain(&self, node: &str, user: &str) {
        self.coordinator
            .mark_draining(node, Some(user.to_string()))
            .await;
    }

    /// Start a run on a node and return its id
    pub async fn start_run(&self, node: &str) -> Uuid {
        let run_id = Uuid::new_v4();
        self.computer(node).await.start_run(run_id).await;
        run_id
    }

    /// Finish a run on a node
    pub async fn finish_run(&self, node: &str, run_id: Uuid) {
        assert!(
            self.computer(node).await.finish_run(&run_id).await,
            "run {run_id} was not running on {node}"
        );
    }

    pub async fn is_offline(&self, node: &str) -> bool {
        self.computer(node).await.is_temporarily_offline().await
    }

    /// User the node's offline cause is attributed to
    #[allow(dead_code)]
    pub async fn offline_user(&self, node: &str) -> Option<String> {
        self.computer(node)
            .await
            .offline_cause()
            .await
            .and_then(|cause| cause.user)
    }
}

/// Await every probe and collect the outcomes in order
#[allow(dead_code)]
pub async fn outcomes(probes: Vec<JoinHandle<ProbeOutcome>>) -> Vec<ProbeOutcome> {
    let mut outcomes = Vec::with_capacity(probes.len());
    for probe in probes {
        outcomes.push(probe.await.expect("probe task panicked"));
    }
    outcomes
}

/// Build a drain service with its completion listener already running
#[allow(dead_code)]
pub fn started_service(config: DrainConfig) -> Arc<DrainService> {
    let service = Arc::new(DrainService::new(config, CancellationToken::new()));
    service.start().expect("fresh service has no listener yet");
    service
}

/// Find a node in a scenario report, panicking if it is absent
#[allow(dead_code)]
pub fn node_report<'a>(report: &'a ScenarioReport, name: &str) -> &'a NodeReport {
    report
        .nodes
        .iter()
        .find(|n| n.name == name)
        .unwrap_or_else(|| panic!("{name} missing from report"))
}
