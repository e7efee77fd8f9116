//! Scripted cluster scenarios for the `simulate` command.
//!
//! A scenario registers nodes, drains some of them, starts runs that finish
//! after fixed durations, and reports node states once every finalized run
//! has been handled and every idle probe has resolved.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinSet;

use crate::error::{DrainError, Result};
use crate::events::ExecutionSlot;
use crate::service::DrainService;

/// `node=user` or bare `node` for an unattributed drain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrainSpec {
    pub node: String,
    pub user: Option<String>,
}

impl FromStr for DrainSpec {
    type Err = DrainError;

    fn from_str(s: &str) -> Result<Self> {
        let (node, user) = match s.split_once('=') {
            Some((node, user)) => (node.trim(), Some(user.trim())),
            None => (s.trim(), None),
        };
        if node.is_empty() {
            return Err(DrainError::InvalidDrainSpec(s.to_string()));
        }
        Ok(Self {
            node: node.to_string(),
            user: user.filter(|u| !u.is_empty()).map(str::to_string),
        })
    }
}

/// A run to simulate:
/// - `node:secs` runs on `node` and reports that node's slot
/// - `ephemeral:secs` runs on a one-off slot that occupies no node
/// - `ephemeral@node:secs` occupies `node` but reports a one-off slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSpec {
    pub slot: ExecutionSlot,
    pub host: Option<String>,
    pub duration: Duration,
}

const EPHEMERAL: &str = "ephemeral";

impl FromStr for RunSpec {
    type Err = DrainError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || DrainError::InvalidRunSpec(s.to_string());

        let (target, secs) = s.trim().rsplit_once(':').ok_or_else(invalid)?;
        let secs: u64 = secs.parse().map_err(|_| invalid())?;
        let duration = Duration::from_secs(secs);

        let (slot, host) = if target == EPHEMERAL {
            (ExecutionSlot::Ephemeral, None)
        } else if let Some(host) = target.strip_prefix("ephemeral@") {
            if host.is_empty() {
                return Err(invalid());
            }
            (ExecutionSlot::Ephemeral, Some(host.to_string()))
        } else if target.is_empty() {
            return Err(invalid());
        } else {
            (
                ExecutionSlot::Node(target.to_string()),
                Some(target.to_string()),
            )
        };

        Ok(Self {
            slot,
            host,
            duration,
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct Scenario {
    pub nodes: Vec<String>,
    pub drains: Vec<DrainSpec>,
    pub runs: Vec<RunSpec>,
    /// Track every run's queue id as a full-shutdown blocker
    pub full_shutdown: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub name: String,
    pub draining: bool,
    pub drained_by: Option<String>,
    pub offline: bool,
    pub offline_cause: Option<String>,
    pub running: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub nodes: Vec<NodeReport>,
    pub full_shutdown: bool,
    pub active_queue_ids: Vec<u64>,
}

/// Play `scenario` against a started service and report the outcome.
pub async fn run_scenario(service: Arc<DrainService>, scenario: Scenario) -> Result<ScenarioReport> {
    for node in &scenario.nodes {
        service.cluster.add_node(node).await?;
    }

    for drain in &scenario.drains {
        if service.cluster.computer(&drain.node).await.is_none() {
            return Err(DrainError::NodeNotFound(drain.node.clone()));
        }
        service
            .coordinator
            .mark_draining(&drain.node, drain.user.clone())
            .await;
    }

    let mut started = Vec::with_capacity(scenario.runs.len());
    for (i, spec) in scenario.runs.iter().enumerate() {
        let queue_id = i as u64 + 1;
        let run = service
            .begin_run(queue_id, spec.slot.clone(), spec.host.as_deref())
            .await?;
        started.push((run, spec.duration));
    }

    if scenario.full_shutdown {
        service
            .coordinator
            .begin_full_shutdown(started.iter().map(|(run, _)| run.queue_id))
            .await;
    }

    let mut completions = JoinSet::new();
    for (run, duration) in started {
        let service = service.clone();
        completions.spawn(async move {
            tokio::time::sleep(duration).await;
            service.finalize_run(run).await;
        });
    }
    while let Some(result) = completions.join_next().await {
        result.map_err(|e| DrainError::Internal(format!("run completion task failed: {e}")))?;
    }

    service.settle().await;
    Ok(report(&service).await)
}

/// Snapshot of every node plus the full-shutdown bookkeeping
pub async fn report(service: &DrainService) -> ScenarioReport {
    let mut nodes = Vec::new();
    for name in service.cluster.node_names().await {
        let Some(computer) = service.cluster.computer(&name).await else {
            continue;
        };
        let cause = computer.offline_cause().await;
        nodes.push(NodeReport {
            draining: service.coordinator.is_draining(&name).await,
            drained_by: service.coordinator.drained_by(&name).await,
            offline: cause.is_some(),
            offline_cause: cause.map(|c| c.to_string()),
            running: computer.running_count().await,
            name,
        });
    }

    ScenarioReport {
        nodes,
        full_shutdown: service.coordinator.is_going_to_shutdown().await,
        active_queue_ids: service.coordinator.active_queue_ids().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_drain_spec() {
        let spec: DrainSpec = "agent-1=alice".parse().unwrap();
        assert_eq!(spec.node, "agent-1");
        assert_eq!(spec.user.as_deref(), Some("alice"));

        let spec: DrainSpec = "agent-2".parse().unwrap();
        assert_eq!(spec.node, "agent-2");
        assert!(spec.user.is_none());

        let spec: DrainSpec = "agent-3=".parse().unwrap();
        assert!(spec.user.is_none());

        assert!(matches!(
            "=alice".parse::<DrainSpec>(),
            Err(DrainError::InvalidDrainSpec(_))
        ));
    }

    #[test]
    fn parse_run_spec_on_node() {
        let spec: RunSpec = "agent-1:5".parse().unwrap();
        assert_eq!(spec.slot, ExecutionSlot::Node("agent-1".to_string()));
        assert_eq!(spec.host.as_deref(), Some("agent-1"));
        assert_eq!(spec.duration, Duration::from_secs(5));
    }

    #[test]
    fn parse_run_spec_ephemeral() {
        let spec: RunSpec = "ephemeral:3".parse().unwrap();
        assert_eq!(spec.slot, ExecutionSlot::Ephemeral);
        assert!(spec.host.is_none());

        let spec: RunSpec = "ephemeral@agent-2:0".parse().unwrap();
        assert_eq!(spec.slot, ExecutionSlot::Ephemeral);
        assert_eq!(spec.host.as_deref(), Some("agent-2"));
        assert_eq!(spec.duration, Duration::ZERO);
    }

    #[test]
    fn parse_run_spec_invalid() {
        for bad in ["agent-1", "agent-1:x", ":5", "ephemeral@:5", "agent-1:-1"] {
            assert!(
                matches!(bad.parse::<RunSpec>(), Err(DrainError::InvalidRunSpec(_))),
                "{bad} should be rejected"
            );
        }
    }
}
