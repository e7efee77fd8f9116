use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Why a node was taken offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OfflineReason {
    /// Drained leniently: taken offline once its last run finished
    LenientShutdown,
}

impl std::fmt::Display for OfflineReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OfflineReason::LenientShutdown => write!(f, "lenient shutdown"),
        }
    }
}

/// Metadata attached to a node when it goes offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineCause {
    pub reason: OfflineReason,
    pub user: Option<String>,
    pub at: DateTime<Utc>,
}

impl OfflineCause {
    pub fn lenient_shutdown(user: Option<String>) -> Self {
        Self {
            reason: OfflineReason::LenientShutdown,
            user,
            at: Utc::now(),
        }
    }
}

impl std::fmt::Display for OfflineCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.user {
            Some(user) => write!(f, "Taken offline by {} ({})", user, self.reason),
            None => write!(f, "Taken offline ({})", self.reason),
        }
    }
}

#[derive(Debug, Default)]
struct ComputerState {
    running: HashSet<Uuid>,
    offline: Option<OfflineCause>,
    removed: bool,
}

/// Runtime handle of one compute node.
///
/// Busy/idle, offline and removal state live behind one lock; every method
/// takes it for the duration of a single read or update.
#[derive(Debug)]
pub struct Computer {
    name: String,
    state: RwLock<ComputerState>,
}

impl Computer {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(ComputerState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn is_temporarily_offline(&self) -> bool {
        self.state.read().await.offline.is_some()
    }

    pub async fn offline_cause(&self) -> Option<OfflineCause> {
        self.state.read().await.offline.clone()
    }

    /// Take the node offline. Returns false if it already was; the existing
    /// cause is kept in that case.
    pub async fn set_temporarily_offline(&self, cause: OfflineCause) -> bool {
        let mut state = self.state.write().await;
        if state.offline.is_some() {
            return false;
        }
        state.offline = Some(cause);
        true
    }

    /// Bring the node back online. Returns the cause it was offline with.
    pub async fn bring_online(&self) -> Option<OfflineCause> {
        self.state.write().await.offline.take()
    }

    /// Record a run starting on this node
    pub async fn start_run(&self, run_id: Uuid) {
        self.state.write().await.running.insert(run_id);
    }

    /// Record a run finishing on this node. Returns false for unknown runs.
    pub async fn finish_run(&self, run_id: &Uuid) -> bool {
        self.state.write().await.running.remove(run_id)
    }

    pub async fn is_busy(&self) -> bool {
        !self.state.read().await.running.is_empty()
    }

    pub async fn running_count(&self) -> usize {
        self.state.read().await.running.len()
    }

    /// Flag the handle as belonging to a node no longer in the cluster
    pub(crate) async fn mark_removed(&self) {
        self.state.write().await.removed = true;
    }

    /// True once the node has been removed from its cluster
    pub async fn is_removed(&self) -> bool {
        self.state.read().await.removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_computer_is_online_and_idle() {
        let computer = Computer::new("agent-1");
        assert_eq!(computer.name(), "agent-1");
        assert!(!computer.is_temporarily_offline().await);
        assert!(!computer.is_busy().await);
        assert_eq!(computer.running_count().await, 0);
        assert!(!computer.is_removed().await);
    }

    #[tokio::test]
    async fn runs_make_computer_busy() {
        let computer = Computer::new("agent-1");
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        computer.start_run(a).await;
        computer.start_run(b).await;
        assert!(computer.is_busy().await);
        assert_eq!(computer.running_count().await, 2);

        assert!(computer.finish_run(&a).await);
        assert!(computer.is_busy().await);
        assert!(computer.finish_run(&b).await);
        assert!(!computer.is_busy().await);

        assert!(!computer.finish_run(&a).await);
    }

    #[tokio::test]
    async fn set_offline_is_idempotent() {
        let computer = Computer::new("agent-1");
        let first = OfflineCause::lenient_shutdown(Some("alice".to_string()));

        assert!(computer.set_temporarily_offline(first.clone()).await);
        assert!(
            !computer
                .set_temporarily_offline(OfflineCause::lenient_shutdown(Some("bob".to_string())))
                .await
        );

        assert_eq!(computer.offline_cause().await, Some(first));
    }

    #[tokio::test]
    async fn bring_online_clears_cause() {
        let computer = Computer::new("agent-1");
        computer
            .set_temporarily_offline(OfflineCause::lenient_shutdown(None))
            .await;

        let cause = computer.bring_online().await.unwrap();
        assert_eq!(cause.reason, OfflineReason::LenientShutdown);
        assert!(cause.user.is_none());
        assert!(!computer.is_temporarily_offline().await);
        assert!(computer.bring_online().await.is_none());
    }

    #[test]
    fn offline_cause_display() {
        let cause = OfflineCause::lenient_shutdown(Some("alice".to_string()));
        assert_eq!(
            cause.to_string(),
            "Taken offline by alice (lenient shutdown)"
        );
        assert_eq!(
            OfflineCause::lenient_shutdown(None).to_string(),
            "Taken offline (lenient shutdown)"
        );
    }

    #[test]
    fn offline_cause_serializes_reason_and_user() {
        let cause = OfflineCause::lenient_shutdown(Some("alice".to_string()));
        let json = serde_json::to_value(&cause).unwrap();
        assert_eq!(json["reason"], "LenientShutdown");
        assert_eq!(json["user"], "alice");
    }
}
