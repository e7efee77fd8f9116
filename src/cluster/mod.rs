//! Runtime view of the compute nodes in the cluster.
//!
//! - [`Computer`]: one node's runtime handle (busy/idle, offline state)
//! - [`Cluster`]: name-to-handle registry; lookups may miss when a node
//!   was removed in the meantime

pub mod computer;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::error::{DrainError, Result};

pub use computer::{Computer, OfflineCause, OfflineReason};

/// Registry of compute nodes by name
#[derive(Debug, Default)]
pub struct Cluster {
    nodes: RwLock<HashMap<String, Arc<Computer>>>,
}

impl Cluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node. Fails if the name is taken.
    pub async fn add_node(&self, name: &str) -> Result<Arc<Computer>> {
        let mut nodes = self.nodes.write().await;
        if nodes.contains_key(name) {
            return Err(DrainError::DuplicateNode(name.to_string()));
        }
        let computer = Arc::new(Computer::new(name));
        nodes.insert(name.to_string(), computer.clone());
        tracing::info!(node = name, "Node registered");
        Ok(computer)
    }

    /// Remove a node. Handles held elsewhere stay usable but report
    /// [`Computer::is_removed`].
    pub async fn remove_node(&self, name: &str) -> Result<Arc<Computer>> {
        let removed = self.nodes.write().await.remove(name);
        match removed {
            Some(computer) => {
                computer.mark_removed().await;
                tracing::info!(node = name, "Node removed");
                Ok(computer)
            }
            None => Err(DrainError::NodeNotFound(name.to_string())),
        }
    }

    pub async fn computer(&self, name: &str) -> Option<Arc<Computer>> {
        self.nodes.read().await.get(name).cloned()
    }

    /// All node names, sorted
    pub async fn node_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.nodes.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_and_lookup() {
        let cluster = Cluster::new();
        let added = cluster.add_node("agent-1").await.unwrap();
        let found = cluster.computer("agent-1").await.unwrap();
        assert!(Arc::ptr_eq(&added, &found));
        assert!(cluster.computer("agent-2").await.is_none());
    }

    #[tokio::test]
    async fn duplicate_node_rejected() {
        let cluster = Cluster::new();
        cluster.add_node("agent-1").await.unwrap();
        let err = cluster.add_node("agent-1").await.unwrap_err();
        assert!(matches!(err, DrainError::DuplicateNode(name) if name == "agent-1"));
    }

    #[tokio::test]
    async fn remove_node() {
        let cluster = Cluster::new();
        let handle = cluster.add_node("agent-1").await.unwrap();
        cluster.remove_node("agent-1").await.unwrap();
        assert!(cluster.computer("agent-1").await.is_none());
        assert!(handle.is_removed().await);

        let err = cluster.remove_node("agent-1").await.unwrap_err();
        assert!(matches!(err, DrainError::NodeNotFound(_)));
    }

    #[tokio::test]
    async fn node_names_sorted() {
        let cluster = Cluster::new();
        for name in ["agent-3", "agent-1", "agent-2"] {
            cluster.add_node(name).await.unwrap();
        }
        assert_eq!(
            cluster.node_names().await,
            vec!["agent-1", "agent-2", "agent-3"]
        );
    }
}
