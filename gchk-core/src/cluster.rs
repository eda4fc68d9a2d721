//! Cluster scheduler seam
//!
//! The monitor only needs two things from the workload scheduler: the list
//! of nodes to check and a way to take one out of the scheduling pool.

use async_trait::async_trait;
use thiserror::Error;

use crate::executor::{CommandResult, ExecError};

/// Scheduler-assigned node name
pub type NodeName = String;

/// Errors from node discovery. These end the monitor loop.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    /// The scheduler rejected the query or is unreachable
    #[error("Node query failed:\n{}", .0.report())]
    QueryFailed(CommandResult),

    /// The query command could not be run at all
    #[error("Node query could not be run: {0}")]
    Exec(#[from] ExecError),
}

/// Operations against the cluster scheduler
#[async_trait]
pub trait ClusterScheduler: Send + Sync {
    /// Names of nodes in any of `states` within any of `partitions`,
    /// in scheduler order
    async fn find_nodes(
        &self,
        states: &[String],
        partitions: &[String],
    ) -> Result<Vec<NodeName>, DiscoveryError>;

    /// Move a node to the drained state with an operator-visible reason.
    ///
    /// Never fails: a command that could not run yields a failed result.
    async fn drain_node(&self, node: &str, reason: &str) -> CommandResult;
}
