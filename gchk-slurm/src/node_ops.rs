//! Node Operations
//!
//! Implements node discovery and draining on top of the Slurm CLI.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::client::SlurmClient;
use gchk_core::cluster::{ClusterScheduler, DiscoveryError, NodeName};
use gchk_core::executor::CommandResult;

/// Parse `sinfo -N --noheader` output into node names.
///
/// Blank lines are skipped; the name is the first whitespace-delimited
/// token of every other line. Order is preserved.
pub fn parse_node_list(output: &str) -> Vec<NodeName> {
    output
        .lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

#[async_trait]
impl ClusterScheduler for SlurmClient {
    async fn find_nodes(
        &self,
        states: &[String],
        partitions: &[String],
    ) -> Result<Vec<NodeName>, DiscoveryError> {
        let spec = self.node_query(states, partitions);
        let result = self.run(&spec).await?;

        if !result.succeeded() {
            return Err(DiscoveryError::QueryFailed(result));
        }

        let nodes = parse_node_list(result.stdout());
        debug!(command = %result.command(), count = nodes.len(), "Parsed node list");

        Ok(nodes)
    }

    async fn drain_node(&self, node: &str, reason: &str) -> CommandResult {
        let spec = self.drain_command(node, reason);
        info!(node = %node, reason = reason, "Draining node");

        match self.run(&spec).await {
            Ok(result) => result,
            Err(e) => {
                warn!(node = %node, error = %e, "Drain command did not complete");
                CommandResult::not_run(spec.rendered(), e.to_string())
            }
        }
    }
}
