//! Remediator
//!
//! Drains a node whose probe failed and tells the operators whether the
//! drain took. A failed drain is the event that needs a human, so it is
//! reported separately from the probe failure itself.

use std::sync::Arc;

use tracing::{error, info};

use crate::cluster::{ClusterScheduler, NodeName};
use crate::executor::CommandResult;
use crate::notify::AlertMailer;

/// Reason attached to drains when none is configured
pub const DEFAULT_DRAIN_REASON: &str = "nvidia-smi failure";

/// Result of one drain attempt
#[derive(Debug, Clone)]
pub struct DrainOutcome {
    pub node: NodeName,
    /// Whether the scheduler accepted the state change
    pub accepted: bool,
    /// `false` when the drain was only logged (dry run)
    pub executed: bool,
    pub result: CommandResult,
}

/// Subject line of the drain success email
pub fn drain_success_subject(node: &str) -> String {
    format!("gpu-checker has drained node {}", node)
}

/// Subject line of the drain failure email
pub fn drain_failure_subject(node: &str) -> String {
    format!(
        "ACTION REQUIRED: gpu-checker wanted to drain node {}, but failed",
        node
    )
}

/// Takes unhealthy nodes out of the scheduling pool
pub struct Remediator {
    scheduler: Arc<dyn ClusterScheduler>,
    mailer: Arc<AlertMailer>,
    dry_run: bool,
}

impl Remediator {
    pub fn new(
        scheduler: Arc<dyn ClusterScheduler>,
        mailer: Arc<AlertMailer>,
        dry_run: bool,
    ) -> Self {
        Self {
            scheduler,
            mailer,
            dry_run,
        }
    }

    /// Drain `node` with `reason`, then send exactly one email describing
    /// whether the scheduler accepted it
    pub async fn drain(&self, node: &str, reason: &str) -> DrainOutcome {
        if self.dry_run {
            info!(node = %node, reason = reason, "[DRY-RUN] Would drain node");
            return DrainOutcome {
                node: node.to_string(),
                accepted: false,
                executed: false,
                result: CommandResult::not_run(
                    format!("drain {}", node),
                    "dry run - drain not executed",
                ),
            };
        }

        let result = self.scheduler.drain_node(node, reason).await;
        let accepted = result.succeeded();

        let subject = if accepted {
            info!(node = %node, reason = reason, "Node drained");
            drain_success_subject(node)
        } else {
            error!(
                node = %node,
                exit_status = result.exit_status(),
                stderr = %result.stderr().trim(),
                "Failed to drain node"
            );
            drain_failure_subject(node)
        };

        self.mailer.send_logged(&subject, result.report()).await;

        DrainOutcome {
            node: node.to_string(),
            accepted,
            executed: true,
            result,
        }
    }
}
