//! Slurm CLI client
//!
//! Builds `sinfo`/`scontrol` invocations and runs them through a
//! [`CommandRunner`].

use std::sync::Arc;
use std::time::Duration;

use gchk_core::executor::{CommandResult, CommandRunner, CommandSpec, ExecError};
use tracing::debug;

/// Slurm CLI settings
#[derive(Debug, Clone)]
pub struct SlurmConfig {
    /// Path to `sinfo`
    pub sinfo_path: String,
    /// Path to `scontrol`
    pub scontrol_path: String,
    /// Upper bound on each Slurm command
    pub timeout: Duration,
}

impl Default for SlurmConfig {
    fn default() -> Self {
        Self {
            sinfo_path: "sinfo".to_string(),
            scontrol_path: "scontrol".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Slurm client wrapper
pub struct SlurmClient {
    runner: Arc<dyn CommandRunner>,
    config: SlurmConfig,
}

impl SlurmClient {
    pub fn new(runner: Arc<dyn CommandRunner>, config: SlurmConfig) -> Self {
        Self { runner, config }
    }

    /// `sinfo` query listing one node name per line, no header
    pub fn node_query(&self, states: &[String], partitions: &[String]) -> CommandSpec {
        CommandSpec::new(self.config.sinfo_path.as_str())
            .arg(format!("--states={}", states.join(",")))
            .arg(format!("--partition={}", partitions.join(",")))
            .args(["-N", "--noheader", "--format=%N"])
            .timeout(self.config.timeout)
    }

    /// `scontrol` update moving a node to the drained state
    pub fn drain_command(&self, node: &str, reason: &str) -> CommandSpec {
        CommandSpec::new(self.config.scontrol_path.as_str())
            .arg("update")
            .arg(format!("nodename={}", node))
            .arg("state=drain")
            // One argv element, so the reason may contain spaces without quoting
            .arg(format!("reason={}", reason))
            .timeout(self.config.timeout)
    }

    /// Run a Slurm command
    pub async fn run(&self, spec: &CommandSpec) -> Result<CommandResult, ExecError> {
        debug!(command = %spec, "Running Slurm command");
        self.runner.run(spec).await
    }
}
