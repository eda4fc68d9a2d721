//! Command runner backed by real child processes

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, trace};

use super::{CommandResult, CommandRunner, CommandSpec, ExecError};

/// Runs commands as local child processes
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandResult, ExecError> {
        let rendered = spec.rendered();
        debug!(command = %rendered, timeout = ?spec.timeout, "Running command");

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .stdin(Stdio::null())
            // Dropping the output future on timeout kills the child
            .kill_on_drop(true);

        let output = match spec.timeout {
            Some(timeout) => tokio::time::timeout(timeout, command.output())
                .await
                .map_err(|_| ExecError::Timeout {
                    command: rendered.clone(),
                    timeout,
                })?,
            None => command.output().await,
        }
        .map_err(|source| ExecError::Spawn {
            program: spec.program.clone(),
            source,
        })?;

        let exit_status = output.status.code().unwrap_or(-1);
        trace!(command = %rendered, exit_status, "Command finished");

        Ok(CommandResult::new(
            rendered,
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr),
            exit_status,
        ))
    }
}
