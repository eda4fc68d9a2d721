//! Command execution layer
//!
//! Every external collaborator (Slurm CLI, ssh) is reached through
//! a [`CommandRunner`], so the rest of the system can be tested with
//! scripted output.

mod command;
mod mock;
mod system;

pub use command::{CommandResult, CommandSpec, ExecError};
pub use mock::{MockResponse, MockRunner};
pub use system::SystemRunner;

use async_trait::async_trait;

/// Runs a command to completion and captures its output.
///
/// A non-zero exit status is not an error; it is encoded in the returned
/// [`CommandResult`]. Errors are reserved for commands that could not be
/// spawned or did not finish within their timeout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandResult, ExecError>;
}
