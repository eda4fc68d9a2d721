//! Scripted command runner for testing

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{CommandResult, CommandRunner, CommandSpec, ExecError};

/// Canned response returned by [`MockRunner`]
#[derive(Debug, Clone)]
pub enum MockResponse {
    /// Command ran and exited with the given output
    Output {
        stdout: String,
        stderr: String,
        exit_status: i32,
    },
    /// Command could not be spawned
    SpawnFailure(String),
    /// Command exceeded its timeout
    Timeout,
}

impl MockResponse {
    /// Successful run with the given stdout
    pub fn ok(stdout: &str) -> Self {
        Self::exit(0, stdout, "")
    }

    /// Run that exited with the given status and output
    pub fn exit(exit_status: i32, stdout: &str, stderr: &str) -> Self {
        Self::Output {
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            exit_status,
        }
    }
}

/// Runner that replays queued responses and records every command it sees.
///
/// When the queue is empty, commands succeed with empty output.
#[derive(Default)]
pub struct MockRunner {
    responses: Mutex<VecDeque<MockResponse>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl MockRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a runner preloaded with responses, replayed in order
    pub fn with_responses(responses: impl IntoIterator<Item = MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue another response
    pub async fn push_response(&self, response: MockResponse) {
        self.responses.lock().await.push_back(response);
    }

    /// Commands run so far
    pub async fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().await.clone()
    }
}

#[async_trait]
impl CommandRunner for MockRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandResult, ExecError> {
        self.calls.lock().await.push(spec.clone());

        let response = self
            .responses
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| MockResponse::ok(""));

        match response {
            MockResponse::Output {
                stdout,
                stderr,
                exit_status,
            } => Ok(CommandResult::new(
                spec.rendered(),
                stdout,
                stderr,
                exit_status,
            )),
            MockResponse::SpawnFailure(message) => Err(ExecError::Spawn {
                program: spec.program.clone(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, message),
            }),
            MockResponse::Timeout => Err(ExecError::Timeout {
                command: spec.rendered(),
                timeout: spec.timeout.unwrap_or(Duration::ZERO),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_replays_in_order() {
        let runner = MockRunner::with_responses([
            MockResponse::ok("first\n"),
            MockResponse::exit(2, "", "boom"),
        ]);
        let spec = CommandSpec::new("true");

        let first = runner.run(&spec).await.unwrap();
        assert_eq!(first.stdout(), "first\n");

        let second = runner.run(&spec).await.unwrap();
        assert_eq!(second.exit_status(), 2);

        let third = runner.run(&spec).await.unwrap();
        assert!(third.succeeded());

        assert_eq!(runner.calls().await.len(), 3);
    }

    #[tokio::test]
    async fn test_mock_errors() {
        let runner = MockRunner::with_responses([
            MockResponse::SpawnFailure("gone".to_string()),
            MockResponse::Timeout,
        ]);
        let spec = CommandSpec::new("ssh");

        assert!(matches!(
            runner.run(&spec).await,
            Err(ExecError::Spawn { .. })
        ));
        assert!(matches!(
            runner.run(&spec).await,
            Err(ExecError::Timeout { .. })
        ));
    }
}
