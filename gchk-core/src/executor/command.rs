//! Command specification and captured result types

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// A program invocation: executable plus argument vector.
///
/// Arguments are handed to the process as-is and never pass through a shell,
/// so node names and reason strings cannot inject extra commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to execute (looked up in PATH if not absolute)
    pub program: String,
    /// Arguments passed to the program
    pub args: Vec<String>,
    /// Upper bound on the run time, if any
    pub timeout: Option<Duration>,
}

impl CommandSpec {
    /// Create a command spec for a program with no arguments
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: None,
        }
    }

    /// Append a single argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Bound the run time of the command
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Render the command as a shell-quoted string for logs and reports
    pub fn rendered(&self) -> String {
        let words: Vec<&str> = std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect();
        shlex::try_join(words.iter().copied()).unwrap_or_else(|_| words.join(" "))
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered())
    }
}

/// Captured output of a finished command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    command: String,
    stdout: String,
    stderr: String,
    exit_status: i32,
    report: String,
}

impl CommandResult {
    /// Build a result and render its report
    pub fn new(
        command: impl Into<String>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        exit_status: i32,
    ) -> Self {
        let command = command.into();
        let stdout = stdout.into();
        let stderr = stderr.into();
        let report = render_report(&command, &stdout, &stderr, exit_status);
        Self {
            command,
            stdout,
            stderr,
            exit_status,
            report,
        }
    }

    /// Result for a command that never produced an exit status
    pub fn not_run(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(command, String::new(), reason, -1)
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn stdout(&self) -> &str {
        &self.stdout
    }

    pub fn stderr(&self) -> &str {
        &self.stderr
    }

    /// Process exit status, `-1` when killed by a signal or never run
    pub fn exit_status(&self) -> i32 {
        self.exit_status
    }

    pub fn succeeded(&self) -> bool {
        self.exit_status == 0
    }

    /// Human-readable diagnostic report, reused as notification body
    pub fn report(&self) -> &str {
        &self.report
    }
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.report)
    }
}

fn render_report(command: &str, stdout: &str, stderr: &str, exit_status: i32) -> String {
    [
        "command:".to_string(),
        command.to_string(),
        format!("command success: {}", exit_status == 0),
        String::new(),
        "stdout:".to_string(),
        stdout.to_string(),
        String::new(),
        "stderr:".to_string(),
        stderr.to_string(),
        String::new(),
        "exit code:".to_string(),
        exit_status.to_string(),
    ]
    .join("\n")
}

/// Errors that prevent a command from producing a result
#[derive(Debug, Error)]
pub enum ExecError {
    /// The program could not be started at all
    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The program did not finish in time and was killed
    #[error("Command `{command}` timed out after {}", format_timeout(.timeout))]
    Timeout { command: String, timeout: Duration },
}

fn format_timeout(timeout: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*timeout)
}
