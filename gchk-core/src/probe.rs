//! GPU Prober
//!
//! Runs the GPU diagnostic on a node over ssh. The remote shell echoes the
//! diagnostic's own exit status as the last line of output, so a working
//! ssh connection to a node with a broken GPU is not mistaken for success.
//!
//! Anything that prevents a clean verdict (connection refused, bad key,
//! timeout, garbled output) counts as unhealthy. A node that cannot be
//! reached gets drained just like a node whose GPU is broken.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::cluster::NodeName;
use crate::executor::{CommandResult, CommandRunner, CommandSpec};
use crate::notify::AlertMailer;

/// Remote probe settings
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Remote login user
    pub ssh_user: String,
    /// Private key used to authenticate
    pub ssh_keyfile: PathBuf,
    /// Diagnostic command run on the node
    pub command: String,
    /// ssh connection establishment timeout
    pub connect_timeout: Duration,
    /// Upper bound on the whole probe
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            ssh_user: String::new(),
            ssh_keyfile: PathBuf::new(),
            command: "nvidia-smi".to_string(),
            connect_timeout: Duration::from_secs(10),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Verdict of one probe
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
    pub node: NodeName,
    pub healthy: bool,
    /// Captured ssh invocation, used as the diagnostic report
    pub result: CommandResult,
}

impl ProbeOutcome {
    pub fn diagnostic_report(&self) -> &str {
        self.result.report()
    }
}

/// Subject line of the probe failure email
pub fn probe_failure_subject(node: &str) -> String {
    format!("gpu-checker has detected an error on node {}", node)
}

/// Exit status echoed by the remote shell: the last non-blank stdout line
pub fn remote_exit_status(stdout: &str) -> Option<i32> {
    stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()?
        .parse()
        .ok()
}

/// Healthy only if ssh itself exited 0 and the echoed remote status is 0
pub fn interpret(result: &CommandResult) -> bool {
    result.succeeded() && remote_exit_status(result.stdout()) == Some(0)
}

/// Probes node GPUs over ssh
pub struct GpuProber {
    runner: Arc<dyn CommandRunner>,
    mailer: Arc<AlertMailer>,
    config: ProbeConfig,
}

impl GpuProber {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        mailer: Arc<AlertMailer>,
        config: ProbeConfig,
    ) -> Self {
        Self {
            runner,
            mailer,
            config,
        }
    }

    /// ssh invocation that runs the diagnostic on `node`
    pub fn command_for(&self, node: &str) -> CommandSpec {
        let connect_timeout = self.config.connect_timeout.as_secs().max(1);

        CommandSpec::new("ssh")
            .args(["-o", "StrictHostKeyChecking=no"])
            .args(["-o", "BatchMode=yes"])
            .arg("-o")
            .arg(format!("ConnectTimeout={}", connect_timeout))
            .arg("-i")
            .arg(self.config.ssh_keyfile.to_string_lossy())
            .arg("-l")
            .arg(self.config.ssh_user.as_str())
            // Node names never get parsed as ssh options
            .arg("--")
            .arg(node)
            .arg(format!("{}; echo $?", self.config.command))
            .timeout(self.config.timeout)
    }

    /// Probe one node, emailing the operators when its GPU check fails
    pub async fn probe(&self, node: &str) -> ProbeOutcome {
        let spec = self.command_for(node);
        debug!(node = %node, command = %spec, "Probing GPU");

        let result = match self.runner.run(&spec).await {
            Ok(result) => result,
            Err(e) => {
                warn!(node = %node, error = %e, "Probe command did not complete");
                CommandResult::not_run(spec.rendered(), e.to_string())
            }
        };

        let healthy = interpret(&result);

        if healthy {
            info!(node = %node, "GPU works on node");
        } else {
            warn!(
                node = %node,
                exit_status = result.exit_status(),
                remote_status = ?remote_exit_status(result.stdout()),
                "GPU check failed on node"
            );
            self.mailer
                .send_logged(&probe_failure_subject(node), result.report())
                .await;
        }

        ProbeOutcome {
            node: node.to_string(),
            healthy,
            result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{MockResponse, MockRunner};
    use crate::metrics::MetricsRegistry;
    use crate::notify::{EmailSettings, RecordingNotifier};

    fn config() -> ProbeConfig {
        ProbeConfig {
            ssh_user: "checker".to_string(),
            ssh_keyfile: PathBuf::from("/opt/gpu-checker/id_ed25519"),
            ..Default::default()
        }
    }

    fn prober(runner: Arc<MockRunner>, notifier: Arc<RecordingNotifier>) -> GpuProber {
        let mailer = AlertMailer::new(
            notifier,
            EmailSettings {
                to: "ops@example.org".to_string(),
                from: "gpu-checker@example.org".to_string(),
                signature: "-- gpu-checker".to_string(),
            },
            Arc::new(MetricsRegistry::new()),
        );
        GpuProber::new(runner, Arc::new(mailer), config())
    }

    #[test]
    fn test_interpret_verdicts() {
        let healthy = CommandResult::new("ssh", "GPU table\n0\n", "", 0);
        assert!(interpret(&healthy));

        let trailing_blank = CommandResult::new("ssh", "GPU table\n0\n\n  \n", "", 0);
        assert!(interpret(&trailing_blank));

        let remote_failed = CommandResult::new("ssh", "NVIDIA-SMI has failed\n9\n", "", 0);
        assert!(!interpret(&remote_failed));

        let outer_failed = CommandResult::new("ssh", "0\n", "", 255);
        assert!(!interpret(&outer_failed));

        let garbled = CommandResult::new("ssh", "GPU table\nnot a number\n", "", 0);
        assert!(!interpret(&garbled));

        let empty = CommandResult::new("ssh", "", "", 0);
        assert!(!interpret(&empty));
    }

    #[test]
    fn test_remote_exit_status() {
        assert_eq!(remote_exit_status("a\nb\n 12 \n"), Some(12));
        assert_eq!(remote_exit_status("\n\n"), None);
    }

    #[test]
    fn test_command_layout() {
        let prober = prober(Arc::new(MockRunner::new()), Arc::new(RecordingNotifier::new()));
        let spec = prober.command_for("gpu01");

        assert_eq!(spec.program, "ssh");
        assert_eq!(
            spec.args,
            vec![
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "BatchMode=yes",
                "-o",
                "ConnectTimeout=10",
                "-i",
                "/opt/gpu-checker/id_ed25519",
                "-l",
                "checker",
                "--",
                "gpu01",
                "nvidia-smi; echo $?",
            ]
        );
        assert_eq!(spec.timeout, Some(Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_healthy_probe_sends_nothing() {
        let runner = Arc::new(MockRunner::with_responses([MockResponse::ok(
            "+-----------------+\n| NVIDIA-SMI 535  |\n0\n",
        )]));
        let notifier = Arc::new(RecordingNotifier::new());
        let outcome = prober(runner, notifier.clone()).probe("gpu01").await;

        assert!(outcome.healthy);
        assert!(notifier.sent().await.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_node_is_unhealthy() {
        let runner = Arc::new(MockRunner::with_responses([MockResponse::exit(
            255,
            "",
            "ssh: connect to host gpu03 port 22: Connection refused",
        )]));
        let notifier = Arc::new(RecordingNotifier::new());
        let outcome = prober(runner, notifier.clone()).probe("gpu03").await;

        assert!(!outcome.healthy);
        assert_eq!(outcome.node, NodeName::from("gpu03"));
        assert!(outcome.diagnostic_report().contains("exit code:\n255"));

        let sent = notifier.sent().await;
        assert_eq!(sent.len(), 1);
        assert!(sent[0].subject.contains("gpu03"));
        assert!(sent[0].body.contains("Connection refused"));
        assert!(sent[0].body.ends_with("-- gpu-checker"));
    }

    #[tokio::test]
    async fn test_timeout_is_unhealthy() {
        let runner = Arc::new(MockRunner::with_responses([MockResponse::Timeout]));
        let notifier = Arc::new(RecordingNotifier::new());
        let outcome = prober(runner, notifier.clone()).probe("gpu04").await;

        assert!(!outcome.healthy);
        assert_eq!(outcome.result.exit_status(), -1);
        assert!(outcome.result.stderr().contains("timed out"));
        assert_eq!(notifier.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn test_notification_failure_keeps_verdict() {
        let runner = Arc::new(MockRunner::with_responses([MockResponse::ok("9\n")]));
        let notifier = Arc::new(RecordingNotifier::failing());
        let outcome = prober(runner, notifier).probe("gpu05").await;

        assert!(!outcome.healthy);
    }

    #[tokio::test]
    async fn test_disabled_email() {
        let runner = Arc::new(MockRunner::with_responses([MockResponse::exit(255, "", "")]));
        let mailer = Arc::new(AlertMailer::disabled(Arc::new(MetricsRegistry::new())));
        let prober = GpuProber::new(runner, mailer, config());

        assert!(!prober.probe("gpu06").await.healthy);
    }
}
