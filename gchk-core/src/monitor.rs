//! Monitor Loop
//!
//! DISCOVERING → PROBING(node) → [healthy: next node | unhealthy: REMEDIATING
//! → next node] → SLEEPING → DISCOVERING
//!
//! Runs until shutdown. A discovery failure ends the loop; anything that goes
//! wrong while handling a single node is logged and the loop moves on.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::cluster::{ClusterScheduler, DiscoveryError, NodeName};
use crate::metrics::MetricsRegistry;
use crate::probe::GpuProber;
use crate::remediation::{Remediator, DEFAULT_DRAIN_REASON};

/// When the loop pauses between probes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Cadence {
    /// Sleep after every probed node
    #[default]
    PerNode,
    /// Probe all nodes back to back, sleep once per discovery cycle
    PerCycle,
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::PerNode => write!(f, "per_node"),
            Cadence::PerCycle => write!(f, "per_cycle"),
        }
    }
}

/// Monitor loop settings
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Scheduler states to check (e.g. mixed, idle)
    pub states: Vec<String>,
    /// Partitions to check
    pub partitions: Vec<String>,
    /// Pause length
    pub interval: Duration,
    pub cadence: Cadence,
    /// Reason attached to drained nodes
    pub drain_reason: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            states: vec!["mixed".to_string(), "idle".to_string()],
            partitions: vec!["gpu".to_string()],
            interval: Duration::from_secs(60),
            cadence: Cadence::default(),
            drain_reason: DEFAULT_DRAIN_REASON.to_string(),
        }
    }
}

/// What happened to one node in one iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeOutcome {
    /// Probe passed
    Healthy,
    /// Probe failed and the scheduler accepted the drain
    Drained,
    /// Probe failed and the drain was rejected
    DrainFailed,
    /// Probe failed, drain only logged (dry run)
    DrainSkipped,
    /// Handling the node failed unexpectedly
    Aborted,
}

impl fmt::Display for NodeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeOutcome::Healthy => write!(f, "HEALTHY"),
            NodeOutcome::Drained => write!(f, "DRAINED"),
            NodeOutcome::DrainFailed => write!(f, "DRAIN_FAILED"),
            NodeOutcome::DrainSkipped => write!(f, "DRAIN_SKIPPED"),
            NodeOutcome::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// Periodic discover → probe → remediate loop
pub struct Monitor {
    scheduler: Arc<dyn ClusterScheduler>,
    prober: GpuProber,
    remediator: Remediator,
    metrics: Arc<MetricsRegistry>,
    config: MonitorConfig,
}

impl Monitor {
    pub fn new(
        scheduler: Arc<dyn ClusterScheduler>,
        prober: GpuProber,
        remediator: Remediator,
        metrics: Arc<MetricsRegistry>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            scheduler,
            prober,
            remediator,
            metrics,
            config,
        }
    }

    /// Run until `shutdown` flips to true or discovery fails
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), DiscoveryError> {
        info!(
            states = ?self.config.states,
            partitions = ?self.config.partitions,
            interval = %humantime::format_duration(self.config.interval),
            cadence = %self.config.cadence,
            "Starting monitor loop"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let nodes = self.discover().await?;

            if nodes.is_empty() {
                // Nothing matched; wait before asking again
                if self.sleep(&mut shutdown).await {
                    break;
                }
                continue;
            }

            for node in &nodes {
                self.check_node_isolated(node).await;

                if self.config.cadence == Cadence::PerNode && self.sleep(&mut shutdown).await {
                    info!("Shutdown signal received, stopping monitor");
                    return Ok(());
                }
            }

            if self.config.cadence == Cadence::PerCycle && self.sleep(&mut shutdown).await {
                break;
            }
        }

        info!("Shutdown signal received, stopping monitor");
        Ok(())
    }

    /// Run a single discovery cycle without pausing
    pub async fn run_once(&self) -> Result<Vec<(NodeName, NodeOutcome)>, DiscoveryError> {
        info!("Running single monitor pass");

        let nodes = self.discover().await?;
        let mut outcomes = Vec::with_capacity(nodes.len());

        for node in nodes {
            let outcome = self.check_node_isolated(&node).await;
            outcomes.push((node, outcome));
        }

        Ok(outcomes)
    }

    /// Probe one node and drain it if the probe fails
    pub async fn check_node(&self, node: &str) -> NodeOutcome {
        let start = Instant::now();
        let probe = self.prober.probe(node).await;
        self.metrics
            .observe_probe(probe.healthy, start.elapsed().as_secs_f64());

        if probe.healthy {
            return NodeOutcome::Healthy;
        }

        let drain = self.remediator.drain(node, &self.config.drain_reason).await;

        let (outcome, label) = match (drain.executed, drain.accepted) {
            (false, _) => (NodeOutcome::DrainSkipped, "dry_run"),
            (true, true) => (NodeOutcome::Drained, "accepted"),
            (true, false) => (NodeOutcome::DrainFailed, "rejected"),
        };
        self.metrics.inc_drain(label);

        outcome
    }

    /// [`Self::check_node`] behind a failure boundary, so one bad node
    /// cannot stop the checks of the others
    async fn check_node_isolated(&self, node: &str) -> NodeOutcome {
        match AssertUnwindSafe(self.check_node(node)).catch_unwind().await {
            Ok(outcome) => {
                debug!(node = %node, outcome = %outcome, "Node check complete");
                outcome
            }
            Err(panic) => {
                error!(
                    node = %node,
                    error = %panic_message(panic.as_ref()),
                    "Node check aborted, continuing with next node"
                );
                self.metrics.inc_node_failure(node);
                NodeOutcome::Aborted
            }
        }
    }

    async fn discover(&self) -> Result<Vec<NodeName>, DiscoveryError> {
        let nodes = match self
            .scheduler
            .find_nodes(&self.config.states, &self.config.partitions)
            .await
        {
            Ok(nodes) => nodes,
            Err(e) => {
                error!(error = %e, "Node discovery failed");
                return Err(e);
            }
        };

        self.metrics.set_nodes_discovered(nodes.len() as i64);

        if nodes.is_empty() {
            warn!(
                states = ?self.config.states,
                partitions = ?self.config.partitions,
                "No nodes found"
            );
        } else {
            info!(count = nodes.len(), "Discovered nodes");
        }

        Ok(nodes)
    }

    /// Wait one interval. Returns true if shutdown was requested.
    async fn sleep(&self, shutdown: &mut watch::Receiver<bool>) -> bool {
        let deadline = tokio::time::sleep(self.config.interval);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                _ = &mut deadline => return *shutdown.borrow(),
                changed = shutdown.changed() => match changed {
                    Ok(()) if *shutdown.borrow() => return true,
                    Ok(()) => continue,
                    Err(_) => {
                        // Sender gone, nobody can ask us to stop any more
                        deadline.as_mut().await;
                        return false;
                    }
                },
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{CommandResult, MockResponse, MockRunner};
    use crate::notify::{AlertMailer, EmailSettings, RecordingNotifier};
    use crate::probe::ProbeConfig;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::Mutex;

    /// Scheduler with scripted discovery results
    struct FakeScheduler {
        discoveries: Mutex<VecDeque<Result<Vec<NodeName>, DiscoveryError>>>,
        drained: Mutex<Vec<String>>,
        find_calls: AtomicU32,
        find_times: Mutex<Vec<Instant>>,
    }

    impl FakeScheduler {
        fn new(discoveries: Vec<Result<Vec<NodeName>, DiscoveryError>>) -> Self {
            Self {
                discoveries: Mutex::new(discoveries.into()),
                drained: Mutex::new(Vec::new()),
                find_calls: AtomicU32::new(0),
                find_times: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ClusterScheduler for FakeScheduler {
        async fn find_nodes(
            &self,
            _states: &[String],
            _partitions: &[String],
        ) -> Result<Vec<NodeName>, DiscoveryError> {
            self.find_calls.fetch_add(1, Ordering::SeqCst);
            self.find_times.lock().await.push(Instant::now());
            self.discoveries
                .lock()
                .await
                .pop_front()
                .unwrap_or_else(|| Ok(Vec::new()))
        }

        async fn drain_node(&self, node: &str, _reason: &str) -> CommandResult {
            if node == "bad" {
                panic!("scheduler client blew up");
            }
            self.drained.lock().await.push(node.to_string());
            CommandResult::new(format!("scontrol update nodename={}", node), "", "", 0)
        }
    }

    fn nodes(names: &[&str]) -> Vec<NodeName> {
        names.iter().map(|n| n.to_string()).collect()
    }

    fn query_failure() -> DiscoveryError {
        DiscoveryError::QueryFailed(CommandResult::new(
            "sinfo",
            "",
            "slurm_load_partitions: Unable to contact slurm controller",
            1,
        ))
    }

    fn monitor(
        scheduler: Arc<FakeScheduler>,
        runner: Arc<MockRunner>,
        notifier: Arc<RecordingNotifier>,
        cadence: Cadence,
    ) -> Monitor {
        monitor_with_interval(scheduler, runner, notifier, cadence, Duration::from_millis(1))
    }

    fn monitor_with_interval(
        scheduler: Arc<FakeScheduler>,
        runner: Arc<MockRunner>,
        notifier: Arc<RecordingNotifier>,
        cadence: Cadence,
        interval: Duration,
    ) -> Monitor {
        let metrics = Arc::new(MetricsRegistry::new());
        let mailer = Arc::new(AlertMailer::new(
            notifier,
            EmailSettings {
                to: "ops@example.org".to_string(),
                from: "gpu-checker@example.org".to_string(),
                signature: String::new(),
            },
            metrics.clone(),
        ));
        let prober = GpuProber::new(runner, mailer.clone(), ProbeConfig::default());
        let remediator = Remediator::new(scheduler.clone(), mailer, false);

        Monitor::new(
            scheduler,
            prober,
            remediator,
            metrics,
            MonitorConfig {
                interval,
                cadence,
                ..Default::default()
            },
        )
    }

    #[tokio::test]
    async fn test_run_once_drains_failed_node() {
        let scheduler = Arc::new(FakeScheduler::new(vec![Ok(nodes(&[
            "gpu01", "gpu02", "gpu03",
        ]))]));
        let runner = Arc::new(MockRunner::with_responses([
            MockResponse::ok("0\n"),
            MockResponse::exit(255, "", "Connection timed out"),
            MockResponse::ok("0\n"),
        ]));
        let notifier = Arc::new(RecordingNotifier::new());
        let monitor = monitor(scheduler.clone(), runner, notifier.clone(), Cadence::PerNode);

        let outcomes = monitor.run_once().await.unwrap();

        assert_eq!(
            outcomes,
            vec![
                ("gpu01".to_string(), NodeOutcome::Healthy),
                ("gpu02".to_string(), NodeOutcome::Drained),
                ("gpu03".to_string(), NodeOutcome::Healthy),
            ]
        );
        assert_eq!(*scheduler.drained.lock().await, vec!["gpu02".to_string()]);

        let subjects: Vec<String> = notifier
            .sent()
            .await
            .into_iter()
            .map(|n| n.subject)
            .collect();
        assert_eq!(
            subjects,
            vec![
                "gpu-checker has detected an error on node gpu02".to_string(),
                "gpu-checker has drained node gpu02".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_failing_node_does_not_stop_cycle() {
        let scheduler = Arc::new(FakeScheduler::new(vec![Ok(nodes(&["bad", "gpu02"]))]));
        let runner = Arc::new(MockRunner::with_responses([
            MockResponse::exit(255, "", ""),
            MockResponse::exit(255, "", ""),
        ]));
        let notifier = Arc::new(RecordingNotifier::new());
        let monitor = monitor(scheduler.clone(), runner, notifier, Cadence::PerCycle);

        let outcomes = monitor.run_once().await.unwrap();

        assert_eq!(outcomes[0].1, NodeOutcome::Aborted);
        assert_eq!(outcomes[1].1, NodeOutcome::Drained);
    }

    #[tokio::test]
    async fn test_discovery_failure_ends_run() {
        let scheduler = Arc::new(FakeScheduler::new(vec![
            Ok(nodes(&["gpu01", "gpu02"])),
            Err(query_failure()),
        ]));
        let runner = Arc::new(MockRunner::with_responses([
            MockResponse::ok("0\n"),
            MockResponse::ok("0\n"),
        ]));
        let notifier = Arc::new(RecordingNotifier::new());
        let monitor = monitor(scheduler.clone(), runner.clone(), notifier, Cadence::PerNode);

        let (_tx, rx) = watch::channel(false);
        let err = monitor.run(rx).await.unwrap_err();

        assert!(matches!(err, DiscoveryError::QueryFailed(_)));
        assert_eq!(scheduler.find_calls.load(Ordering::SeqCst), 2);
        assert_eq!(runner.calls().await.len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_stops_run() {
        let scheduler = Arc::new(FakeScheduler::new(Vec::new()));
        let runner = Arc::new(MockRunner::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let monitor = Arc::new(monitor(scheduler.clone(), runner, notifier, Cadence::PerCycle));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn({
            let monitor = monitor.clone();
            async move { monitor.run(rx).await }
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("monitor did not stop")
            .unwrap();
        assert!(result.is_ok());
        assert!(scheduler.find_calls.load(Ordering::SeqCst) >= 1);
    }

    /// Run three healthy nodes, then fail discovery; returns the time `run` took
    async fn timed_cycle(cadence: Cadence, interval: Duration) -> Duration {
        let scheduler = Arc::new(FakeScheduler::new(vec![
            Ok(nodes(&["gpu01", "gpu02", "gpu03"])),
            Err(query_failure()),
        ]));
        let runner = Arc::new(MockRunner::with_responses([
            MockResponse::ok("0\n"),
            MockResponse::ok("0\n"),
            MockResponse::ok("0\n"),
        ]));
        let notifier = Arc::new(RecordingNotifier::new());
        let monitor = monitor_with_interval(scheduler, runner, notifier, cadence, interval);

        let (_tx, rx) = watch::channel(false);
        let start = Instant::now();
        assert!(monitor.run(rx).await.is_err());
        start.elapsed()
    }

    #[tokio::test]
    async fn test_per_node_cadence_sleeps_after_every_node() {
        let interval = Duration::from_millis(100);
        let elapsed = timed_cycle(Cadence::PerNode, interval).await;

        assert!(elapsed >= interval * 3, "elapsed {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_per_cycle_cadence_sleeps_once() {
        let interval = Duration::from_millis(100);
        let elapsed = timed_cycle(Cadence::PerCycle, interval).await;

        assert!(elapsed >= interval, "elapsed {:?}", elapsed);
        assert!(elapsed < interval * 3, "elapsed {:?}", elapsed);
    }

    #[tokio::test]
    async fn test_empty_discovery_waits_before_retrying() {
        let interval = Duration::from_millis(100);
        let scheduler = Arc::new(FakeScheduler::new(vec![Ok(Vec::new()), Err(query_failure())]));
        let runner = Arc::new(MockRunner::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let monitor = monitor_with_interval(
            scheduler.clone(),
            runner.clone(),
            notifier,
            Cadence::PerNode,
            interval,
        );

        let (_tx, rx) = watch::channel(false);
        assert!(monitor.run(rx).await.is_err());

        let times = scheduler.find_times.lock().await.clone();
        assert_eq!(times.len(), 2);
        assert!(times[1] - times[0] >= interval);
        assert!(runner.calls().await.is_empty());
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(boxed.as_ref()), "static message");

        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned message"));
        assert_eq!(panic_message(boxed.as_ref()), "owned message");
    }
}
