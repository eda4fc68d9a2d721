//! GPU Checker (GCHK)
//!
//! Slurm GPU node health monitor. Periodically lists GPU nodes, runs a
//! diagnostic on each over ssh, drains nodes whose diagnostic fails and
//! emails the operator about every failure and drain.

mod cli;
mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::Cli;
use config::Config;
use gchk_core::executor::{CommandRunner, SystemRunner};
use gchk_core::metrics::MetricsRegistry;
use gchk_core::monitor::{Cadence as CoreCadence, Monitor, MonitorConfig as CoreMonitorConfig};
use gchk_core::notify::{AlertMailer, EmailSettings, SmtpConfig, SmtpNotifier};
use gchk_core::probe::{GpuProber, ProbeConfig};
use gchk_core::remediation::Remediator;
use gchk_slurm::{SlurmClient, SlurmConfig as CoreSlurmConfig};

/// SMTP connection timeout
const SMTP_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialize the tracing/logging subsystem
fn init_logging(log_level: &str, json_format: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if json_format {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}

fn to_core_cadence(cadence: config::Cadence) -> CoreCadence {
    match cadence {
        config::Cadence::PerNode => CoreCadence::PerNode,
        config::Cadence::PerCycle => CoreCadence::PerCycle,
    }
}

fn to_core_monitor_config(config: &Config) -> CoreMonitorConfig {
    CoreMonitorConfig {
        states: config.states(),
        partitions: config.partitions(),
        interval: config.monitor.interval,
        cadence: to_core_cadence(config.monitor.cadence),
        drain_reason: config.monitor.drain_reason.clone(),
    }
}

fn to_probe_config(config: &Config) -> ProbeConfig {
    ProbeConfig {
        ssh_user: config.ssh.user.clone(),
        ssh_keyfile: PathBuf::from(&config.ssh.keyfile),
        command: config.monitor.probe_command.clone(),
        connect_timeout: config.monitor.connect_timeout,
        timeout: config.monitor.probe_timeout,
    }
}

fn to_slurm_config(config: &config::SlurmConfig) -> CoreSlurmConfig {
    CoreSlurmConfig {
        sinfo_path: config.sinfo_path.clone(),
        scontrol_path: config.scontrol_path.clone(),
        timeout: config.timeout,
    }
}

/// Build the mailer; a disabled mailer when email is switched off
fn build_mailer(config: &Config, metrics: Arc<MetricsRegistry>) -> Result<AlertMailer> {
    if !config.email_enabled()? {
        info!("Email notifications disabled");
        return Ok(AlertMailer::disabled(metrics));
    }

    let smtp = SmtpConfig {
        hostname: config.smtp_auth.hostname.clone(),
        port: config.smtp_auth.port,
        user: config.smtp_auth.user.clone(),
        password: config.smtp_auth.password.clone(),
        use_tls: config.smtp_use_tls()?,
        timeout: SMTP_TIMEOUT,
    };
    info!(
        relay = %smtp.hostname,
        port = smtp.port,
        tls = smtp.use_tls,
        to = %config.email.to,
        "Email notifications enabled"
    );

    let settings = EmailSettings {
        to: config.email.to.clone(),
        from: config.email.from.clone(),
        signature: config.email.signature.clone(),
    };
    Ok(AlertMailer::new(
        Arc::new(SmtpNotifier::new(smtp)),
        settings,
        metrics,
    ))
}

/// Assemble the monitor from its parts
fn build_monitor(config: &Config, metrics: Arc<MetricsRegistry>) -> Result<Monitor> {
    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner::new());
    let mailer = Arc::new(build_mailer(config, metrics.clone())?);

    let slurm = Arc::new(SlurmClient::new(
        runner.clone(),
        to_slurm_config(&config.slurm),
    ));

    let prober = GpuProber::new(runner, mailer.clone(), to_probe_config(config));
    let remediator = Remediator::new(slurm.clone(), mailer, config.dry_run);

    Ok(Monitor::new(
        slurm,
        prober,
        remediator,
        metrics,
        to_core_monitor_config(config),
    ))
}

/// Run the main monitor loop
async fn run(config: Config, shutdown_rx: watch::Receiver<bool>) -> Result<()> {
    let metrics = Arc::new(MetricsRegistry::new());
    let monitor = build_monitor(&config, metrics)?;

    // Start metrics server if enabled
    if config.metrics.enabled {
        let port = config.metrics.port;
        tokio::spawn(async move {
            if let Err(e) = start_metrics_server(port).await {
                error!(error = %e, "Metrics server failed");
            }
        });
    }

    monitor
        .run(shutdown_rx)
        .await
        .context("Node discovery failed, stopping")?;

    info!("GCHK shutdown complete");
    Ok(())
}

/// Start the Prometheus metrics HTTP server
async fn start_metrics_server(port: u16) -> Result<()> {
    use std::net::SocketAddr;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!(port = port, "Metrics server listening");

    loop {
        let (mut socket, _) = listener.accept().await?;

        tokio::spawn(async move {
            let mut buf = [0; 1024];
            let _ = socket.read(&mut buf).await;

            let body = prometheus::TextEncoder::new()
                .encode_to_string(&prometheus::gather())
                .unwrap_or_default();

            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: text/plain; version=0.0.4\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );

            let _ = socket.write_all(response.as_bytes()).await;
        });
    }
}

/// Flip the shutdown channel on Ctrl+C or SIGTERM
fn spawn_signal_handler(shutdown_tx: watch::Sender<bool>) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(e) = signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for Ctrl+C");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    error!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received Ctrl+C, initiating shutdown");
            }
            _ = terminate => {
                info!("Received SIGTERM, initiating shutdown");
            }
        }

        let _ = shutdown_tx.send(true);
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(&cli.log_level, cli.log_json);

    info!(version = env!("CARGO_PKG_VERSION"), "GCHK starting");

    // First run: leave a template behind for the operator
    if !cli.config.exists() {
        Config::write_template(&cli.config)
            .with_context(|| format!("Failed to write config template to {:?}", cli.config))?;
        warn!(path = ?cli.config, "Config file not found, wrote a template");
        bail!(
            "No configuration found. A template was written to {:?}; fill it in and restart",
            cli.config
        );
    }

    config::warn_if_exposed(&cli.config);

    let mut config = Config::from_file(&cli.config)
        .with_context(|| format!("Failed to load config from {:?}", cli.config))?;

    // Apply CLI overrides
    if cli.dry_run {
        config.dry_run = true;
    }

    // Validate configuration
    config.validate().context("Invalid configuration")?;

    info!(dry_run = config.dry_run, "Configuration loaded");

    // Run single pass if --once flag is set
    if cli.once {
        info!("Running single discovery cycle (--once mode)");
        let monitor = build_monitor(&config, Arc::new(MetricsRegistry::new()))?;

        let outcomes = monitor
            .run_once()
            .await
            .context("Node discovery failed")?;
        for (node, outcome) in &outcomes {
            info!(node = %node, outcome = %outcome, "Node checked");
        }
        info!(nodes = outcomes.len(), "Single cycle complete");

        return Ok(());
    }

    // Setup shutdown signal handler
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    spawn_signal_handler(shutdown_tx);

    // Run main loop
    run(config, shutdown_rx).await
}
