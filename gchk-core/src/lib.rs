//! GCHK Core Library
//!
//! Core logic for GPU Checker: command execution, GPU probing over ssh,
//! node remediation, operator notification and the monitor loop.
//! Scheduler-specific code lives behind the [`ClusterScheduler`] trait.

pub mod cluster;
pub mod executor;
pub mod metrics;
pub mod monitor;
pub mod notify;
pub mod probe;
pub mod remediation;

// Re-export common types
pub use cluster::{ClusterScheduler, DiscoveryError, NodeName};
pub use executor::{CommandResult, CommandRunner, CommandSpec, ExecError, SystemRunner};
pub use monitor::{Cadence, Monitor, MonitorConfig, NodeOutcome};
pub use notify::{AlertMailer, EmailSettings, Notifier, NotifyError, SmtpConfig, SmtpNotifier};
pub use probe::{GpuProber, ProbeConfig, ProbeOutcome};
pub use remediation::{DrainOutcome, Remediator};
