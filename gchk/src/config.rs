//! Configuration module for GCHK
//!
//! Handles loading, validating and bootstrapping the YAML configuration file.
//! The file holds the SMTP password in clear text, so the template is
//! created readable by the owner only.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::warn;

/// Boolean-like configuration value.
///
/// Accepts true/1/t/y/yes and false/0/f/n/no in any case, as strings or
/// native YAML booleans. Anything else is kept verbatim and rejected by
/// [`Config::validate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoolFlag {
    True,
    False,
    Invalid(String),
}

impl BoolFlag {
    /// Parse a boolean-like string
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "t" | "y" | "yes" => BoolFlag::True,
            "false" | "0" | "f" | "n" | "no" => BoolFlag::False,
            _ => BoolFlag::Invalid(value.to_string()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            BoolFlag::True => Some(true),
            BoolFlag::False => Some(false),
            BoolFlag::Invalid(_) => None,
        }
    }

    /// The value as a bool, or a configuration error naming `key`
    pub fn require(&self, key: &str) -> Result<bool> {
        match self {
            BoolFlag::Invalid(value) => bail!(
                "{}: unrecognized boolean value {:?} (expected true/false, yes/no, t/f, y/n or 1/0)",
                key,
                value
            ),
            flag => Ok(flag == &BoolFlag::True),
        }
    }
}

impl From<bool> for BoolFlag {
    fn from(value: bool) -> Self {
        if value {
            BoolFlag::True
        } else {
            BoolFlag::False
        }
    }
}

impl Serialize for BoolFlag {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            BoolFlag::True => serializer.serialize_str("true"),
            BoolFlag::False => serializer.serialize_str("false"),
            BoolFlag::Invalid(value) => serializer.serialize_str(value),
        }
    }
}

struct BoolFlagVisitor;

impl<'de> Visitor<'de> for BoolFlagVisitor {
    type Value = BoolFlag;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a boolean-like value")
    }

    fn visit_bool<E: de::Error>(self, value: bool) -> std::result::Result<BoolFlag, E> {
        Ok(value.into())
    }

    fn visit_u64<E: de::Error>(self, value: u64) -> std::result::Result<BoolFlag, E> {
        Ok(BoolFlag::parse(&value.to_string()))
    }

    fn visit_i64<E: de::Error>(self, value: i64) -> std::result::Result<BoolFlag, E> {
        Ok(BoolFlag::parse(&value.to_string()))
    }

    fn visit_str<E: de::Error>(self, value: &str) -> std::result::Result<BoolFlag, E> {
        Ok(BoolFlag::parse(value))
    }

    fn visit_unit<E: de::Error>(self) -> std::result::Result<BoolFlag, E> {
        Ok(BoolFlag::Invalid(String::new()))
    }
}

impl<'de> Deserialize<'de> for BoolFlag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(BoolFlagVisitor)
    }
}

/// Which nodes to check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodesConfig {
    /// Comma-separated Slurm node states
    #[serde(default = "default_states_to_check")]
    pub states_to_check: String,

    /// Comma-separated Slurm partitions
    #[serde(default = "default_partitions_to_check")]
    pub partitions_to_check: String,
}

impl Default for NodesConfig {
    fn default() -> Self {
        Self {
            states_to_check: default_states_to_check(),
            partitions_to_check: default_partitions_to_check(),
        }
    }
}

/// Remote login used by the probe
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default)]
    pub user: String,

    /// Path to the private key
    #[serde(default)]
    pub keyfile: String,
}

/// Operator email settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default = "default_false_flag")]
    pub enabled: BoolFlag,

    #[serde(default)]
    pub to: String,

    #[serde(default)]
    pub from: String,

    /// Appended to every email body
    #[serde(default)]
    pub signature: String,
}

impl Default for EmailConfig {
    fn default() -> Self {
        Self {
            enabled: default_false_flag(),
            to: String::new(),
            from: String::new(),
            signature: String::new(),
        }
    }
}

/// Mail relay settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmtpAuthConfig {
    #[serde(default)]
    pub hostname: String,

    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// Login user, no authentication when empty
    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,

    /// Implicit TLS (SMTPS) instead of plain SMTP
    #[serde(default = "default_false_flag")]
    pub is_ssl: BoolFlag,
}

impl Default for SmtpAuthConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            port: default_smtp_port(),
            user: String::new(),
            password: String::new(),
            is_ssl: default_false_flag(),
        }
    }
}

/// When the monitor pauses between probes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Cadence {
    /// Sleep after every probed node
    #[default]
    PerNode,
    /// Sleep once per discovery cycle
    PerCycle,
}

/// Monitor loop settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Pause length
    #[serde(with = "humantime_serde", default = "default_interval")]
    pub interval: Duration,

    #[serde(default)]
    pub cadence: Cadence,

    /// Upper bound on a single probe, timeouts count as unhealthy
    #[serde(with = "humantime_serde", default = "default_probe_timeout")]
    pub probe_timeout: Duration,

    /// ssh connection establishment timeout
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect_timeout: Duration,

    /// Diagnostic command run on each node
    #[serde(default = "default_probe_command")]
    pub probe_command: String,

    /// Reason attached to drained nodes
    #[serde(default = "default_drain_reason")]
    pub drain_reason: String,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: default_interval(),
            cadence: Cadence::default(),
            probe_timeout: default_probe_timeout(),
            connect_timeout: default_connect_timeout(),
            probe_command: default_probe_command(),
            drain_reason: default_drain_reason(),
        }
    }
}

/// Slurm CLI settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlurmConfig {
    #[serde(default = "default_sinfo_path")]
    pub sinfo_path: String,

    #[serde(default = "default_scontrol_path")]
    pub scontrol_path: String,

    /// Upper bound on each Slurm command
    #[serde(with = "humantime_serde", default = "default_slurm_timeout")]
    pub timeout: Duration,
}

impl Default for SlurmConfig {
    fn default() -> Self {
        Self {
            sinfo_path: default_sinfo_path(),
            scontrol_path: default_scontrol_path(),
            timeout: default_slurm_timeout(),
        }
    }
}

/// Metrics export configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics are enabled
    #[serde(default)]
    pub enabled: bool,

    /// Port to expose metrics on
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub nodes: NodesConfig,

    #[serde(default)]
    pub ssh: SshConfig,

    #[serde(default)]
    pub email: EmailConfig,

    #[serde(default)]
    pub smtp_auth: SmtpAuthConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub slurm: SlurmConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Dry run mode - log drains but don't execute them
    #[serde(default)]
    pub dry_run: bool,
}

impl Config {
    /// Load configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("Failed to parse YAML configuration")
    }

    /// Render configuration as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize configuration")
    }

    /// Write the default configuration to `path`, readable by the owner only.
    /// Fails if the file already exists.
    pub fn write_template<P: AsRef<Path>>(path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let yaml = Self::default().to_yaml()?;

        let mut options = OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }

        let mut file = options
            .open(path)
            .with_context(|| format!("Failed to create config file: {:?}", path))?;
        file.write_all(yaml.as_bytes())
            .with_context(|| format!("Failed to write config file: {:?}", path))?;
        Ok(())
    }

    /// States to check, blank items dropped
    pub fn states(&self) -> Vec<String> {
        split_list(&self.nodes.states_to_check)
    }

    /// Partitions to check, blank items dropped
    pub fn partitions(&self) -> Vec<String> {
        split_list(&self.nodes.partitions_to_check)
    }

    pub fn email_enabled(&self) -> Result<bool> {
        self.email.enabled.require("email.enabled")
    }

    pub fn smtp_use_tls(&self) -> Result<bool> {
        self.smtp_auth.is_ssl.require("smtp_auth.is_ssl")
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.states().is_empty() {
            bail!("nodes.states_to_check must list at least one state");
        }
        if self.partitions().is_empty() {
            bail!("nodes.partitions_to_check must list at least one partition");
        }
        if self.ssh.user.trim().is_empty() {
            bail!("ssh.user must be set");
        }
        if self.ssh.keyfile.trim().is_empty() {
            bail!("ssh.keyfile must be set");
        }

        let email_enabled = self.email_enabled()?;
        self.smtp_use_tls()?;

        if email_enabled {
            if self.email.to.trim().is_empty() {
                bail!("email.to must be set when email is enabled");
            }
            if self.email.from.trim().is_empty() {
                bail!("email.from must be set when email is enabled");
            }
            if self.smtp_auth.hostname.trim().is_empty() {
                bail!("smtp_auth.hostname must be set when email is enabled");
            }
            if self.smtp_auth.port == 0 {
                bail!("smtp_auth.port must be > 0 when email is enabled");
            }
        }

        if self.monitor.interval.is_zero() {
            bail!("monitor.interval must be > 0");
        }
        if self.monitor.probe_timeout.is_zero() {
            bail!("monitor.probe_timeout must be > 0");
        }
        if self.monitor.connect_timeout.is_zero() {
            bail!("monitor.connect_timeout must be > 0");
        }
        if self.monitor.probe_command.trim().is_empty() {
            bail!("monitor.probe_command must be set");
        }
        if self.slurm.timeout.is_zero() {
            bail!("slurm.timeout must be > 0");
        }
        if self.metrics.enabled && self.metrics.port == 0 {
            bail!("metrics.port must be > 0 when metrics are enabled");
        }
        Ok(())
    }
}

/// Warn when the config file (which holds a password) is readable by others
pub fn warn_if_exposed(path: &Path) {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        if let Ok(metadata) = std::fs::metadata(path) {
            let mode = metadata.permissions().mode();
            if mode & 0o077 != 0 {
                warn!(
                    path = ?path,
                    mode = %format!("{:o}", mode & 0o777),
                    "Config file is accessible by other users, consider chmod 600"
                );
            }
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

// Default value functions
fn default_states_to_check() -> String {
    "mixed,idle".to_string()
}

fn default_partitions_to_check() -> String {
    "gpu".to_string()
}

fn default_false_flag() -> BoolFlag {
    BoolFlag::False
}

fn default_smtp_port() -> u16 {
    25
}

fn default_interval() -> Duration {
    Duration::from_secs(60)
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_probe_command() -> String {
    "nvidia-smi".to_string()
}

fn default_drain_reason() -> String {
    "nvidia-smi failure".to_string()
}

fn default_sinfo_path() -> String {
    "sinfo".to_string()
}

fn default_scontrol_path() -> String {
    "scontrol".to_string()
}

fn default_slurm_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_metrics_port() -> u16 {
    9101
}
