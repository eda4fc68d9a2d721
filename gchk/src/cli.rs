//! CLI argument parsing for GCHK

use std::path::PathBuf;

use clap::Parser;

/// Watches Slurm GPU nodes over ssh and drains the ones whose GPUs stop answering
#[derive(Debug, Parser)]
#[command(name = "gchk")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// YAML config; a 0600 template is written here on first run
    #[arg(short, long, default_value = "/opt/gpu-checker/config.yaml", env = "GCHK_CONFIG")]
    pub config: PathBuf,

    /// Default log filter, RUST_LOG takes precedence
    #[arg(long, default_value = "info", env = "GCHK_LOG_LEVEL")]
    pub log_level: String,

    /// One JSON object per log line
    #[arg(long, default_value = "false", env = "GCHK_LOG_JSON")]
    pub log_json: bool,

    /// Probe and email as usual, log drains instead of running scontrol
    #[arg(long, default_value = "false")]
    pub dry_run: bool,

    /// Check every matching node once, no sleeping, then exit
    #[arg(long)]
    pub once: bool,
}

impl Cli {
    pub fn parse_args() -> Self {
        Self::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["gchk"]).unwrap();
        assert_eq!(cli.config.to_str().unwrap(), "/opt/gpu-checker/config.yaml");
        assert_eq!(cli.log_level, "info");
        assert!(!cli.log_json);
        assert!(!cli.dry_run);
        assert!(!cli.once);
    }

    #[test]
    fn test_cli_custom_config() {
        let cli = Cli::try_parse_from(["gchk", "-c", "/etc/gchk.yaml"]).unwrap();
        assert_eq!(cli.config.to_str().unwrap(), "/etc/gchk.yaml");
    }

    #[test]
    fn test_help_mentions_template() {
        use clap::CommandFactory;

        let help = Cli::command().render_help().to_string();
        assert!(help.contains("0600 template"));
        assert!(help.contains("instead of running scontrol"));
    }

    #[test]
    fn test_cli_once_dry_run() {
        let cli = Cli::try_parse_from(["gchk", "--once", "--dry-run"]).unwrap();
        assert!(cli.once);
        assert!(cli.dry_run);
    }
}
