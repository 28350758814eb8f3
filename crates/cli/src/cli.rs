//! CLI argument definitions using clap.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Timing Bridge - connects lap timing hardware to detection sinks
#[derive(Parser, Debug)]
#[command(
    name = "timing-bridge",
    author,
    version,
    about = "Lap timing device bridge",
    long_about = "Connects to the configured lap timing devices, synchronises their clocks,\n\
                  turns raw crossings into timestamped detections, and dispatches them to \n\
                  the configured sinks."
)]
pub struct Cli {
    /// Increase logging verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true, env = "TIMING_BRIDGE_VERBOSE")]
    pub verbose: u8,

    /// Suppress all output except warnings and errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Log output format
    #[arg(
        long,
        value_enum,
        default_value = "pretty",
        global = true,
        env = "TIMING_BRIDGE_LOG_FORMAT"
    )]
    pub log_format: LogFormat,

    /// Default log level, overrides the configuration file
    #[arg(long, global = true, env = "TIMING_BRIDGE_LOG_LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Connect the devices and stream detections to the sinks
    Run(RunArgs),

    /// Validate configuration file without connecting
    Validate(ValidateArgs),

    /// Display configuration information
    Info(InfoArgs),
}

/// Arguments for the `run` command
#[derive(Parser, Debug, Clone)]
pub struct RunArgs {
    /// Path to configuration file (TOML or JSON)
    #[arg(
        short,
        long,
        default_value = "timing.toml",
        env = "TIMING_BRIDGE_CONFIG"
    )]
    pub config: PathBuf,

    /// Metrics server port, overrides the configuration file (0 = disabled)
    #[arg(long, env = "TIMING_BRIDGE_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Stop detection after this many seconds (0 = run until Ctrl+C)
    #[arg(long, default_value = "0", env = "TIMING_BRIDGE_DURATION")]
    pub duration: u64,

    /// How long to wait for device links before starting, in milliseconds
    #[arg(long, default_value = "5000", env = "TIMING_BRIDGE_CONNECT_WAIT_MS")]
    pub connect_wait_ms: u64,

    /// Heartbeat-timeout sweep interval in milliseconds
    #[arg(long, default_value = "500", env = "TIMING_BRIDGE_TICK_MS")]
    pub tick_ms: u64,

    /// Log a status line per device every N seconds (0 = disabled)
    #[arg(long, default_value = "30", env = "TIMING_BRIDGE_STATUS_INTERVAL")]
    pub status_interval: u64,

    /// Validate configuration and exit without connecting
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for the `validate` command
#[derive(Parser, Debug)]
pub struct ValidateArgs {
    /// Path to configuration file to validate
    #[arg(short, long, default_value = "timing.toml")]
    pub config: PathBuf,

    /// Output validation result as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `info` command
#[derive(Parser, Debug)]
pub struct InfoArgs {
    /// Path to configuration file
    #[arg(short, long, default_value = "timing.toml")]
    pub config: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Show sink configuration
    #[arg(long)]
    pub sinks: bool,
}

/// Log output format
#[derive(ValueEnum, Clone, Copy, Debug, Default)]
pub enum LogFormat {
    /// JSON structured logging
    Json,
    /// Human-readable pretty format
    #[default]
    Pretty,
    /// Compact single-line format
    Compact,
}

impl From<LogFormat> for observability::LogFormat {
    fn from(format: LogFormat) -> Self {
        match format {
            LogFormat::Json => observability::LogFormat::Json,
            LogFormat::Pretty => observability::LogFormat::Pretty,
            LogFormat::Compact => observability::LogFormat::Compact,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_defaults() {
        let cli = Cli::try_parse_from(["timing-bridge", "run"]).unwrap();
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.config, PathBuf::from("timing.toml"));
        assert_eq!(args.metrics_port, None);
        assert_eq!(args.tick_ms, 500);
        assert!(!args.dry_run);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "timing-bridge",
            "validate",
            "-c",
            "race.json",
            "-vv",
            "--log-format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert!(matches!(cli.log_format, LogFormat::Json));
        assert!(matches!(cli.command, Commands::Validate(_)));
    }

    #[test]
    fn test_quiet_conflicts_with_verbose() {
        assert!(Cli::try_parse_from(["timing-bridge", "-q", "-v", "info"]).is_err());
    }
}
