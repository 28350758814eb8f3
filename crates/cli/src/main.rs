//! # Timing Bridge CLI
//!
//! 命令行接口入口点。
//!
//! 提供：
//! - 配置加载与验证
//! - 设备连接与检测生命周期管理
//! - 优雅关闭处理

mod bridge;
mod cli;
mod commands;
mod error;

use anyhow::Result;
use clap::Parser;
use contracts::ObservabilitySettings;
use observability::ObservabilityConfig;
use tracing::info;

use cli::{Cli, Commands};
use commands::{run_bridge, run_info, run_validate};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    // `run` initialises logging itself, once the configuration is loaded
    if !matches!(cli.command, Commands::Run(_)) {
        init_observability(&cli, &ObservabilitySettings::default(), None)?;
    }

    let result = match &cli.command {
        Commands::Run(args) => run_bridge(&cli, args).await,
        Commands::Validate(args) => run_validate(args),
        Commands::Info(args) => run_info(args),
    };

    if let Err(ref e) = result {
        tracing::error!(error = %e, "Command failed");
    }

    result
}

/// Initialize tracing (and the Prometheus exporter when a port is set).
///
/// CLI flags win over the configuration file; `RUST_LOG` wins over both.
pub(crate) fn init_observability(
    cli: &Cli,
    settings: &ObservabilitySettings,
    metrics_port: Option<u16>,
) -> Result<()> {
    let mut config = ObservabilityConfig::from_settings(settings);
    config.log_format = cli.log_format.into();
    config.default_log_level = log_level(cli, settings);
    if let Some(port) = metrics_port {
        config.metrics_port = (port != 0).then_some(port);
    }

    observability::init_with_config(config)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "Timing Bridge CLI starting"
    );
    Ok(())
}

fn log_level(cli: &Cli, settings: &ObservabilitySettings) -> String {
    if cli.quiet {
        return "warn".to_string();
    }
    match cli.verbose {
        0 => cli
            .log_level
            .clone()
            .unwrap_or_else(|| settings.log_level.clone()),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}
