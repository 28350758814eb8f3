//! `run` command implementation.

use anyhow::{Context, Result};
use std::time::Duration;
use tracing::info;

use crate::bridge::{Bridge, BridgeConfig};
use crate::cli::{Cli, RunArgs};
use crate::error::CliError;

/// Execute the `run` command
pub async fn run_bridge(cli: &Cli, args: &RunArgs) -> Result<()> {
    // Validate config path
    if !args.config.exists() {
        return Err(CliError::config_not_found(args.config.display().to_string()).into());
    }

    // Load and parse configuration
    let timing = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    crate::init_observability(cli, &timing.observability, args.metrics_port)?;

    info!(
        config = %args.config.display(),
        devices = timing.devices.len(),
        frequencies = timing.frequencies.len(),
        sectors = timing.sectors.len(),
        sinks = timing.sinks.len(),
        "Configuration loaded"
    );

    // Dry run - just validate and exit
    if args.dry_run {
        info!("Dry run mode - configuration is valid, exiting");
        print_config_summary(&timing);
        return Ok(());
    }

    let bridge_config = BridgeConfig {
        timing,
        duration: (args.duration > 0).then(|| Duration::from_secs(args.duration)),
        connect_wait: Duration::from_millis(args.connect_wait_ms),
        tick: Duration::from_millis(args.tick_ms.max(1)),
        status_interval: (args.status_interval > 0)
            .then(|| Duration::from_secs(args.status_interval)),
    };

    info!("Starting bridge...");
    let stats = Bridge::new(bridge_config)
        .run(shutdown_signal())
        .await
        .context("Bridge execution failed")?;

    info!(
        detections = stats.detections,
        duration_secs = stats.duration.as_secs_f64(),
        rate_per_min = format!("{:.2}", stats.rate_per_minute()),
        "Bridge completed"
    );
    stats.print_summary();

    info!("Timing Bridge finished");
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM.
///
/// A handler that cannot be installed never resolves; the run then ends
/// on its duration only.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Print configuration summary for dry-run mode
fn print_config_summary(timing: &contracts::TimingConfig) {
    println!("\n=== Configuration Summary ===\n");
    println!("Devices ({}):", timing.devices.len());
    for device in &timing.devices {
        println!(
            "  - {} ({}, {:?})",
            device.id,
            device.settings.family(),
            device.role
        );
    }

    if !timing.frequencies.is_empty() {
        println!("\nFrequencies ({}):", timing.frequencies.len());
        for (channel, frequency) in timing.frequencies.iter().enumerate() {
            println!("  [{channel}] {frequency}");
        }
    }

    if !timing.sinks.is_empty() {
        println!("\nSinks ({}):", timing.sinks.len());
        for sink in &timing.sinks {
            println!("  - {} ({:?})", sink.name, sink.sink_type);
        }
    }

    println!();
}
