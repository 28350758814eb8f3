//! `info` command implementation.

use std::collections::HashMap;

use anyhow::{Context, Result};
use contracts::{TimingConfig, TimingSystemSettings};
use serde::Serialize;
use tracing::info;

use crate::cli::InfoArgs;

/// Configuration info for JSON output
#[derive(Serialize)]
struct ConfigInfo {
    version: String,
    devices: Vec<DeviceInfo>,
    frequencies: Vec<FrequencyInfo>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sectors_m: Vec<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    sinks: Vec<SinkInfo>,
}

#[derive(Serialize)]
struct DeviceInfo {
    id: String,
    family: String,
    role: String,
    sector_length_m: f64,
    endpoint: String,
}

#[derive(Serialize)]
struct FrequencyInfo {
    channel: usize,
    frequency_mhz: u32,
    sensitivity: f32,
    #[serde(skip_serializing_if = "String::is_empty")]
    pilot: String,
}

#[derive(Serialize)]
struct SinkInfo {
    name: String,
    sink_type: String,
    queue_capacity: usize,
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    params: HashMap<String, String>,
}

/// Execute the `info` command
pub fn run_info(args: &InfoArgs) -> Result<()> {
    info!(config = %args.config.display(), "Loading configuration info");

    if !args.config.exists() {
        anyhow::bail!("Configuration file not found: {}", args.config.display());
    }

    let timing = config_loader::ConfigLoader::load_from_path(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    if args.json {
        let info = build_config_info(&timing, args);
        let json =
            serde_json::to_string_pretty(&info).context("Failed to serialize config info")?;
        println!("{}", json);
    } else {
        print_config_info(&timing, args);
    }

    Ok(())
}

/// Where a device's input comes from
fn endpoint(settings: &TimingSystemSettings) -> String {
    match settings {
        TimingSystemSettings::Socket(socket) => socket.address(),
        TimingSystemSettings::Simulator(sim) => format!(
            "{} channels, {}ms laps ±{}ms",
            sim.channels, sim.lap_interval_ms, sim.jitter_ms
        ),
        TimingSystemSettings::Video(video) => {
            format!("{} channels @ {}fps", video.channels, video.frame_rate)
        }
        TimingSystemSettings::Manual(manual) => format!("{} channels", manual.channels),
    }
}

fn build_config_info(timing: &TimingConfig, args: &InfoArgs) -> ConfigInfo {
    let devices = timing
        .devices
        .iter()
        .map(|device| DeviceInfo {
            id: device.id.to_string(),
            family: device.settings.family().to_string(),
            role: format!("{:?}", device.role),
            sector_length_m: device.sector_length_m,
            endpoint: endpoint(&device.settings),
        })
        .collect();

    let frequencies = timing
        .frequencies
        .iter()
        .enumerate()
        .map(|(channel, f)| FrequencyInfo {
            channel,
            frequency_mhz: f.frequency,
            sensitivity: f.sensitivity,
            pilot: f.pilot.clone(),
        })
        .collect();

    let sinks = if args.sinks {
        timing
            .sinks
            .iter()
            .map(|s| SinkInfo {
                name: s.name.clone(),
                sink_type: format!("{:?}", s.sink_type),
                queue_capacity: s.queue_capacity,
                params: s.params.clone(),
            })
            .collect()
    } else {
        Vec::new()
    };

    ConfigInfo {
        version: format!("{:?}", timing.version),
        devices,
        frequencies,
        sectors_m: timing.sector_lengths(),
        sinks,
    }
}

fn print_config_info(timing: &TimingConfig, args: &InfoArgs) {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║               Timing Bridge Configuration                    ║");
    println!("╚══════════════════════════════════════════════════════════════╝\n");

    println!("📍 Version: {:?}", timing.version);

    // Devices
    println!("\n⏱  Devices ({})", timing.devices.len());
    for (i, device) in timing.devices.iter().enumerate() {
        let prefix = if i == timing.devices.len() - 1 { "└─" } else { "├─" };
        println!(
            "   {} {} [{} {:?}] {}",
            prefix,
            device.id,
            device.settings.family(),
            device.role,
            endpoint(&device.settings)
        );
    }

    // Frequencies
    if timing.frequencies.is_empty() {
        println!("\n📻 Frequencies: none");
    } else {
        println!("\n📻 Frequencies ({})", timing.frequencies.len());
        for (i, frequency) in timing.frequencies.iter().enumerate() {
            let prefix = if i == timing.frequencies.len() - 1 {
                "└─"
            } else {
                "├─"
            };
            if frequency.pilot.is_empty() {
                println!("   {} [{}] {}", prefix, i, frequency);
            } else {
                println!("   {} [{}] {} {}", prefix, i, frequency, frequency.pilot);
            }
        }
    }

    // Sectors
    let sectors = timing.sector_lengths();
    if !sectors.is_empty() {
        let total: f64 = sectors.iter().sum();
        println!("\n📏 Sectors ({}, {:.1}m total)", sectors.len(), total);
        for (i, length) in sectors.iter().enumerate() {
            let prefix = if i == sectors.len() - 1 { "└─" } else { "├─" };
            println!("   {} {:.1}m", prefix, length);
        }
    }

    // Sinks
    if args.sinks && !timing.sinks.is_empty() {
        println!("\n📤 Sinks ({})", timing.sinks.len());
        for (i, sink) in timing.sinks.iter().enumerate() {
            let prefix = if i == timing.sinks.len() - 1 { "└─" } else { "├─" };
            println!(
                "   {} {} ({:?}, queue {})",
                prefix, sink.name, sink.sink_type, sink.queue_capacity
            );
        }
    }

    println!();
}
