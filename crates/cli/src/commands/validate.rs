//! `validate` command implementation.

use anyhow::{Context, Result};
use contracts::{Role, TimingConfig, TimingSystemSettings};
use serde::Serialize;
use tracing::info;

use crate::cli::ValidateArgs;

/// Validation result for JSON output
#[derive(Serialize)]
struct ValidationResult {
    valid: bool,
    config_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    warnings: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<ConfigSummary>,
}

#[derive(Serialize)]
struct ConfigSummary {
    version: String,
    device_count: usize,
    frequency_count: usize,
    sector_count: usize,
    sink_count: usize,
}

/// Execute the `validate` command
pub fn run_validate(args: &ValidateArgs) -> Result<()> {
    info!(config = %args.config.display(), "Validating configuration");

    let result = validate_config(args);

    if args.json {
        let json = serde_json::to_string_pretty(&result)
            .context("Failed to serialize validation result")?;
        println!("{}", json);
    } else {
        print_validation_result(&result);
    }

    if result.valid {
        Ok(())
    } else {
        anyhow::bail!("Configuration validation failed")
    }
}

fn validate_config(args: &ValidateArgs) -> ValidationResult {
    let config_path = args.config.display().to_string();

    // Check file exists
    if !args.config.exists() {
        return ValidationResult {
            valid: false,
            config_path,
            error: Some(format!("File not found: {}", args.config.display())),
            warnings: None,
            summary: None,
        };
    }

    // Try to load and validate
    match config_loader::ConfigLoader::load_from_path(&args.config) {
        Ok(timing) => {
            let warnings = collect_warnings(&timing);
            ValidationResult {
                valid: true,
                config_path,
                error: None,
                warnings: if warnings.is_empty() {
                    None
                } else {
                    Some(warnings)
                },
                summary: Some(ConfigSummary {
                    version: format!("{:?}", timing.version),
                    device_count: timing.devices.len(),
                    frequency_count: timing.frequencies.len(),
                    sector_count: timing.sectors.len(),
                    sink_count: timing.sinks.len(),
                }),
            }
        }
        Err(e) => ValidationResult {
            valid: false,
            config_path,
            error: Some(e.to_string()),
            warnings: None,
            summary: None,
        },
    }
}

/// Collect configuration warnings (non-fatal issues)
fn collect_warnings(timing: &TimingConfig) -> Vec<String> {
    let mut warnings = Vec::new();

    if timing.devices.is_empty() {
        warnings.push("No devices configured - `run` will refuse to start".to_string());
    }

    if timing.sinks.is_empty() {
        warnings.push("No sinks configured - detections will only be counted".to_string());
    }

    if timing.frequencies.is_empty() {
        warnings.push("No frequencies configured - devices will not detect anyone".to_string());
    }

    let primaries = timing
        .devices
        .iter()
        .filter(|device| device.role == Role::Primary)
        .count();
    if !timing.devices.is_empty() && primaries == 0 {
        warnings.push("No primary device - laps cannot be started or finished".to_string());
    }
    if primaries > 1 {
        warnings.push(format!("{primaries} primary devices configured"));
    }

    let has_lengths = !timing.sectors.is_empty()
        || timing.devices.iter().any(|device| device.sector_length_m > 0.0);
    if timing.devices.len() > 1 && !has_lengths {
        warnings.push("No sector lengths - distance and speed are unavailable".to_string());
    }

    for device in &timing.devices {
        if let TimingSystemSettings::Socket(socket) = &device.settings {
            if socket.heartbeat_timeout_ms <= socket.sync_window_ms {
                warnings.push(format!(
                    "Device '{}' heartbeat_timeout_ms ({}) does not exceed sync_window_ms ({})",
                    device.id, socket.heartbeat_timeout_ms, socket.sync_window_ms
                ));
            }
        }
    }

    warnings
}

fn print_validation_result(result: &ValidationResult) {
    if result.valid {
        println!("✓ Configuration is valid: {}", result.config_path);

        if let Some(ref summary) = result.summary {
            println!("\n  Version: {}", summary.version);
            println!("  Devices: {}", summary.device_count);
            println!("  Frequencies: {}", summary.frequency_count);
            println!("  Sectors: {}", summary.sector_count);
            println!("  Sinks: {}", summary.sink_count);
        }

        if let Some(ref warnings) = result.warnings {
            println!("\n⚠ Warnings:");
            for warning in warnings {
                println!("  - {}", warning);
            }
        }
    } else {
        println!("✗ Configuration is invalid: {}", result.config_path);
        if let Some(ref error) = result.error {
            println!("\n  Error: {}", error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::PathBuf;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn args(path: PathBuf) -> ValidateArgs {
        ValidateArgs {
            config: path,
            json: false,
        }
    }

    #[test]
    fn test_valid_config_with_warnings() {
        let file = write_config(
            r#"
[[devices]]
id = "gate"
role = "split"
[devices.settings]
type = "manual"
"#,
        );

        let result = validate_config(&args(file.path().to_path_buf()));
        assert!(result.valid);
        let warnings = result.warnings.unwrap();
        assert!(warnings.iter().any(|w| w.contains("No sinks")));
        assert!(warnings.iter().any(|w| w.contains("No primary device")));
        assert_eq!(result.summary.unwrap().device_count, 1);
    }

    #[test]
    fn test_invalid_config_reports_error() {
        let file = write_config(
            r#"
[[devices]]
id = "gate"
[devices.settings]
type = "socket"
host = ""
port = 5000
"#,
        );

        let result = validate_config(&args(file.path().to_path_buf()));
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("devices[gate].settings"));
    }

    #[test]
    fn test_missing_file() {
        let result = validate_config(&args(PathBuf::from("/nonexistent/timing.toml")));
        assert!(!result.valid);
        assert!(result.error.unwrap().contains("File not found"));
    }
}
