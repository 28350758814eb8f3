//! Error types for CLI operations.

use thiserror::Error;

/// CLI-specific error types
#[derive(Error, Debug)]
pub enum CliError {
    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration has no devices to drive
    #[error("Configuration has no timing devices")]
    NoDevices,

    /// No device came up within the connect wait
    #[error("No timing device connected within {waited_ms}ms ({total} configured)")]
    NoDevicesConnected { total: usize, waited_ms: u64 },
}

impl CliError {
    pub fn config_not_found(path: impl Into<String>) -> Self {
        Self::ConfigNotFound { path: path.into() }
    }

    pub fn no_devices_connected(total: usize, waited_ms: u64) -> Self {
        Self::NoDevicesConnected { total, waited_ms }
    }
}
