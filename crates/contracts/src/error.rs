//! Layered error definitions
//!
//! Categorized by source: config / link / telemetry / sink

use thiserror::Error;

/// Unified error type
#[derive(Debug, Error)]
pub enum ContractError {
    // ===== Configuration Errors =====
    /// Configuration parse error
    #[error("config parse error: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration validation error
    #[error("config validation error at '{field}': {message}")]
    ConfigValidation { field: String, message: String },

    // ===== Link Errors =====
    /// Device refused or timed out the connection attempt
    #[error("device '{device}' connection error: {message}")]
    LinkConnect { device: String, message: String },

    /// Outbound message could not be written to the device
    #[error("device '{device}' send error: {message}")]
    LinkSend { device: String, message: String },

    /// Operation requires a live link
    #[error("device '{device}' is not connected")]
    NotConnected { device: String },

    // ===== Telemetry Errors =====
    /// Inbound message could not be decoded
    #[error("malformed '{event}' from device '{device}': {message}")]
    MalformedTelemetry {
        device: String,
        event: String,
        message: String,
    },

    // ===== Sink Errors =====
    /// Sink write error
    #[error("sink '{sink_name}' write error: {message}")]
    SinkWrite { sink_name: String, message: String },

    // ===== General Errors =====
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl ContractError {
    /// Create configuration parse error
    pub fn config_parse(message: impl Into<String>) -> Self {
        Self::ConfigParse {
            message: message.into(),
            source: None,
        }
    }

    /// Create configuration validation error
    pub fn config_validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create link connect error
    pub fn link_connect(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LinkConnect {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Create link send error
    pub fn link_send(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::LinkSend {
            device: device.into(),
            message: message.into(),
        }
    }

    /// Create malformed telemetry error
    pub fn malformed(
        device: impl Into<String>,
        event: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::MalformedTelemetry {
            device: device.into(),
            event: event.into(),
            message: message.into(),
        }
    }

    /// Create sink write error
    pub fn sink_write(sink_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SinkWrite {
            sink_name: sink_name.into(),
            message: message.into(),
        }
    }
}
