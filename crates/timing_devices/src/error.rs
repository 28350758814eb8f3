//! Timing device error types
//!
//! Never crosses the `TimingSystem` boundary: callers there get `false`
//! and a log line.

use contracts::ContractError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeviceError {
    /// TCP connect refused or timed out
    #[error("device '{device}' connect failed: {message}")]
    ConnectFailed { device: String, message: String },

    /// Outbound message could not be queued or written
    #[error("device '{device}' send failed: {message}")]
    SendFailed { device: String, message: String },

    /// Operation needs a link and there is none
    #[error("device '{device}' is not connected")]
    NotConnected { device: String },

    /// No tokio runtime to drive the link
    #[error("device '{device}' needs a tokio runtime")]
    NoRuntime { device: String },

    /// Inbound message that could not be decoded
    #[error("device '{device}' sent malformed '{event}': {message}")]
    Malformed {
        device: String,
        event: String,
        message: String,
    },

    /// Detection command in the wrong state
    #[error("device '{device}' rejected {operation}: {message}")]
    InvalidState {
        device: String,
        operation: &'static str,
        message: String,
    },

    #[error(transparent)]
    Contract(#[from] ContractError),
}

impl DeviceError {
    pub fn connect_failed(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectFailed {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn send_failed(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SendFailed {
            device: device.into(),
            message: message.into(),
        }
    }

    pub fn not_connected(device: impl Into<String>) -> Self {
        Self::NotConnected {
            device: device.into(),
        }
    }

    pub fn invalid_state(
        device: impl Into<String>,
        operation: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            device: device.into(),
            operation,
            message: message.into(),
        }
    }

    /// Short label used as a metrics tag
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectFailed { .. } => "connect_failed",
            Self::SendFailed { .. } => "send_failed",
            Self::NotConnected { .. } => "not_connected",
            Self::NoRuntime { .. } => "no_runtime",
            Self::Malformed { .. } => "malformed",
            Self::InvalidState { .. } => "invalid_state",
            Self::Contract(_) => "contract",
        }
    }
}

/// Result alias
pub type Result<T> = std::result::Result<T, DeviceError>;
