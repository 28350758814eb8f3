//! DetectionSink trait - Dispatcher output interface

use crate::{ContractError, DetectionEvent};

/// Detection output trait
///
/// All sink implementations must implement this trait.
#[trait_variant::make(DetectionSink: Send)]
pub trait LocalDetectionSink {
    /// Sink name (used for logging/metrics)
    fn name(&self) -> &str;

    /// Write one finished detection
    ///
    /// # Errors
    /// Returns write error (should include context)
    async fn write(&mut self, event: &DetectionEvent) -> Result<(), ContractError>;

    /// Flush buffer (if any)
    async fn flush(&mut self) -> Result<(), ContractError>;

    /// Close sink
    async fn close(&mut self) -> Result<(), ContractError>;
}
