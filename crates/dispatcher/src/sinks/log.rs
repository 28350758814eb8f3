//! LogSink - logs each detection via tracing

use contracts::{ContractError, DetectionEvent, DetectionSink};
use tracing::{info, instrument};

/// Sink that logs every detection (debugging / headless runs)
pub struct LogSink {
    name: String,
    written: u64,
}

impl LogSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            written: 0,
        }
    }
}

impl DetectionSink for LogSink {
    fn name(&self) -> &str {
        &self.name
    }

    #[instrument(
        name = "log_sink_write",
        skip(self, event),
        fields(sink = %self.name, device = %event.device)
    )]
    async fn write(&mut self, event: &DetectionEvent) -> Result<(), ContractError> {
        self.written += 1;
        info!(
            sink = %self.name,
            device = %event.device,
            frequency = event.frequency,
            time = %event.time.format("%H:%M:%S%.3f"),
            peak = event.peak,
            "Detection"
        );
        Ok(())
    }

    #[instrument(name = "log_sink_flush", skip(self))]
    async fn flush(&mut self) -> Result<(), ContractError> {
        Ok(())
    }

    #[instrument(name = "log_sink_close", skip(self))]
    async fn close(&mut self) -> Result<(), ContractError> {
        info!(sink = %self.name, written = self.written, "LogSink closed");
        Ok(())
    }
}
