//! One bounded queue and one worker task per detection sink

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, instrument};

use contracts::{DetectionEvent, DetectionSink};

use crate::error::DispatcherError;
use crate::metrics::SinkMetrics;

/// Producer side of a sink: events go in, the worker writes them out
pub struct SinkHandle {
    name: String,
    queue: mpsc::Sender<DetectionEvent>,
    metrics: Arc<SinkMetrics>,
    worker: JoinHandle<()>,
}

impl SinkHandle {
    /// Start a worker for `sink` with room for `queue_capacity` pending events
    pub fn spawn<S: DetectionSink + Send + 'static>(sink: S, queue_capacity: usize) -> Self {
        let name = sink.name().to_string();
        let (queue, pending) = mpsc::channel(queue_capacity.max(1));
        let metrics = Arc::new(SinkMetrics::new());

        let worker = SinkWorker {
            sink,
            pending,
            metrics: Arc::clone(&metrics),
        };
        let worker = tokio::spawn(worker.run());

        Self {
            name,
            queue,
            metrics,
            worker,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metrics(&self) -> &Arc<SinkMetrics> {
        &self.metrics
    }

    /// Queue one detection, waiting while this sink's queue is full.
    pub async fn send(&self, event: DetectionEvent) -> Result<(), DispatcherError> {
        if self.queue.send(event).await.is_err() {
            self.metrics.inc_undelivered();
            error!(sink = %self.name, "sink worker gone, detection undelivered");
            return Err(DispatcherError::WorkerClosed {
                sink_name: self.name.clone(),
            });
        }
        let pending = self.queue.max_capacity() - self.queue.capacity();
        self.metrics.set_queue_len(pending);
        Ok(())
    }

    /// Close the queue and wait until the worker has written, flushed and closed.
    #[instrument(name = "sink_handle_shutdown", skip(self), fields(sink = %self.name))]
    pub async fn shutdown(self) {
        drop(self.queue);
        if let Err(e) = self.worker.await {
            error!(error = ?e, "sink worker panicked");
        }
    }
}

struct SinkWorker<S> {
    sink: S,
    pending: mpsc::Receiver<DetectionEvent>,
    metrics: Arc<SinkMetrics>,
}

impl<S: DetectionSink> SinkWorker<S> {
    #[instrument(name = "sink_worker", skip(self), fields(sink = %self.sink.name()))]
    async fn run(mut self) {
        debug!("sink worker started");

        while let Some(event) = self.pending.recv().await {
            self.metrics.set_queue_len(self.pending.len());
            // A failed write costs this one detection only
            if let Err(e) = self.sink.write(&event).await {
                self.metrics.inc_failed();
                error!(device = %event.device, frequency = event.frequency, error = %e, "detection not written");
            } else {
                self.metrics.record_written(event.time);
            }
        }

        if let Err(e) = self.sink.flush().await {
            error!(error = %e, "flush failed");
        }
        if let Err(e) = self.sink.close().await {
            error!(error = %e, "close failed");
        }
        debug!(written = self.metrics.written(), "sink worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use contracts::{ContractError, DeviceId};
    use std::sync::Mutex;
    use tokio::time::{sleep, Duration};

    /// Records written frequencies; rejects one frequency if asked
    struct RecordingSink {
        written: Arc<Mutex<Vec<u32>>>,
        reject: Option<u32>,
        write_delay: Duration,
    }

    impl RecordingSink {
        fn new(written: &Arc<Mutex<Vec<u32>>>) -> Self {
            Self {
                written: Arc::clone(written),
                reject: None,
                write_delay: Duration::ZERO,
            }
        }
    }

    impl DetectionSink for RecordingSink {
        fn name(&self) -> &str {
            "recording"
        }

        async fn write(&mut self, event: &DetectionEvent) -> Result<(), ContractError> {
            sleep(self.write_delay).await;
            if self.reject == Some(event.frequency) {
                return Err(ContractError::sink_write("recording", "rejected"));
            }
            self.written.lock().unwrap().push(event.frequency);
            Ok(())
        }

        async fn flush(&mut self) -> Result<(), ContractError> {
            Ok(())
        }

        async fn close(&mut self) -> Result<(), ContractError> {
            Ok(())
        }
    }

    fn crossing(frequency: u32) -> DetectionEvent {
        DetectionEvent {
            device: DeviceId::new("gate"),
            frequency,
            time: Utc::now(),
            peak: 50,
        }
    }

    #[tokio::test]
    async fn test_events_written_in_queue_order() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let handle = SinkHandle::spawn(RecordingSink::new(&written), 8);

        for frequency in [5658, 5695, 5732] {
            handle.send(crossing(frequency)).await.unwrap();
        }
        let metrics = Arc::clone(handle.metrics());
        handle.shutdown().await;

        assert_eq!(*written.lock().unwrap(), vec![5658, 5695, 5732]);
        assert_eq!(metrics.written(), 3);
        assert!(metrics.last_event_time().is_some());
    }

    #[tokio::test]
    async fn test_full_queue_waits_instead_of_dropping() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let mut sink = RecordingSink::new(&written);
        sink.write_delay = Duration::from_millis(5);
        let handle = SinkHandle::spawn(sink, 1);

        for i in 0..10 {
            handle.send(crossing(5600 + i)).await.unwrap();
        }
        let metrics = Arc::clone(handle.metrics());
        handle.shutdown().await;

        assert_eq!(written.lock().unwrap().len(), 10);
        assert_eq!(metrics.undelivered(), 0);
    }

    #[tokio::test]
    async fn test_failed_write_skips_only_that_event() {
        let written = Arc::new(Mutex::new(Vec::new()));
        let mut sink = RecordingSink::new(&written);
        sink.reject = Some(5695);
        let handle = SinkHandle::spawn(sink, 8);

        for frequency in [5658, 5695, 5732] {
            handle.send(crossing(frequency)).await.unwrap();
        }
        let metrics = Arc::clone(handle.metrics());
        handle.shutdown().await;

        assert_eq!(*written.lock().unwrap(), vec![5658, 5732]);
        assert_eq!(metrics.failed(), 1);
        assert_eq!(metrics.written(), 2);
    }
}
