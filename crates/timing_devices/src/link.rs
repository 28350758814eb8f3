//! TCP link task for socket devices
//!
//! One task per connection attempt: bounded connect, then a single
//! `select!` loop that reads lines, writes queued outbound messages and
//! ticks the owner. Every callback carries the link generation so the owner
//! can ignore a link it already replaced.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, instrument, trace, warn};

use crate::protocol::Outbound;

/// Owner-side tick period (sync deadline polling)
pub const TICK: Duration = Duration::from_millis(50);

/// Why a link task ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkClosed {
    ConnectFailed(String),
    ConnectTimeout,
    /// Peer closed the stream
    Eof,
    ReadError(String),
    WriteError(String),
    /// Owner dropped the outbound queue
    Shutdown,
}

impl LinkClosed {
    /// Short label used as a metrics tag
    pub fn reason(&self) -> &'static str {
        match self {
            LinkClosed::ConnectFailed(_) => "connect_failed",
            LinkClosed::ConnectTimeout => "connect_timeout",
            LinkClosed::Eof => "closed_by_peer",
            LinkClosed::ReadError(_) => "read_error",
            LinkClosed::WriteError(_) => "send_failed",
            LinkClosed::Shutdown => "requested",
        }
    }
}

impl fmt::Display for LinkClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkClosed::ConnectFailed(e) => write!(f, "connect failed: {e}"),
            LinkClosed::ConnectTimeout => f.write_str("connect timed out"),
            LinkClosed::Eof => f.write_str("closed by peer"),
            LinkClosed::ReadError(e) => write!(f, "read error: {e}"),
            LinkClosed::WriteError(e) => write!(f, "write error: {e}"),
            LinkClosed::Shutdown => f.write_str("shut down"),
        }
    }
}

/// Callbacks from the link task to its owner
pub trait LinkEvents: Send + Sync + 'static {
    fn on_connected(&self, generation: u64);
    fn on_line(&self, generation: u64, line: &str);
    fn on_tick(&self, generation: u64);
    fn on_closed(&self, generation: u64, reason: LinkClosed);
}

/// Where and how to connect
#[derive(Debug, Clone)]
pub struct LinkTarget {
    pub address: String,
    pub connect_timeout: Duration,
}

/// Drive one connection until it closes or the owner drops `outbound`
#[instrument(
    name = "socket_link",
    skip(target, outbound, events),
    fields(address = %target.address)
)]
pub async fn run_link<E: LinkEvents>(
    target: LinkTarget,
    generation: u64,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: Arc<E>,
) {
    let stream = match timeout(target.connect_timeout, TcpStream::connect(&target.address)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            events.on_closed(generation, LinkClosed::ConnectFailed(e.to_string()));
            return;
        }
        Err(_) => {
            events.on_closed(generation, LinkClosed::ConnectTimeout);
            return;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "set_nodelay failed");
    }

    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    events.on_connected(generation);

    let mut ticker = interval(TICK);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if !line.trim().is_empty() {
                        events.on_line(generation, &line);
                    }
                }
                Ok(None) => break LinkClosed::Eof,
                Err(e) => break LinkClosed::ReadError(e.to_string()),
            },
            message = outbound.recv() => match message {
                Some(message) => {
                    if let Err(e) = write_message(&mut write_half, &message).await {
                        break LinkClosed::WriteError(e);
                    }
                }
                None => break LinkClosed::Shutdown,
            },
            _ = ticker.tick() => events.on_tick(generation),
        }
    };

    if let Err(e) = write_half.shutdown().await {
        trace!(error = %e, "shutdown after close");
    }
    events.on_closed(generation, reason);
}

async fn write_message(writer: &mut OwnedWriteHalf, message: &Outbound) -> Result<(), String> {
    let line = match message.encode() {
        Ok(line) => line,
        Err(e) => {
            // Encoding is local; drop the message, keep the link
            warn!(event = message.event_name(), error = %e, "outbound encode failed");
            return Ok(());
        }
    };
    trace!(event = message.event_name(), "send");
    writer
        .write_all(line.as_bytes())
        .await
        .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    #[derive(Default)]
    struct Recorder {
        connected: Mutex<Vec<u64>>,
        lines: Mutex<Vec<String>>,
        closed: Mutex<Vec<LinkClosed>>,
    }

    impl LinkEvents for Recorder {
        fn on_connected(&self, generation: u64) {
            self.connected.lock().unwrap().push(generation);
        }
        fn on_line(&self, _generation: u64, line: &str) {
            self.lines.lock().unwrap().push(line.to_string());
        }
        fn on_tick(&self, _generation: u64) {}
        fn on_closed(&self, _generation: u64, reason: LinkClosed) {
            self.closed.lock().unwrap().push(reason);
        }
    }

    #[tokio::test]
    async fn test_link_reads_lines_and_writes_messages() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let device = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket
                .write_all(b"{\"event\":\"heartbeat\",\"data\":{}}\n\n")
                .await
                .unwrap();

            let mut received = vec![0u8; 64];
            let n = socket.read(&mut received).await.unwrap();
            String::from_utf8_lossy(&received[..n]).to_string()
        });

        let recorder = Arc::new(Recorder::default());
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Outbound::StopRace).unwrap();

        let target = LinkTarget {
            address,
            connect_timeout: Duration::from_secs(1),
        };
        let task = tokio::spawn(run_link(target, 7, rx, Arc::clone(&recorder)));

        let written = device.await.unwrap();
        assert_eq!(written, "{\"event\":\"stop_race\"}\n");

        for _ in 0..100 {
            if !recorder.lines.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        drop(tx);
        task.await.unwrap();

        assert_eq!(*recorder.connected.lock().unwrap(), vec![7]);
        assert_eq!(recorder.lines.lock().unwrap().len(), 1);
        let closed = recorder.closed.lock().unwrap();
        assert!(matches!(closed[0], LinkClosed::Shutdown | LinkClosed::Eof));
    }

    #[tokio::test]
    async fn test_connect_refused_reports_closed() {
        // Bind then drop to get a port nobody listens on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        let recorder = Arc::new(Recorder::default());
        let (_tx, rx) = mpsc::unbounded_channel();
        let target = LinkTarget {
            address,
            connect_timeout: Duration::from_secs(1),
        };

        run_link(target, 1, rx, Arc::clone(&recorder)).await;

        assert!(recorder.connected.lock().unwrap().is_empty());
        assert_eq!(
            recorder.closed.lock().unwrap()[0].reason(),
            "connect_failed"
        );
    }
}
