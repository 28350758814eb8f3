//! Scripted timing device speaking the line-delimited JSON protocol
//!
//! Clock-sync requests are answered automatically with the seconds elapsed
//! since the device's boot instant; every other inbound message is handed
//! to the test. The first answer can be held back to simulate a slow reply.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use chrono::Utc;
use contracts::to_seconds;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

const STEP: Duration = Duration::from_millis(10);
const EXPECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Listening side of the fake device
pub struct ScriptedDevice {
    listener: TcpListener,
}

impl ScriptedDevice {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        Self { listener }
    }

    pub fn port(&self) -> u16 {
        self.listener.local_addr().unwrap().port()
    }

    /// Accept the next connection. `boot` is the local time, in seconds,
    /// that the device clock counts from.
    pub async fn accept(&self, boot: f64) -> DeviceSession {
        self.accept_delaying_first_reply(boot, Duration::ZERO).await
    }

    /// Like [`accept`](Self::accept), but the first clock reading is sent
    /// only after `delay`. Later replies queue behind it.
    pub async fn accept_delaying_first_reply(&self, boot: f64, delay: Duration) -> DeviceSession {
        let (stream, _) = tokio::time::timeout(EXPECT_TIMEOUT, self.listener.accept())
            .await
            .expect("no connection")
            .unwrap();
        DeviceSession::start(stream, boot, delay)
    }
}

/// One accepted connection
pub struct DeviceSession {
    received: mpsc::UnboundedReceiver<Value>,
    outbound: Option<mpsc::UnboundedSender<String>>,
    task: JoinHandle<()>,
}

impl DeviceSession {
    fn start(stream: TcpStream, boot: f64, first_reply_delay: Duration) -> Self {
        let (received_tx, received) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(serve(
            stream,
            boot,
            first_reply_delay,
            received_tx,
            outbound_rx,
        ));
        Self {
            received,
            outbound: Some(outbound_tx),
            task,
        }
    }

    /// Send `{"event": event, "data": data}`
    pub fn send(&self, event: &str, data: Value) {
        self.send_raw(&json!({ "event": event, "data": data }).to_string());
    }

    /// Send one line verbatim
    pub fn send_raw(&self, line: &str) {
        if let Some(outbound) = &self.outbound {
            let _ = outbound.send(line.to_string());
        }
    }

    /// Wait for the next message named `event`, skipping others.
    /// Returns its `data`.
    pub async fn expect(&mut self, event: &str) -> Value {
        let deadline = tokio::time::Instant::now() + EXPECT_TIMEOUT;
        loop {
            let message = tokio::time::timeout_at(deadline, self.received.recv())
                .await
                .unwrap_or_else(|_| panic!("timed out waiting for '{event}'"))
                .unwrap_or_else(|| panic!("connection closed while waiting for '{event}'"));
            if message["event"] == event {
                return message.get("data").cloned().unwrap_or(Value::Null);
            }
        }
    }

    /// Whether the peer closed the connection within `wait`
    pub async fn closed_within(&mut self, wait: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, self.received.recv()).await {
                Ok(Some(_)) => continue,
                Ok(None) => return true,
                Err(_) => return false,
            }
        }
    }

    /// Close the connection from the device side
    pub fn close(&mut self) {
        self.outbound = None;
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    stream: TcpStream,
    boot: f64,
    first_reply_delay: Duration,
    received: mpsc::UnboundedSender<Value>,
    mut outbound: mpsc::UnboundedReceiver<String>,
) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();
    // Clock replies not yet written, with their due time
    let mut held: VecDeque<(tokio::time::Instant, String)> = VecDeque::new();
    let mut delay = first_reply_delay;

    loop {
        let due = held.front().map(|(due, _)| *due);
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(line)) = line else { break };
                let Ok(message) = serde_json::from_str::<Value>(&line) else { continue };
                if message["event"] == "ts_server_time" {
                    let elapsed = to_seconds(Utc::now()) - boot;
                    let reply = json!({ "event": "ts_server_time", "data": elapsed }).to_string();
                    let due = tokio::time::Instant::now() + std::mem::take(&mut delay);
                    held.push_back((due, reply));
                } else if received.send(message).is_err() {
                    break;
                }
            }
            _ = tokio::time::sleep_until(due.unwrap_or_else(tokio::time::Instant::now)), if due.is_some() => {
                let Some((_, reply)) = held.pop_front() else { continue };
                if write_line(&mut writer, &reply).await.is_err() {
                    break;
                }
            }
            line = outbound.recv() => {
                let Some(line) = line else { break };
                if write_line(&mut writer, &line).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn write_line(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    line: &str,
) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await
}

/// Poll `ready` until it holds or `wait` elapses
pub async fn wait_until(wait: Duration, ready: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + wait;
    while Instant::now() < deadline {
        if ready() {
            return true;
        }
        tokio::time::sleep(STEP).await;
    }
    ready()
}
