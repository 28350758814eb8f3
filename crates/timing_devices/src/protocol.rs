//! Socket device wire protocol
//!
//! One JSON object per line: `{"event": "<name>", "data": <payload>}`.
//! Inbound lines are decoded in two steps so an unknown event name can be
//! told apart from a known event with a broken payload.

use correlator::{NodeSnapshot, PassRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Messages sent to the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Outbound {
    /// Assign a frequency to one channel
    SetFrequency { node: usize, frequency: u32 },
    /// Clock-sync request; the device answers with its seconds-since-epoch
    #[serde(rename = "ts_server_time")]
    ServerTimeRequest,
    #[serde(rename = "ts_server_info")]
    ServerInfoRequest,
    /// Start a race at the given device time
    #[serde(rename = "ts_race_stage")]
    RaceStage { start_time_s: f64 },
    StopRace,
}

impl Outbound {
    pub fn event_name(&self) -> &'static str {
        match self {
            Outbound::SetFrequency { .. } => "set_frequency",
            Outbound::ServerTimeRequest => "ts_server_time",
            Outbound::ServerInfoRequest => "ts_server_info",
            Outbound::RaceStage { .. } => "ts_race_stage",
            Outbound::StopRace => "stop_race",
        }
    }

    /// Encode as a single newline-terminated line
    pub fn encode(&self) -> Result<String, ProtocolError> {
        let mut line = serde_json::to_string(self).map_err(ProtocolError::Envelope)?;
        line.push('\n');
        Ok(line)
    }
}

/// Periodic liveness report with live per-channel signal
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Heartbeat {
    #[serde(default)]
    pub current_rssi: Vec<i32>,
    #[serde(default)]
    pub frequency: Vec<u32>,
    #[serde(default)]
    pub crossing_flag: Vec<bool>,
}

/// A measured value with optional units, e.g. `{"value": 47.7, "units": "°C"}`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CoreEnvironment {
    #[serde(default)]
    pub temperature: Option<Reading>,
    #[serde(default)]
    pub voltage: Option<Reading>,
}

/// One environmental sensor block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentData {
    #[serde(rename = "Core", default)]
    pub core: CoreEnvironment,
}

/// Reply to `ts_server_info`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    #[serde(default)]
    pub release_version: Option<String>,
    #[serde(default)]
    pub server_api: Option<u32>,
    #[serde(default)]
    pub node_api_best: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrequencyEntry {
    #[serde(default)]
    pub band: Option<String>,
    #[serde(default)]
    pub channel: Option<u32>,
    pub frequency: u32,
}

/// Device's confirmation of its current channel frequencies
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrequencyData {
    #[serde(default)]
    pub fdata: Vec<FrequencyEntry>,
}

impl FrequencyData {
    pub fn frequencies(&self) -> Vec<u32> {
        self.fdata.iter().map(|entry| entry.frequency).collect()
    }
}

/// Messages received from the device
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    PassRecord(PassRecord),
    NodeData(NodeSnapshot),
    Heartbeat(Heartbeat),
    Environment(Vec<EnvironmentData>),
    /// Device seconds since its epoch
    ServerTime(f64),
    ServerInfo(ServerInfo),
    FrequencyData(FrequencyData),
    /// Recognised envelope, event we do not act on
    Other(String),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Line is not a JSON envelope at all
    #[error("invalid envelope: {0}")]
    Envelope(#[source] serde_json::Error),

    /// Known event whose payload did not decode
    #[error("invalid '{event}' payload: {source}")]
    Payload {
        event: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ProtocolError {
    /// Event name to attribute the failure to
    pub fn event(&self) -> &str {
        match self {
            ProtocolError::Envelope(_) => "envelope",
            ProtocolError::Payload { event, .. } => event,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

fn payload<T: serde::de::DeserializeOwned>(event: &str, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|source| ProtocolError::Payload {
        event: event.to_string(),
        source,
    })
}

/// Decode one inbound line
pub fn decode(line: &str) -> Result<Inbound, ProtocolError> {
    let Envelope { event, data } = serde_json::from_str(line).map_err(ProtocolError::Envelope)?;

    let message = match event.as_str() {
        "pass_record" => Inbound::PassRecord(payload(&event, data)?),
        "node_data" => Inbound::NodeData(payload(&event, data)?),
        "heartbeat" => Inbound::Heartbeat(payload(&event, data)?),
        "environmental_data" => Inbound::Environment(payload(&event, data)?),
        "ts_server_time" => Inbound::ServerTime(payload(&event, data)?),
        "ts_server_info" => Inbound::ServerInfo(payload(&event, data)?),
        "frequency_data" => Inbound::FrequencyData(payload(&event, data)?),
        _ => Inbound::Other(event),
    };
    Ok(message)
}
