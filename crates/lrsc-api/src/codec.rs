//! Line-oriented JSON message format spoken by the LRSC concentrator.
//!
//! Every message is one JSON object on its own line. Outbound lines are
//! terminated with [`LINE_TERMINATOR`]; inbound framing (newline split,
//! blank-line skipping) lives with the connection that reads the socket.

use serde::{Deserialize, Serialize};

use crate::error::Error;

// ── Protocol constants ───────────────────────────────────────────────

/// Protocol selector written as the very first bytes of a session.
pub const PROTOCOL_VERSION: &str = "JSON_000";

/// Terminator appended to every outbound message.
pub const LINE_TERMINATOR: &str = "\n\n";

/// Application port every downstream command is addressed to.
pub const DEVICE_PORT: u32 = 10;

/// Client hello envelope sent right after [`PROTOCOL_VERSION`].
pub const HELLO: &str = r#"{"msgtag":1,"eui":"FF-00-00-00-00-00-00-00","euidom":0,"major":1,"minor":0,"build":0,"name":"LRSC Client"}"#;

// ── MessageType ──────────────────────────────────────────────────────

/// The `msgtag` discriminator. Unknown tags are preserved as [`MessageType::Other`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum MessageType {
    #[default]
    Handshake,
    Hello,
    Upstream,
    Downstream,
    Other(u32),
}

impl From<u32> for MessageType {
    fn from(tag: u32) -> Self {
        match tag {
            0 => Self::Handshake,
            1 => Self::Hello,
            6 => Self::Upstream,
            7 => Self::Downstream,
            other => Self::Other(other),
        }
    }
}

impl From<MessageType> for u32 {
    fn from(kind: MessageType) -> Self {
        match kind {
            MessageType::Handshake => 0,
            MessageType::Hello => 1,
            MessageType::Upstream => 6,
            MessageType::Downstream => 7,
            MessageType::Other(tag) => tag,
        }
    }
}

// ── MessageMode ──────────────────────────────────────────────────────

/// Delivery mode of a downstream message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum MessageMode {
    #[default]
    Unconfirmed,
    Confirmed,
    Other(u32),
}

impl From<u32> for MessageMode {
    fn from(mode: u32) -> Self {
        match mode {
            0 => Self::Unconfirmed,
            2 => Self::Confirmed,
            other => Self::Other(other),
        }
    }
}

impl From<MessageMode> for u32 {
    fn from(mode: MessageMode) -> Self {
        match mode {
            MessageMode::Unconfirmed => 0,
            MessageMode::Confirmed => 2,
            MessageMode::Other(mode) => mode,
        }
    }
}

// ── DeviceMessage ────────────────────────────────────────────────────

/// One message on the concentrator socket.
///
/// Missing fields decode to zero/empty values and unknown fields (radio
/// metadata and the like) are ignored, so acks and keep-alives parse too.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceMessage {
    #[serde(rename = "msgtag", default)]
    pub message_type: MessageType,

    /// Device EUI; empty for messages that carry no telemetry.
    #[serde(rename = "deveui", default)]
    pub device_eui: String,

    /// Opaque payload, passed through untouched.
    #[serde(rename = "pdu", default)]
    pub payload: String,

    #[serde(rename = "seqno", default)]
    pub sequence_no: u64,

    #[serde(default)]
    pub mode: MessageMode,

    #[serde(default)]
    pub timeout: i64,

    #[serde(default)]
    pub port: u32,
}

impl DeviceMessage {
    /// Build an outbound command for `device_eui`.
    pub fn downstream(
        device_eui: impl Into<String>,
        payload: impl Into<String>,
        sequence_no: u64,
    ) -> Self {
        Self {
            message_type: MessageType::Downstream,
            device_eui: device_eui.into(),
            payload: payload.into(),
            sequence_no,
            mode: MessageMode::Unconfirmed,
            timeout: 0,
            port: DEVICE_PORT,
        }
    }

    /// A message carries telemetry when it names a device.
    pub fn is_telemetry(&self) -> bool {
        !self.device_eui.is_empty()
    }
}

/// Decode one line from the concentrator.
pub fn parse(line: &str) -> Result<DeviceMessage, Error> {
    serde_json::from_str(line).map_err(|e| Error::Parse {
        message: e.to_string(),
        line: line.to_owned(),
    })
}

/// Encode a message as a single JSON line, without terminator.
pub fn serialize(message: &DeviceMessage) -> Result<String, Error> {
    serde_json::to_string(message).map_err(Error::Encode)
}

// ── Tests ────────────────────────────────────────────────────────────
