// ── Bridge data model ──
//
// The two message kinds that cross the bridge. Both are immutable once
// built and consumed exactly once by the pump.

use lrsc_api::DeviceMessage;

/// Telemetry from a device, headed for the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub device_id: String,
    pub payload: String,
}

impl Event {
    pub fn new(device_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            payload: payload.into(),
        }
    }

    /// Telemetry carried by a device message, if any.
    pub fn from_message(message: DeviceMessage) -> Option<Self> {
        message.is_telemetry().then(|| Self {
            device_id: message.device_eui,
            payload: message.payload,
        })
    }
}

/// A platform command, headed for a device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub device_id: String,
    pub payload: String,
}

impl Command {
    pub fn new(device_id: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            payload: payload.into(),
        }
    }
}
