//! MQTT topic templates used on the platform side.

use crate::error::Error;

const TOPIC_ROOT: &str = "iot-2/type/";
const ID_SEGMENT: &str = "/id/";

/// Topic a device event is published on.
pub fn event_topic(device_type: &str, device_id: &str) -> String {
    format!("iot-2/type/{device_type}/id/{device_id}/evt/TEST/fmt/json")
}

/// Filter matching commands for every device of `device_type`.
pub fn command_filter(device_type: &str) -> String {
    format!("iot-2/type/{device_type}/id/+/cmd/+/fmt/json")
}

/// Extract the device id from a command topic.
///
/// Accepts `iot-2/type/{type}/id/{device}/...` and returns `{device}`.
///
/// ```
/// use lrsc_api::topic::device_from_command_topic;
///
/// let id = device_from_command_topic("iot-2/type/LRSC/id/123456789/cmd/reboot/fmt/json").unwrap();
/// assert_eq!(id, "123456789");
/// ```
pub fn device_from_command_topic(topic: &str) -> Result<&str, Error> {
    let invalid = || Error::InvalidTopic(topic.to_owned());

    let rest = topic.strip_prefix(TOPIC_ROOT).ok_or_else(invalid)?;
    let (_, after_id) = rest.split_once(ID_SEGMENT).ok_or_else(invalid)?;
    let (device_id, _) = after_id.split_once('/').ok_or_else(invalid)?;

    if device_id.is_empty() {
        return Err(invalid());
    }
    Ok(device_id)
}
