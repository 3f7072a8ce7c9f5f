//! DataChannel telemetry message parsing
//!
//! Every message is a JSON object with a `type` field. Only
//! `controller_state` carries telemetry; other types are ignored so the
//! client can multiplex its own messages on the same channel.

use serde_json::Value;
use tracing::{debug, trace};

use super::bus::SharedStateBus;
use super::types::{ControllerStateUpdate, CONTROLLER_STATE_TYPE};

/// Outcome of handling one inbound data channel message
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelMessage {
    /// Controller telemetry to merge into the state bus
    ControllerState(ControllerStateUpdate),
    /// Valid JSON object with a type other than telemetry
    Ignored(Option<String>),
    /// Not JSON, not an object, or a telemetry object with malformed fields
    Invalid(String),
}

/// Parse a raw data channel payload (text or binary UTF-8 JSON)
pub fn parse_channel_message(data: &[u8]) -> ChannelMessage {
    let value: Value = match serde_json::from_slice(data) {
        Ok(value) => value,
        Err(e) => return ChannelMessage::Invalid(format!("not JSON: {}", e)),
    };

    let Value::Object(map) = value else {
        return ChannelMessage::Invalid("payload is not a JSON object".to_string());
    };

    let msg_type = map.get("type").and_then(Value::as_str).map(str::to_string);
    if msg_type.as_deref() != Some(CONTROLLER_STATE_TYPE) {
        return ChannelMessage::Ignored(msg_type);
    }

    match serde_json::from_value::<ControllerStateUpdate>(Value::Object(map)) {
        Ok(update) => ChannelMessage::ControllerState(update),
        Err(e) => ChannelMessage::Invalid(format!("malformed controller_state: {}", e)),
    }
}

/// Parse a payload and merge telemetry into the bus.
///
/// Returns the rejection reason for invalid payloads so the caller can log it
/// with its own rate limit.
pub fn handle_channel_message(
    bus: &SharedStateBus,
    data: &[u8],
) -> std::result::Result<(), String> {
    match parse_channel_message(data) {
        ChannelMessage::ControllerState(update) => {
            trace!("controller_state merged");
            bus.merge(update);
            Ok(())
        }
        ChannelMessage::Ignored(msg_type) => {
            debug!("Ignoring data channel message of type {:?}", msg_type);
            Ok(())
        }
        ChannelMessage::Invalid(reason) => Err(reason),
    }
}
