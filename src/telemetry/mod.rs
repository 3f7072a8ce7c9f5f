//! Controller telemetry: wire types, the shared state bus and data channel parsing

pub mod bus;
pub mod datachannel;
pub mod types;

pub use bus::SharedStateBus;
pub use datachannel::{handle_channel_message, parse_channel_message, ChannelMessage};
pub use types::{
    quaternion_from_xyzw, ControllerSample, ControllerState, ControllerStateUpdate, Hand,
    HeadSample, CONTROLLER_STATE_TYPE, GRIP_ENABLE_THRESHOLD,
};
