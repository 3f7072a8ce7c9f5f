//! vr-teleop - VR headset teleoperation bridge
//!
//! Streams robot camera video to a WebXR headset over WebRTC, receives
//! controller poses back on a data channel, calibrates them against a
//! reference pose and maps them onto a flat robot action schema.

pub mod config;
pub mod error;
pub mod server;
pub mod state;
pub mod telemetry;
pub mod teleop;
pub mod tls;
pub mod utils;
pub mod video;
pub mod web;
pub mod webrtc;

pub use error::{AppError, Result};
pub use teleop::VrTeleoperator;
