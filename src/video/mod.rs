//! Outbound video: frame types, the per-camera frame buffer, paced track
//! sources and the encoder seam.

pub mod buffer;
pub mod camera;
pub mod convert;
pub mod encoder;
pub mod format;
pub mod frame;
pub mod source;

pub use buffer::CameraFrameBuffer;
pub use camera::{CameraSource, TestPatternCamera};
pub use encoder::{
    EncodedFrame, EncoderConfig, EncoderFactory, FrameEncoder, OpenH264Encoder, OpenH264Factory,
};
pub use format::{PixelFormat, Resolution};
pub use frame::VideoFrame;
pub use source::{VideoTrackSource, TRACK_PIXEL_FORMAT};
