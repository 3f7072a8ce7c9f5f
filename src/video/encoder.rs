//! Encoder seam for outbound camera tracks
//!
//! Each session track owns one encoder instance. A fresh encoder always opens
//! with an IDR picture, so a newly connected headset never waits for the next
//! periodic keyframe.

use bytes::Bytes;

use crate::error::{AppError, Result};
use crate::video::convert::bgr24_to_rgb24;
use crate::video::format::{PixelFormat, Resolution};
use crate::video::frame::VideoFrame;

/// Encoder configuration
#[derive(Debug, Clone)]
pub struct EncoderConfig {
    /// Input resolution, fixed for the life of the encoder
    pub resolution: Resolution,
    /// Target frame rate
    pub fps: u32,
}

impl EncoderConfig {
    pub fn new(resolution: Resolution, fps: u32) -> Self {
        Self {
            resolution,
            fps: fps.max(1),
        }
    }
}

/// One encoded access unit (Annex B for H.264)
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    pub data: Bytes,
    pub key_frame: bool,
    /// Presentation index copied from the source frame
    pub pts: u64,
}

impl EncodedFrame {
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Per-track video encoder
///
/// Not `Sync`: software encoders keep mutable codec state.
pub trait FrameEncoder: Send {
    /// Encoder name for logging
    fn name(&self) -> &str;

    /// Encode one BGR24 frame. An empty result means the encoder skipped it.
    fn encode(&mut self, frame: &VideoFrame) -> Result<EncodedFrame>;

    /// Make the next encoded frame a keyframe
    fn request_keyframe(&mut self);
}

/// Creates one encoder per outbound track
pub trait EncoderFactory: Send + Sync {
    fn create(&self, config: EncoderConfig) -> Result<Box<dyn FrameEncoder>>;
}

/// Scan an Annex B stream for an IDR slice (NAL type 5)
pub fn is_h264_keyframe(data: &[u8]) -> bool {
    let mut i = 0;
    while i + 3 < data.len() {
        let start_len = if data[i..].starts_with(&[0, 0, 0, 1]) {
            4
        } else if data[i..].starts_with(&[0, 0, 1]) {
            3
        } else {
            i += 1;
            continue;
        };
        let header = i + start_len;
        if header < data.len() && data[header] & 0x1F == 5 {
            return true;
        }
        i = header;
    }
    false
}

/// Software H.264 encoder (Cisco OpenH264)
pub struct OpenH264Encoder {
    config: EncoderConfig,
    inner: openh264::encoder::Encoder,
    force_keyframe: bool,
    frames_encoded: u64,
}

impl OpenH264Encoder {
    pub fn new(config: EncoderConfig) -> Result<Self> {
        if !config.resolution.is_valid() {
            return Err(AppError::VideoError(format!(
                "H.264 needs even, non-zero dimensions, got {}",
                config.resolution
            )));
        }
        let inner = Self::open()?;
        Ok(Self {
            config,
            inner,
            force_keyframe: false,
            frames_encoded: 0,
        })
    }

    fn open() -> Result<openh264::encoder::Encoder> {
        openh264::encoder::Encoder::new()
            .map_err(|e| AppError::VideoError(format!("Failed to open H.264 encoder: {}", e)))
    }

    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }
}

impl FrameEncoder for OpenH264Encoder {
    fn name(&self) -> &str {
        "openh264"
    }

    fn encode(&mut self, frame: &VideoFrame) -> Result<EncodedFrame> {
        if frame.format != PixelFormat::Bgr24 || frame.resolution != self.config.resolution {
            return Err(AppError::VideoError(format!(
                "Encoder expects BGR24 {}, got {} {}",
                self.config.resolution, frame.format, frame.resolution
            )));
        }

        if self.force_keyframe {
            // A reopened encoder starts a new GOP with SPS/PPS + IDR
            self.inner = Self::open()?;
            self.force_keyframe = false;
        }

        let rgb = bgr24_to_rgb24(frame.data());
        let dims = (
            self.config.resolution.width as usize,
            self.config.resolution.height as usize,
        );
        let source = openh264::formats::RgbSliceU8::new(&rgb, dims);
        let yuv = openh264::formats::YUVBuffer::from_rgb_source(source);

        let bitstream = self
            .inner
            .encode(&yuv)
            .map_err(|e| AppError::VideoError(format!("H.264 encode failed: {}", e)))?;
        let data = bitstream.to_vec();
        self.frames_encoded += 1;

        Ok(EncodedFrame {
            key_frame: is_h264_keyframe(&data),
            data: Bytes::from(data),
            pts: frame.pts,
        })
    }

    fn request_keyframe(&mut self) {
        self.force_keyframe = true;
    }
}

/// Factory for [`OpenH264Encoder`]
#[derive(Debug, Default, Clone, Copy)]
pub struct OpenH264Factory;

impl EncoderFactory for OpenH264Factory {
    fn create(&self, config: EncoderConfig) -> Result<Box<dyn FrameEncoder>> {
        Ok(Box::new(OpenH264Encoder::new(config)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyframe_detection() {
        // SPS, PPS, IDR
        let idr = [0, 0, 0, 1, 0x67, 1, 2, 0, 0, 0, 1, 0x68, 3, 0, 0, 1, 0x65, 9, 9];
        assert!(is_h264_keyframe(&idr));

        // Non-IDR slice only
        let p = [0, 0, 0, 1, 0x41, 7, 7, 7];
        assert!(!is_h264_keyframe(&p));

        assert!(!is_h264_keyframe(&[]));
        assert!(!is_h264_keyframe(&[0, 0, 1]));
    }

    #[test]
    fn test_rejects_odd_resolution() {
        let err = OpenH264Encoder::new(EncoderConfig::new(Resolution::new(5, 4), 30));
        assert!(err.is_err());
    }

    #[test]
    fn test_first_frame_is_keyframe() {
        let res = Resolution::new(64, 48);
        let mut encoder = OpenH264Encoder::new(EncoderConfig::new(res, 30)).unwrap();
        let mut frame = VideoFrame::black(res, PixelFormat::Bgr24);
        frame.pts = 1;

        let encoded = encoder.encode(&frame).unwrap();
        assert!(!encoded.is_empty());
        assert!(encoded.key_frame);
        assert_eq!(encoded.pts, 1);
        assert_eq!(encoder.frames_encoded(), 1);
    }

    #[test]
    fn test_rejects_mismatched_frame() {
        let mut encoder =
            OpenH264Encoder::new(EncoderConfig::new(Resolution::new(64, 48), 30)).unwrap();
        let frame = VideoFrame::black(Resolution::new(32, 24), PixelFormat::Bgr24);
        assert!(encoder.encode(&frame).is_err());
    }
}
