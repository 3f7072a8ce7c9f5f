//! Video frame data structures

use bytes::Bytes;
use std::time::Instant;

use super::format::{PixelFormat, Resolution};

/// A raw video frame with metadata
///
/// Cloning is cheap: pixel data is reference counted.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    /// Raw pixel data, tightly packed rows
    data: Bytes,
    /// Frame resolution
    pub resolution: Resolution,
    /// Pixel format
    pub format: PixelFormat,
    /// Presentation index in units of 1/fps (0 for frames not yet emitted by a track)
    pub pts: u64,
    /// Timestamp when frame was captured or synthesized
    pub capture_ts: Instant,
}

impl VideoFrame {
    /// Create a new video frame
    pub fn new(data: Bytes, resolution: Resolution, format: PixelFormat) -> Self {
        Self {
            data,
            resolution,
            format,
            pts: 0,
            capture_ts: Instant::now(),
        }
    }

    /// Create a frame from a Vec<u8>
    pub fn from_vec(data: Vec<u8>, resolution: Resolution, format: PixelFormat) -> Self {
        Self::new(Bytes::from(data), resolution, format)
    }

    /// All-zero (black) frame
    pub fn black(resolution: Resolution, format: PixelFormat) -> Self {
        Self::from_vec(
            vec![0u8; format.frame_size(resolution)],
            resolution,
            format,
        )
    }

    /// Get frame data as bytes slice
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get data length
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if frame is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Data length matches format and resolution
    pub fn is_well_formed(&self) -> bool {
        self.data.len() == self.format.frame_size(self.resolution)
    }

    /// Every byte is zero
    pub fn is_black(&self) -> bool {
        self.data.iter().all(|b| *b == 0)
    }
}
