//! Paced per-camera frame source for outbound video tracks
//!
//! Frames are scheduled against absolute deadlines `t0 + n / fps`, so scheduler
//! jitter on one pull never accumulates into drift. A pull that arrives late
//! emits immediately.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::buffer::CameraFrameBuffer;
use super::convert::to_bgr24;
use super::format::{PixelFormat, Resolution};
use super::frame::VideoFrame;
use crate::utils::LogThrottler;

/// Output pixel format of every track source
pub const TRACK_PIXEL_FORMAT: PixelFormat = PixelFormat::Bgr24;

/// Frame source for one camera
pub struct VideoTrackSource {
    camera_name: String,
    frames: Arc<CameraFrameBuffer>,
    resolution: Resolution,
    fps: u32,
    start_time: Option<Instant>,
    frame_count: u64,
    /// Black frame reused whenever no usable camera data exists
    filler: VideoFrame,
    throttler: LogThrottler,
}

impl VideoTrackSource {
    pub fn new(
        camera_name: impl Into<String>,
        frames: Arc<CameraFrameBuffer>,
        resolution: Resolution,
        fps: u32,
    ) -> Self {
        Self {
            camera_name: camera_name.into(),
            frames,
            resolution,
            fps: fps.max(1),
            start_time: None,
            frame_count: 0,
            filler: VideoFrame::black(resolution, TRACK_PIXEL_FORMAT),
            throttler: LogThrottler::with_secs(5),
        }
    }

    pub fn camera_name(&self) -> &str {
        &self.camera_name
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    /// Nominal duration of one frame
    pub fn frame_duration(&self) -> Duration {
        Duration::from_nanos(1_000_000_000 / self.fps as u64)
    }

    /// Frames emitted so far
    pub fn frames_emitted(&self) -> u64 {
        self.frame_count
    }

    /// Wait for the next frame slot and return the frame for it.
    ///
    /// Never fails: missing or unusable camera data yields a black frame.
    pub async fn next_frame(&mut self) -> VideoFrame {
        let start = *self.start_time.get_or_insert_with(Instant::now);

        let offset = Duration::from_nanos(
            self.frame_count.saturating_mul(1_000_000_000) / self.fps as u64,
        );
        let target = start + offset;
        if Instant::now() < target {
            tokio::time::sleep_until(target).await;
        }

        self.frame_count += 1;

        let mut frame = self.acquire();
        frame.pts = self.frame_count;
        frame
    }

    fn acquire(&self) -> VideoFrame {
        let Some(raw) = self.frames.get(&self.camera_name) else {
            return self.filler.clone();
        };

        match to_bgr24(&raw, self.resolution) {
            Ok(frame) => {
                self.throttler.clear("convert");
                frame
            }
            Err(e) => {
                if self.throttler.should_log("convert") {
                    warn!(
                        "Camera {} frame unusable, sending black frame: {}",
                        self.camera_name, e
                    );
                } else {
                    debug!("Camera {} frame unusable: {}", self.camera_name, e);
                }
                self.filler.clone()
            }
        }
    }
}
