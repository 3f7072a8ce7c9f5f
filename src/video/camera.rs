//! Camera capability consumed by the teleoperator
//!
//! Capture drivers live outside this crate. The teleoperator only needs a
//! non-blocking "most recent frame" read from each attached camera.

use std::time::Instant;

use super::format::{PixelFormat, Resolution};
use super::frame::VideoFrame;
use crate::error::Result;

/// A camera that can be polled for its latest frame without blocking
pub trait CameraSource: Send {
    /// Most recent frame, or `None` when nothing new is available.
    ///
    /// Errors are treated by callers as "no frame".
    fn read_latest(&mut self) -> Result<Option<VideoFrame>>;
}

impl<F> CameraSource for F
where
    F: FnMut() -> Result<Option<VideoFrame>> + Send,
{
    fn read_latest(&mut self) -> Result<Option<VideoFrame>> {
        self()
    }
}

/// Synthetic RGB24 camera producing vertical colour bars with a moving stripe
pub struct TestPatternCamera {
    resolution: Resolution,
    started: Instant,
    /// Stripe speed in pixels per second
    speed: f64,
}

const BARS: [[u8; 3]; 8] = [
    [255, 255, 255],
    [255, 255, 0],
    [0, 255, 255],
    [0, 255, 0],
    [255, 0, 255],
    [255, 0, 0],
    [0, 0, 255],
    [0, 0, 0],
];

impl TestPatternCamera {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            started: Instant::now(),
            speed: 120.0,
        }
    }

    /// Render the pattern with the stripe at column `stripe`
    pub fn render(&self, stripe: u32) -> VideoFrame {
        let w = self.resolution.width as usize;
        let h = self.resolution.height as usize;
        let mut data = Vec::with_capacity(w * h * 3);
        for _ in 0..h {
            for x in 0..w {
                if x as u32 == stripe {
                    data.extend_from_slice(&[128, 128, 128]);
                } else {
                    data.extend_from_slice(&BARS[x * BARS.len() / w.max(1)]);
                }
            }
        }
        VideoFrame::from_vec(data, self.resolution, PixelFormat::Rgb24)
    }
}

impl CameraSource for TestPatternCamera {
    fn read_latest(&mut self) -> Result<Option<VideoFrame>> {
        if self.resolution.pixels() == 0 {
            return Ok(None);
        }
        let travelled = self.started.elapsed().as_secs_f64() * self.speed;
        let stripe = (travelled as u64 % self.resolution.width as u64) as u32;
        Ok(Some(self.render(stripe)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;

    #[test]
    fn test_pattern_is_well_formed_rgb() {
        let mut cam = TestPatternCamera::new(Resolution::new(16, 4));
        let frame = cam.read_latest().unwrap().unwrap();
        assert_eq!(frame.format, PixelFormat::Rgb24);
        assert!(frame.is_well_formed());
        assert!(!frame.is_black());
    }

    #[test]
    fn test_stripe_position() {
        let cam = TestPatternCamera::new(Resolution::new(8, 1));
        let frame = cam.render(3);
        assert_eq!(&frame.data()[9..12], &[128, 128, 128]);
        assert_eq!(&frame.data()[0..3], &[255, 255, 255]);
    }

    #[test]
    fn test_closure_camera() {
        let mut calls = 0;
        let mut cam = move || -> Result<Option<VideoFrame>> {
            calls += 1;
            if calls == 1 {
                Ok(None)
            } else {
                Err(AppError::CameraError {
                    camera: "wrist".into(),
                    reason: "unplugged".into(),
                })
            }
        };
        assert!(cam.read_latest().unwrap().is_none());
        assert!(cam.read_latest().is_err());
    }
}
