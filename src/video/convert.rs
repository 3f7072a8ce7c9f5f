//! Pixel format conversion utilities
//!
//! Camera buffers arrive in whatever format and size the source produces;
//! outbound tracks always carry BGR24 at the configured resolution.

use crate::error::{AppError, Result};
use crate::video::format::{PixelFormat, Resolution};
use crate::video::frame::VideoFrame;

/// Convert `frame` to BGR24 at `target`, scaling with nearest neighbour if needed
pub fn to_bgr24(frame: &VideoFrame, target: Resolution) -> Result<VideoFrame> {
    if !frame.is_well_formed() {
        return Err(AppError::VideoError(format!(
            "{} frame {} has {} bytes, expected {}",
            frame.format,
            frame.resolution,
            frame.len(),
            frame.format.frame_size(frame.resolution)
        )));
    }
    if frame.resolution.pixels() == 0 {
        return Err(AppError::VideoError("empty source frame".to_string()));
    }

    if frame.format == PixelFormat::Bgr24 && frame.resolution == target {
        let mut out = frame.clone();
        out.format = PixelFormat::Bgr24;
        return Ok(out);
    }

    let src = frame.data();
    let src_w = frame.resolution.width as usize;
    let src_h = frame.resolution.height as usize;
    let dst_w = target.width as usize;
    let dst_h = target.height as usize;
    let bpp = frame.format.bytes_per_pixel();

    let mut out = Vec::with_capacity(dst_w * dst_h * 3);
    for y in 0..dst_h {
        let sy = y * src_h / dst_h;
        let row = sy * src_w;
        for x in 0..dst_w {
            let sx = x * src_w / dst_w;
            let i = (row + sx) * bpp;
            match frame.format {
                PixelFormat::Bgr24 => out.extend_from_slice(&src[i..i + 3]),
                PixelFormat::Rgb24 => out.extend_from_slice(&[src[i + 2], src[i + 1], src[i]]),
                PixelFormat::Grey => out.extend_from_slice(&[src[i], src[i], src[i]]),
            }
        }
    }

    let mut converted = VideoFrame::from_vec(out, target, PixelFormat::Bgr24);
    converted.capture_ts = frame.capture_ts;
    Ok(converted)
}

/// Reorder a packed BGR24 buffer into RGB24
pub fn bgr24_to_rgb24(bgr: &[u8]) -> Vec<u8> {
    let mut rgb = Vec::with_capacity(bgr.len());
    for px in bgr.chunks_exact(3) {
        rgb.extend_from_slice(&[px[2], px[1], px[0]]);
    }
    rgb
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bgr_passthrough() {
        let res = Resolution::new(2, 2);
        let frame = VideoFrame::from_vec((0..12).collect(), res, PixelFormat::Bgr24);
        let out = to_bgr24(&frame, res).unwrap();
        assert_eq!(out.data(), frame.data());
    }

    #[test]
    fn test_rgb_swapped_and_upscaled() {
        let frame = VideoFrame::from_vec(vec![10, 20, 30], Resolution::new(1, 1), PixelFormat::Rgb24);
        let out = to_bgr24(&frame, Resolution::new(2, 2)).unwrap();
        assert_eq!(out.resolution, Resolution::new(2, 2));
        assert_eq!(out.data(), &[30, 20, 10, 30, 20, 10, 30, 20, 10, 30, 20, 10]);
    }

    #[test]
    fn test_grey_downscaled() {
        let frame = VideoFrame::from_vec(vec![1, 2, 3, 4], Resolution::new(2, 2), PixelFormat::Grey);
        let out = to_bgr24(&frame, Resolution::new(1, 1)).unwrap();
        assert_eq!(out.data(), &[1, 1, 1]);
    }

    #[test]
    fn test_truncated_frame_rejected() {
        let frame = VideoFrame::from_vec(vec![0; 5], Resolution::new(2, 2), PixelFormat::Bgr24);
        assert!(to_bgr24(&frame, Resolution::new(2, 2)).is_err());
    }

    #[test]
    fn test_bgr_to_rgb() {
        assert_eq!(bgr24_to_rgb24(&[1, 2, 3, 4, 5, 6]), vec![3, 2, 1, 6, 5, 4]);
    }
}
