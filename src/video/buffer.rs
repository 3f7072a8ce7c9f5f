//! Latest-wins store of the most recent frame per camera

use parking_lot::Mutex;
use std::collections::HashMap;

use super::frame::VideoFrame;

/// Camera frame buffer shared by the control loop (writer) and video tracks (readers)
#[derive(Debug, Default)]
pub struct CameraFrameBuffer {
    frames: Mutex<HashMap<String, VideoFrame>>,
}

impl CameraFrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the frame stored for `name`
    pub fn put(&self, name: impl Into<String>, frame: VideoFrame) {
        self.frames.lock().insert(name.into(), frame);
    }

    /// Most recent frame for `name`, if any has been stored
    pub fn get(&self, name: &str) -> Option<VideoFrame> {
        self.frames.lock().get(name).cloned()
    }

    pub fn remove(&self, name: &str) -> Option<VideoFrame> {
        self.frames.lock().remove(name)
    }

    /// Camera names that currently hold a frame
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.frames.lock().keys().cloned().collect();
        names.sort();
        names
    }
}
