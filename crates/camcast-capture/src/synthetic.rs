use camcast_types::{frame::Frame, Result};
use tracing::{debug, info};

use crate::{capture_error, CaptureDevice, DeviceOpener};

/// Hardware-free device producing a moving test pattern.
pub struct SyntheticCamera {
    index: u32,
    width: u32,
    height: u32,
    sequence: u64,
    frame_limit: Option<u64>,
}

impl SyntheticCamera {
    pub fn new(index: u32, width: u32, height: u32) -> Self {
        Self {
            index,
            width,
            height,
            sequence: 0,
            frame_limit: None,
        }
    }

    /// Report end-of-stream after `limit` frames.
    pub fn with_frame_limit(mut self, limit: u64) -> Self {
        self.frame_limit = Some(limit);
        self
    }

    fn render(&self) -> Vec<u8> {
        let (w, h) = (self.width as usize, self.height as usize);
        let bar = (self.sequence as usize * 4) % w.max(1);
        let mut data = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            for x in 0..w {
                if x.abs_diff(bar) < 2 {
                    data.extend_from_slice(&[255, 255, 255]);
                } else {
                    let r = (x * 255 / w.max(1)) as u8;
                    let g = (y * 255 / h.max(1)) as u8;
                    let b = (self.sequence % 256) as u8;
                    data.extend_from_slice(&[r, g, b]);
                }
            }
        }
        data
    }
}

impl CaptureDevice for SyntheticCamera {
    fn index(&self) -> u32 {
        self.index
    }

    fn configure(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn read(&mut self) -> Result<Frame> {
        if self.frame_limit.is_some_and(|limit| self.sequence >= limit) {
            return Err(capture_error("synthetic stream ended"));
        }
        self.sequence += 1;
        debug!("Synthetic frame {}", self.sequence);
        Ok(Frame::from_rgb(
            self.width,
            self.height,
            self.render(),
            self.sequence,
        ))
    }

    fn release(&mut self) {
        info!(
            "Synthetic camera {} stopped after {} frames",
            self.index, self.sequence
        );
    }
}

/// Opener that succeeds for every index with a synthetic camera.
#[derive(Debug, Clone)]
pub struct SyntheticOpener {
    width: u32,
    height: u32,
}

impl SyntheticOpener {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl DeviceOpener for SyntheticOpener {
    fn open(&self, index: u32) -> Result<Box<dyn CaptureDevice>> {
        info!("Opening synthetic camera {}", index);
        Ok(Box::new(SyntheticCamera::new(index, self.width, self.height)))
    }
}
