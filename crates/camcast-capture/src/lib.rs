//! Capture device abstraction layer.

mod synthetic;
#[cfg(feature = "webcam")]
mod webcam;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use camcast_types::{frame::Frame, CamcastError, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

pub use synthetic::{SyntheticCamera, SyntheticOpener};
#[cfg(feature = "webcam")]
pub use webcam::{WebcamDevice, WebcamOpener};

/// An open video input device. Implementations may block inside `read`.
pub trait CaptureDevice: Send {
    fn index(&self) -> u32;
    /// Best-effort resolution request; devices are free to ignore it.
    fn configure(&mut self, width: u32, height: u32);
    fn resolution(&self) -> (u32, u32);
    fn read(&mut self) -> Result<Frame>;
    fn release(&mut self);
}

/// Opens a device by index.
pub trait DeviceOpener {
    fn open(&self, index: u32) -> Result<Box<dyn CaptureDevice>>;
}

/// Async frame pull used by the network layer.
#[async_trait]
pub trait FrameSource: Send + Sync {
    async fn read_frame(&self) -> Result<Frame>;
}

/// Aggregated capture counters.
#[derive(Debug, Default, Clone)]
pub struct CaptureMetrics {
    pub frames_read: u64,
    pub failed_reads: u64,
    pub last_frame_at: Option<DateTime<Utc>>,
}

/// Try each candidate index in order and wrap the first device that opens.
pub fn open_first(opener: &dyn DeviceOpener, candidates: &[u32]) -> Result<CaptureHandle> {
    for &index in candidates {
        match opener.open(index) {
            Ok(device) => {
                info!("Capture device {} opened", index);
                return Ok(CaptureHandle::new(device));
            }
            Err(err) => warn!("Camera {} not available: {}", index, err),
        }
    }
    Err(CamcastError::DeviceUnavailable {
        tried: candidates.to_vec(),
    })
}

struct Shared {
    index: u32,
    device: Mutex<Option<Box<dyn CaptureDevice>>>,
    metrics: Mutex<CaptureMetrics>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Ok(slot) = self.device.get_mut() {
            if let Some(mut device) = slot.take() {
                device.release();
                info!("Capture device {} released on drop", self.index);
            }
        }
    }
}

/// Process-wide handle to the open device. Cloning shares the device; reads
/// are serialized behind the inner lock.
#[derive(Clone)]
pub struct CaptureHandle {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for CaptureHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureHandle")
            .field("index", &self.shared.index)
            .finish_non_exhaustive()
    }
}

impl CaptureHandle {
    pub fn new(device: Box<dyn CaptureDevice>) -> Self {
        let index = device.index();
        Self {
            shared: Arc::new(Shared {
                index,
                device: Mutex::new(Some(device)),
                metrics: Mutex::new(CaptureMetrics::default()),
            }),
        }
    }

    pub fn index(&self) -> u32 {
        self.shared.index
    }

    pub fn configure(&self, width: u32, height: u32) -> Result<()> {
        let mut guard = self.lock_device()?;
        if let Some(device) = guard.as_mut() {
            device.configure(width, height);
            let (actual_w, actual_h) = device.resolution();
            if (actual_w, actual_h) != (width, height) {
                warn!(
                    "Requested {}x{} but device {} delivers {}x{}",
                    width, height, self.shared.index, actual_w, actual_h
                );
            } else {
                info!("Device {} configured to {}x{}", self.shared.index, width, height);
            }
        }
        Ok(())
    }

    pub fn resolution(&self) -> Option<(u32, u32)> {
        self.lock_device()
            .ok()
            .and_then(|guard| guard.as_ref().map(|device| device.resolution()))
    }

    pub fn is_open(&self) -> bool {
        self.lock_device()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    /// Pull one frame, blocking the calling thread.
    pub fn read_blocking(&self) -> Result<Frame> {
        let mut guard = self.lock_device()?;
        let Some(device) = guard.as_mut() else {
            return Err(capture_error(format!(
                "device {} already released",
                self.shared.index
            )));
        };
        let result = device.read();
        drop(guard);
        self.record(&result);
        result
    }

    /// Idempotent; later reads fail with a capture error.
    pub fn release(&self) {
        let Ok(mut guard) = self.lock_device() else {
            return;
        };
        if let Some(mut device) = guard.take() {
            device.release();
            drop(guard);
            let metrics = self.metrics();
            info!(
                "Capture device {} released after {} frames ({} failed reads)",
                self.shared.index, metrics.frames_read, metrics.failed_reads
            );
        } else {
            debug!("Capture device {} already released", self.shared.index);
        }
    }

    pub fn metrics(&self) -> CaptureMetrics {
        self.shared
            .metrics
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    fn lock_device(&self) -> Result<std::sync::MutexGuard<'_, Option<Box<dyn CaptureDevice>>>> {
        self.shared
            .device
            .lock()
            .map_err(|_| capture_error("capture device lock poisoned"))
    }

    fn record(&self, result: &Result<Frame>) {
        if let Ok(mut metrics) = self.shared.metrics.lock() {
            match result {
                Ok(frame) => {
                    metrics.frames_read += 1;
                    metrics.last_frame_at = Some(frame.captured_at);
                }
                Err(_) => metrics.failed_reads += 1,
            }
        }
    }
}

#[async_trait]
impl FrameSource for CaptureHandle {
    async fn read_frame(&self) -> Result<Frame> {
        let handle = self.clone();
        tokio::task::spawn_blocking(move || handle.read_blocking())
            .await
            .map_err(|err| capture_error(format!("capture task failed: {err}")))?
    }
}

/// Generate an error aligned with capture semantics.
pub fn capture_error(message: impl Into<String>) -> CamcastError {
    CamcastError::Capture(message.into())
}
