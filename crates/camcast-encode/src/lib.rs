//! Frame compression and snapshot persistence.

mod snapshot;

use camcast_types::{
    frame::{EncodedFrame, Frame},
    CamcastError, Result,
};
use image::{codecs::jpeg::JpegEncoder as ImageJpegEncoder, ColorType};

pub use snapshot::{SnapshotRecord, SnapshotWriter};

pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Pure frame-to-bytes transform. Identical input and settings give identical
/// output.
pub trait FrameEncoder: Send + Sync {
    fn encode(&self, frame: &Frame) -> Result<EncodedFrame>;

    fn content_type(&self) -> &'static str;
}

#[derive(Debug, Clone, Copy)]
pub struct JpegEncoder {
    quality: u8,
}

impl JpegEncoder {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }
}

impl Default for JpegEncoder {
    fn default() -> Self {
        Self::new(DEFAULT_JPEG_QUALITY)
    }
}

impl FrameEncoder for JpegEncoder {
    fn encode(&self, frame: &Frame) -> Result<EncodedFrame> {
        if !frame.is_well_formed() {
            return Err(encode_error(format!(
                "frame {} is malformed: {}x{} with {} bytes (expected {})",
                frame.sequence,
                frame.width,
                frame.height,
                frame.data.len(),
                frame.expected_len()
            )));
        }
        let mut bytes = Vec::with_capacity(frame.data.len() / 8);
        ImageJpegEncoder::new_with_quality(&mut bytes, self.quality)
            .encode(&frame.data, frame.width, frame.height, ColorType::Rgb8)
            .map_err(|err| encode_error(format!("JPEG encoding failed: {err}")))?;
        Ok(EncodedFrame::new(bytes, frame.sequence))
    }

    fn content_type(&self) -> &'static str {
        "image/jpeg"
    }
}

pub fn encode_error(message: impl Into<String>) -> CamcastError {
    CamcastError::Encode(message.into())
}
