use chrono::{DateTime, Utc};

/// Bytes per pixel of the RGB8 layout every capture backend produces.
pub const RGB_CHANNELS: usize = 3;

/// One raw image pulled from a capture device. Consumed by a single encode.
#[derive(Debug, Clone)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    /// Packed RGB8 rows, top to bottom.
    pub data: Vec<u8>,
    /// Per-device read counter, starting at 1.
    pub sequence: u64,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>, sequence: u64) -> Self {
        Self {
            width,
            height,
            data,
            sequence,
            captured_at: Utc::now(),
        }
    }

    pub fn expected_len(&self) -> usize {
        self.width as usize * self.height as usize * RGB_CHANNELS
    }

    pub fn is_well_formed(&self) -> bool {
        self.width > 0 && self.height > 0 && self.data.len() == self.expected_len()
    }

    /// Pixel at `(x, y)`, `None` outside the frame or on a short buffer.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * RGB_CHANNELS;
        let px = self.data.get(offset..offset + RGB_CHANNELS)?;
        Some([px[0], px[1], px[2]])
    }
}

/// Compressed image bytes, produced once and written once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedFrame {
    pub bytes: Vec<u8>,
    pub sequence: u64,
}

impl EncodedFrame {
    pub fn new(bytes: Vec<u8>, sequence: u64) -> Self {
        Self { bytes, sequence }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
