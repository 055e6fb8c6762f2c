use std::{
    fs,
    path::{Path, PathBuf},
};

use camcast_types::{frame::Frame, CamcastError, Result};
use chrono::{DateTime, Local};
use tracing::debug;

use crate::{FrameEncoder, JpegEncoder};

/// Outcome of one snapshot write.
#[derive(Debug, Clone)]
pub struct SnapshotRecord {
    pub path: PathBuf,
    pub bytes_written: usize,
    pub sequence: u64,
    pub written_at: DateTime<Local>,
}

/// Writes the latest captured frame to a single fixed path.
pub struct SnapshotWriter<E = JpegEncoder> {
    path: PathBuf,
    encoder: E,
}

impl SnapshotWriter<JpegEncoder> {
    pub fn jpeg(path: impl Into<PathBuf>, quality: u8) -> Self {
        Self::new(path, JpegEncoder::new(quality))
    }
}

impl<E: FrameEncoder> SnapshotWriter<E> {
    pub fn new(path: impl Into<PathBuf>, encoder: E) -> Self {
        Self {
            path: path.into(),
            encoder,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name announced to subscribers.
    pub fn filename(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Encode `frame` and replace whatever the path held. The bytes land in a
    /// sibling temp file first so the path never holds a partial image.
    pub fn write(&self, frame: &Frame) -> Result<SnapshotRecord> {
        let encoded = self.encoder.encode(frame)?;
        let temp = self.temp_path();
        fs::write(&temp, &encoded.bytes).map_err(|err| {
            snapshot_error(format!("failed to write {}: {err}", temp.display()))
        })?;
        if let Err(err) = fs::rename(&temp, &self.path) {
            let _ = fs::remove_file(&temp);
            return Err(snapshot_error(format!(
                "failed to replace {}: {err}",
                self.path.display()
            )));
        }
        debug!(
            "Snapshot {} written to {:?} ({} bytes)",
            frame.sequence,
            self.path,
            encoded.len()
        );
        Ok(SnapshotRecord {
            path: self.path.clone(),
            bytes_written: encoded.len(),
            sequence: frame.sequence,
            written_at: Local::now(),
        })
    }

    fn temp_path(&self) -> PathBuf {
        let name = format!(".{}.tmp", self.filename());
        self.path.with_file_name(name)
    }
}

pub fn snapshot_error(message: impl Into<String>) -> CamcastError {
    CamcastError::Snapshot(message.into())
}
