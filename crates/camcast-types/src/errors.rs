use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = CamcastError> = std::result::Result<T, E>;

/// Unified error type covering common failure scenarios across subsystems.
#[derive(Debug, Error)]
pub enum CamcastError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("no capture device could be opened (tried indices {tried:?})")]
    DeviceUnavailable { tried: Vec<u32> },
    #[error("capture error: {0}")]
    Capture(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("static root directory '{}' not found", .0.display())]
    StaticRootMissing(PathBuf),
    #[error("snapshot error: {0}")]
    Snapshot(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("orchestrator error: {0}")]
    Orchestrator(String),
    #[error("ui error: {0}")]
    Ui(String),
    #[error("operational error: {0}")]
    Ops(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CamcastError {
    /// Whether the error ends the process before any server is bound.
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            CamcastError::DeviceUnavailable { .. }
                | CamcastError::StaticRootMissing(_)
                | CamcastError::Configuration(_)
        )
    }
}
