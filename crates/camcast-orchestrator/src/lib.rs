//! Wiring for the two deployment modes: continuous M-JPEG streaming and
//! keypress snapshots with subscriber notifications.

mod capture_loop;
mod snapshot;
mod stream;

use camcast_types::CamcastError;

pub use capture_loop::{
    CaptureLoop, LoopExit, LoopSummary, NullPreview, Preview, PreviewState, Trigger, TriggerSource,
};
pub use snapshot::SnapshotSession;
pub use stream::StreamServer;

pub fn orchestrator_error(message: impl Into<String>) -> CamcastError {
    CamcastError::Orchestrator(message.into())
}
