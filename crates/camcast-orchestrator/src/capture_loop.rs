use std::{sync::mpsc, thread, time::Duration};

use camcast_capture::CaptureHandle;
use camcast_encode::SnapshotWriter;
use camcast_network::NotificationSender;
use camcast_types::{frame::Frame, notification::NotificationMessage, Result};
use chrono::{DateTime, Local};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Local operator actions recognised by the capture loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Quit,
    Capture,
    ToggleFullscreen,
}

/// Source of at most one trigger per loop iteration.
pub trait TriggerSource {
    /// Wait up to `timeout` for a trigger. Unrecognised input yields `None`.
    fn poll_trigger(&mut self, timeout: Duration) -> Result<Option<Trigger>>;
}

impl TriggerSource for mpsc::Receiver<Trigger> {
    fn poll_trigger(&mut self, timeout: Duration) -> Result<Option<Trigger>> {
        match self.recv_timeout(timeout) {
            Ok(trigger) => Ok(Some(trigger)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => Ok(Some(Trigger::Quit)),
        }
    }
}

/// What the preview shows next to the frame.
#[derive(Debug, Clone, Default)]
pub struct PreviewState {
    pub fullscreen: bool,
    pub frames_seen: u64,
    pub captures: u64,
    pub last_capture: Option<DateTime<Local>>,
    pub snapshot_name: String,
}

/// Local display of the live frame. No network effect.
pub trait Preview {
    fn show(&mut self, frame: &Frame, state: &PreviewState) -> Result<()>;
    fn set_fullscreen(&mut self, fullscreen: bool) -> Result<()>;
    fn close(&mut self);
}

/// Headless preview.
#[derive(Debug, Default)]
pub struct NullPreview;

impl Preview for NullPreview {
    fn show(&mut self, _frame: &Frame, _state: &PreviewState) -> Result<()> {
        Ok(())
    }

    fn set_fullscreen(&mut self, _fullscreen: bool) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) {}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    Quit,
    Interrupted,
    CaptureFailed(String),
}

#[derive(Debug, Clone)]
pub struct LoopSummary {
    pub exit: LoopExit,
    pub frames_seen: u64,
    pub captures: u64,
}

/// Single-threaded cooperative loop: pull a frame, refresh the preview, poll
/// one trigger, yield.
pub struct CaptureLoop<T, P> {
    capture: CaptureHandle,
    writer: SnapshotWriter,
    notifier: NotificationSender,
    triggers: T,
    preview: P,
    key_poll: Duration,
    loop_yield: Duration,
    cancel: CancellationToken,
    state: PreviewState,
}

impl<T, P> CaptureLoop<T, P>
where
    T: TriggerSource,
    P: Preview,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        capture: CaptureHandle,
        writer: SnapshotWriter,
        notifier: NotificationSender,
        triggers: T,
        preview: P,
        key_poll: Duration,
        loop_yield: Duration,
        cancel: CancellationToken,
    ) -> Self {
        let state = PreviewState {
            snapshot_name: writer.filename(),
            ..Default::default()
        };
        Self {
            capture,
            writer,
            notifier,
            triggers,
            preview,
            key_poll,
            loop_yield,
            cancel,
            state,
        }
    }

    /// Run until quit, interrupt or capture failure. The device is released
    /// and the preview closed on every exit path.
    pub fn run(mut self) -> Result<LoopSummary> {
        let outcome = self.drive();
        self.capture.release();
        self.preview.close();
        let exit = outcome?;
        info!(
            "Capture loop finished ({:?}) after {} frames, {} captures",
            exit, self.state.frames_seen, self.state.captures
        );
        Ok(LoopSummary {
            exit,
            frames_seen: self.state.frames_seen,
            captures: self.state.captures,
        })
    }

    fn drive(&mut self) -> Result<LoopExit> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(LoopExit::Interrupted);
            }

            let frame = match self.capture.read_blocking() {
                Ok(frame) => frame,
                Err(err) => {
                    error!("Failed to capture frame: {}", err);
                    return Ok(LoopExit::CaptureFailed(err.to_string()));
                }
            };
            self.state.frames_seen += 1;
            self.preview.show(&frame, &self.state)?;

            match self.triggers.poll_trigger(self.key_poll)? {
                Some(Trigger::Quit) => return Ok(LoopExit::Quit),
                Some(Trigger::Capture) => self.capture_snapshot(&frame),
                Some(Trigger::ToggleFullscreen) => {
                    self.state.fullscreen = !self.state.fullscreen;
                    self.preview.set_fullscreen(self.state.fullscreen)?;
                }
                None => {}
            }

            thread::sleep(self.loop_yield);
        }
    }

    fn capture_snapshot(&mut self, frame: &Frame) {
        let record = match self.writer.write(frame) {
            Ok(record) => record,
            Err(err) => {
                warn!("Snapshot not saved, no notification sent: {}", err);
                return;
            }
        };
        self.state.captures += 1;
        self.state.last_capture = Some(record.written_at);

        let message = NotificationMessage::new_image_ready(self.writer.filename());
        match self.notifier.notify(message) {
            Ok(()) => info!(
                "Picture captured and saved as {} ({} bytes)",
                record.path.display(),
                record.bytes_written
            ),
            Err(err) => warn!("Snapshot saved but notification dropped: {}", err),
        }
    }
}
