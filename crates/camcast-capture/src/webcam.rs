//! nokhwa-backed webcam. The camera lives on its own thread and is driven by
//! commands, so the handle stays `Send` whatever the platform backend is.

use std::{
    sync::mpsc::{self, Receiver, Sender},
    thread::{self, JoinHandle},
};

use camcast_types::{frame::Frame, Result};
use nokhwa::{
    pixel_format::RgbFormat,
    utils::{CameraIndex, RequestedFormat, RequestedFormatType, Resolution},
    Camera,
};
use tracing::{debug, info, warn};

use crate::{capture_error, CaptureDevice, DeviceOpener};

enum Command {
    Read(Sender<Result<Frame>>),
    Configure {
        width: u32,
        height: u32,
        reply: Sender<(u32, u32)>,
    },
    Release,
}

pub struct WebcamDevice {
    index: u32,
    resolution: (u32, u32),
    commands: Option<Sender<Command>>,
    worker: Option<JoinHandle<()>>,
}

impl WebcamDevice {
    pub fn open(index: u32) -> Result<Self> {
        info!("Opening webcam {}", index);
        let (command_tx, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();

        let worker = thread::Builder::new()
            .name(format!("webcam-{index}"))
            .spawn(move || run_camera(index, command_rx, ready_tx))
            .map_err(|err| capture_error(format!("failed to spawn webcam thread: {err}")))?;

        let resolution = ready_rx
            .recv()
            .map_err(|_| capture_error(format!("webcam {index} thread exited during open")))??;
        info!(
            "Webcam {} opened at {}x{}",
            index, resolution.0, resolution.1
        );

        Ok(Self {
            index,
            resolution,
            commands: Some(command_tx),
            worker: Some(worker),
        })
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .as_ref()
            .ok_or_else(|| capture_error("webcam already released"))?
            .send(command)
            .map_err(|_| capture_error(format!("webcam {} thread is gone", self.index)))
    }
}

impl CaptureDevice for WebcamDevice {
    fn index(&self) -> u32 {
        self.index
    }

    fn configure(&mut self, width: u32, height: u32) {
        let (reply, reply_rx) = mpsc::channel();
        if self
            .send(Command::Configure {
                width,
                height,
                reply,
            })
            .is_err()
        {
            return;
        }
        if let Ok(actual) = reply_rx.recv() {
            self.resolution = actual;
        }
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }

    fn read(&mut self) -> Result<Frame> {
        let (reply, reply_rx) = mpsc::channel();
        self.send(Command::Read(reply))?;
        reply_rx
            .recv()
            .map_err(|_| capture_error(format!("webcam {} stopped mid-read", self.index)))?
    }

    fn release(&mut self) {
        if let Some(commands) = self.commands.take() {
            let _ = commands.send(Command::Release);
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("Webcam {} thread panicked during release", self.index);
            }
        }
    }
}

impl Drop for WebcamDevice {
    fn drop(&mut self) {
        self.release();
    }
}

fn run_camera(index: u32, commands: Receiver<Command>, ready: Sender<Result<(u32, u32)>>) {
    let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::AbsoluteHighestFrameRate);
    let mut camera = match Camera::new(CameraIndex::Index(index), requested) {
        Ok(camera) => camera,
        Err(err) => {
            let _ = ready.send(Err(capture_error(format!(
                "failed to open webcam {index}: {err}"
            ))));
            return;
        }
    };
    if let Err(err) = camera.open_stream() {
        let _ = ready.send(Err(capture_error(format!(
            "failed to start webcam {index}: {err}"
        ))));
        return;
    }
    let _ = ready.send(Ok(current_resolution(&camera)));

    let mut sequence = 0u64;
    while let Ok(command) = commands.recv() {
        match command {
            Command::Read(reply) => {
                let result = read_frame(&mut camera, sequence + 1);
                if result.is_ok() {
                    sequence += 1;
                }
                let _ = reply.send(result);
            }
            Command::Configure {
                width,
                height,
                reply,
            } => {
                if let Err(err) = camera.set_resolution(Resolution::new(width, height)) {
                    warn!("Webcam {} ignored resolution {}x{}: {}", index, width, height, err);
                }
                let _ = reply.send(current_resolution(&camera));
            }
            Command::Release => break,
        }
    }

    if let Err(err) = camera.stop_stream() {
        debug!("Webcam {} stop_stream failed: {}", index, err);
    }
    info!("Webcam {} stopped after {} frames", index, sequence);
}

fn current_resolution(camera: &Camera) -> (u32, u32) {
    let resolution = camera.resolution();
    (resolution.width(), resolution.height())
}

fn read_frame(camera: &mut Camera, sequence: u64) -> Result<Frame> {
    let buffer = camera
        .frame()
        .map_err(|err| capture_error(format!("failed to capture frame: {err}")))?;
    let decoded = buffer
        .decode_image::<RgbFormat>()
        .map_err(|err| capture_error(format!("failed to decode frame: {err}")))?;
    let (width, height) = (decoded.width(), decoded.height());
    Ok(Frame::from_rgb(width, height, decoded.into_raw(), sequence))
}

/// Opens real hardware through nokhwa.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebcamOpener;

impl DeviceOpener for WebcamOpener {
    fn open(&self, index: u32) -> Result<Box<dyn CaptureDevice>> {
        Ok(Box::new(WebcamDevice::open(index)?))
    }
}
