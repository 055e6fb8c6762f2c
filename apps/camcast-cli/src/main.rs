mod ui;

use std::{
    env,
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use anyhow::Result;
use camcast_capture::{open_first, CaptureHandle, SyntheticOpener};
use camcast_encode::JpegEncoder;
use camcast_network::VIDEO_FEED_PATH;
use camcast_ops::{banner, init_tracing};
use camcast_orchestrator::{SnapshotSession, StreamServer};
use camcast_types::{config::CamcastConfig, CamcastError};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const SNAPSHOT_LOG_FILE: &str = "camcast.log";

/// camcast - webcam M-JPEG streaming and snapshot notifications. Hardware
/// capture needs a build with `--features webcam`; otherwise run with
/// `--synthetic`.
#[derive(Parser, Debug)]
#[command(name = "camcast")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// TOML config file layered over the built-in defaults
    #[arg(long, env = "CAMCAST_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Serve a continuous M-JPEG stream at /video_feed plus static files
    Stream {
        #[command(flatten)]
        common: CommonArgs,

        /// Delay between parts sent to each client
        #[arg(long)]
        frame_delay_ms: Option<u64>,
    },
    /// Capture on keypress and notify WebSocket subscribers
    Snapshot {
        #[command(flatten)]
        common: CommonArgs,

        #[arg(long)]
        ws_port: Option<u16>,

        /// File name the snapshot is saved and announced under
        #[arg(long)]
        filename: Option<String>,

        /// Log destination while the terminal preview is active
        #[arg(long)]
        log_file: Option<String>,
    },
}

#[derive(Args, Debug, Default)]
struct CommonArgs {
    #[arg(long)]
    host: Option<String>,

    /// HTTP port
    #[arg(long)]
    port: Option<u16>,

    /// Device indices to try in order, comma separated
    #[arg(long, value_delimiter = ',')]
    devices: Option<Vec<u32>>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Directory served by the static file server
    #[arg(long)]
    static_root: Option<String>,

    /// Use the built-in test pattern instead of a webcam
    #[arg(long)]
    synthetic: bool,

    /// tracing filter, e.g. `info` or `camcast_network=debug`
    #[arg(long)]
    log: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let at_startup = err
                .downcast_ref::<CamcastError>()
                .is_some_and(CamcastError::is_startup_fatal);
            if at_startup {
                error!("Startup failed, no server was started: {err:#}");
            } else {
                error!("camcast failed: {err:#}");
            }
            eprintln!("Error: {err:#}");
            exit_code(&err)
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = load_config(cli.config.as_deref());
    config.apply_env(|key| env::var(key).ok())?;
    apply_flags(&mut config, &cli.mode);
    config.validate()?;

    let cancel = CancellationToken::new();
    spawn_interrupt_watch(cancel.clone());

    match cli.mode {
        Mode::Stream { .. } => run_stream(config, cancel).await,
        Mode::Snapshot { .. } => run_snapshot(config, cancel).await,
    }
}

async fn run_stream(config: CamcastConfig, cancel: CancellationToken) -> Result<()> {
    init_tracing(&config.ops)?;
    let capture = open_capture(&config)?;

    let encoder = Arc::new(JpegEncoder::new(config.capture.jpeg_quality));
    let (host, port) = (config.server.host.clone(), config.server.http_port);
    let mut server = StreamServer::new(config, capture, encoder);
    let root = server.resolve_static_root()?;
    println!("{}", stream_banner(&host, port, &root));

    server.run(cancel).await?;
    Ok(())
}

async fn run_snapshot(mut config: CamcastConfig, cancel: CancellationToken) -> Result<()> {
    if config.ops.log_file.is_none() {
        config.ops.log_file = Some(SNAPSHOT_LOG_FILE.into());
    }
    init_tracing(&config.ops)?;
    let capture = open_capture(&config)?;

    let text = snapshot_banner(&config);
    info!("{}", text);
    println!("{}", text);

    let endpoints = format!(
        "ws://{host}:{}  http://{host}:{}/{}",
        config.server.ws_port,
        config.server.http_port,
        config.snapshot.filename,
        host = config.server.host
    );
    let preview = match ui::TerminalPreview::new(endpoints) {
        Ok(preview) => preview,
        Err(err) => {
            capture.release();
            return Err(err.into());
        }
    };
    let summary = SnapshotSession::new(config, capture, cancel)
        .run(ui::KeyboardTriggers, preview)
        .await?;
    println!(
        "Webcam closed ({:?}, {} frames, {} captures)",
        summary.exit, summary.frames_seen, summary.captures
    );
    Ok(())
}

fn stream_banner(host: &str, port: u16, root: &Path) -> String {
    banner(
        "M-JPEG Video Server Started!",
        &[
            ("File Server Root", root.display().to_string()),
            ("Access Client", format!("http://{host}:{port}/index-2.html")),
            ("Stream URL", format!("http://{host}:{port}{VIDEO_FEED_PATH}")),
        ],
    )
}

fn snapshot_banner(config: &CamcastConfig) -> String {
    let host = &config.server.host;
    banner(
        "Webcam Server Started!",
        &[
            ("WS Server", format!("ws://{host}:{}", config.server.ws_port)),
            ("HTTP Server", format!("http://{host}:{}", config.server.http_port)),
            ("Snapshot", config.snapshot.filename.clone()),
        ],
    )
}

fn load_config(path: Option<&Path>) -> CamcastConfig {
    let Some(path) = path else {
        return CamcastConfig::default();
    };
    match CamcastConfig::from_file(path) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!(
                "Failed to load config from '{}': {err}. Falling back to internal defaults.",
                path.display()
            );
            CamcastConfig::default()
        }
    }
}

fn apply_flags(config: &mut CamcastConfig, mode: &Mode) {
    let common = match mode {
        Mode::Stream {
            common,
            frame_delay_ms,
        } => {
            if let Some(delay) = frame_delay_ms {
                config.stream.frame_delay_ms = *delay;
            }
            if let Some(root) = &common.static_root {
                config.stream.static_root = root.clone();
            }
            common
        }
        Mode::Snapshot {
            common,
            ws_port,
            filename,
            log_file,
        } => {
            if let Some(port) = ws_port {
                config.server.ws_port = *port;
            }
            if let Some(filename) = filename {
                config.snapshot.filename = filename.clone();
            }
            if let Some(root) = &common.static_root {
                config.snapshot.static_root = root.clone();
            }
            if let Some(path) = log_file {
                config.ops.log_file = Some(path.clone());
            }
            common
        }
    };

    if let Some(host) = &common.host {
        config.server.host = host.clone();
    }
    if let Some(port) = common.port {
        config.server.http_port = port;
    }
    if let Some(devices) = &common.devices {
        config.capture.device_indices = devices.clone();
    }
    if let Some(width) = common.width {
        config.capture.frame_width = width;
    }
    if let Some(height) = common.height {
        config.capture.frame_height = height;
    }
    if common.synthetic {
        config.capture.synthetic = true;
    }
    if let Some(level) = &common.log {
        config.ops.log_level = level.clone();
    }
}

fn open_capture(config: &CamcastConfig) -> camcast_types::Result<CaptureHandle> {
    let (width, height) = (config.capture.frame_width, config.capture.frame_height);
    let candidates = &config.capture.device_indices;
    let capture = if config.capture.synthetic {
        open_first(&SyntheticOpener::new(width, height), candidates)?
    } else {
        open_webcam(candidates)?
    };
    capture.configure(width, height)?;
    Ok(capture)
}

#[cfg(feature = "webcam")]
fn open_webcam(candidates: &[u32]) -> camcast_types::Result<CaptureHandle> {
    open_first(&camcast_capture::WebcamOpener, candidates)
}

#[cfg(not(feature = "webcam"))]
fn open_webcam(candidates: &[u32]) -> camcast_types::Result<CaptureHandle> {
    error!("Built without webcam support; rebuild with --features webcam or pass --synthetic");
    Err(CamcastError::DeviceUnavailable {
        tried: candidates.to_vec(),
    })
}

fn spawn_interrupt_watch(cancel: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                cancel.cancel();
            }
            _ = cancel.cancelled() => {}
        }
    });
}

fn exit_code(err: &anyhow::Error) -> ExitCode {
    match err.downcast_ref::<CamcastError>() {
        Some(CamcastError::DeviceUnavailable { .. }) => ExitCode::from(2),
        Some(CamcastError::StaticRootMissing(_)) => ExitCode::from(3),
        _ => ExitCode::FAILURE,
    }
}
