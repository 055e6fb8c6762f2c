use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{CamcastError, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub http_port: u16,
    pub ws_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            http_port: 8000,
            ws_port: 8765,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Device indices tried in order until one opens.
    pub device_indices: Vec<u32>,
    pub frame_width: u32,
    pub frame_height: u32,
    pub jpeg_quality: u8,
    /// Use the built-in test pattern instead of hardware.
    pub synthetic: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device_indices: vec![0, 1],
            frame_width: 1280,
            frame_height: 720,
            jpeg_quality: 95,
            synthetic: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub frame_delay_ms: u64,
    pub static_root: String,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            frame_delay_ms: 33,
            static_root: "display".into(),
        }
    }
}

impl StreamConfig {
    pub fn frame_delay(&self) -> Duration {
        Duration::from_millis(self.frame_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub filename: String,
    pub static_root: String,
    pub key_poll_ms: u64,
    pub loop_yield_ms: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            filename: "captured_latest.jpg".into(),
            static_root: ".".into(),
            key_poll_ms: 1,
            loop_yield_ms: 10,
        }
    }
}

impl SnapshotConfig {
    /// Location the snapshot is written to; served by the static file server.
    pub fn path(&self) -> PathBuf {
        Path::new(&self.static_root).join(&self.filename)
    }

    pub fn key_poll(&self) -> Duration {
        Duration::from_millis(self.key_poll_ms)
    }

    pub fn loop_yield(&self) -> Duration {
        Duration::from_millis(self.loop_yield_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpsConfig {
    pub log_level: String,
    /// When set, logs go to this file instead of stderr.
    pub log_file: Option<String>,
}

impl Default for OpsConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CamcastConfig {
    pub server: ServerConfig,
    pub capture: CaptureConfig,
    pub stream: StreamConfig,
    pub snapshot: SnapshotConfig,
    pub ops: OpsConfig,
}

impl CamcastConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref).map_err(|err| {
            CamcastError::Configuration(format!(
                "unable to read config file {}: {err}",
                path_ref.display()
            ))
        })?;
        toml::from_str(&contents).map_err(|err| {
            CamcastError::Configuration(format!(
                "failed to parse config file {}: {err}",
                path_ref.display()
            ))
        })
    }

    /// Apply `CAMCAST_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("CAMCAST_HOST") {
            self.server.host = host;
        }
        if let Some(port) = lookup("CAMCAST_HTTP_PORT") {
            self.server.http_port = parse_env("CAMCAST_HTTP_PORT", &port)?;
        }
        if let Some(port) = lookup("CAMCAST_WS_PORT") {
            self.server.ws_port = parse_env("CAMCAST_WS_PORT", &port)?;
        }
        if let Some(width) = lookup("CAMCAST_FRAME_WIDTH") {
            self.capture.frame_width = parse_env("CAMCAST_FRAME_WIDTH", &width)?;
        }
        if let Some(height) = lookup("CAMCAST_FRAME_HEIGHT") {
            self.capture.frame_height = parse_env("CAMCAST_FRAME_HEIGHT", &height)?;
        }
        if let Some(delay) = lookup("CAMCAST_FRAME_DELAY_MS") {
            self.stream.frame_delay_ms = parse_env("CAMCAST_FRAME_DELAY_MS", &delay)?;
        }
        if let Some(filename) = lookup("CAMCAST_SNAPSHOT_FILENAME") {
            self.snapshot.filename = filename;
        }
        if let Some(root) = lookup("CAMCAST_STATIC_ROOT") {
            self.stream.static_root = root.clone();
            self.snapshot.static_root = root;
        }
        if let Some(devices) = lookup("CAMCAST_DEVICES") {
            self.capture.device_indices = parse_device_list(&devices)?;
        }
        if let Some(level) = lookup("CAMCAST_LOG") {
            self.ops.log_level = level;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.http_port == 0 {
            return Err(CamcastError::Configuration(
                "server.http_port must be a valid port (>0)".into(),
            ));
        }
        if self.server.ws_port == 0 {
            return Err(CamcastError::Configuration(
                "server.ws_port must be a valid port (>0)".into(),
            ));
        }
        if self.capture.device_indices.is_empty() {
            return Err(CamcastError::Configuration(
                "capture.device_indices must list at least one device".into(),
            ));
        }
        if self.capture.frame_width == 0 || self.capture.frame_height == 0 {
            return Err(CamcastError::Configuration(
                "capture frame dimensions must be greater than zero".into(),
            ));
        }
        if !(1..=100).contains(&self.capture.jpeg_quality) {
            return Err(CamcastError::Configuration(
                "capture.jpeg_quality must be between 1 and 100".into(),
            ));
        }
        let filename = Path::new(&self.snapshot.filename);
        let bare = filename
            .file_name()
            .is_some_and(|name| name == filename.as_os_str());
        if !bare {
            return Err(CamcastError::Configuration(format!(
                "snapshot.filename must be a bare file name, got '{}'",
                self.snapshot.filename
            )));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        CamcastError::Configuration(format!("{key} has an invalid value '{value}'"))
    })
}

fn parse_device_list(value: &str) -> Result<Vec<u32>> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| parse_env("CAMCAST_DEVICES", part))
        .collect()
}
