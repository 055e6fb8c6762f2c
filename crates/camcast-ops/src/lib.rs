//! Operational helpers: logging, startup checks, operator banner.

use std::{
    fs::OpenOptions,
    path::PathBuf,
    sync::Mutex,
};

use camcast_types::{config::OpsConfig, CamcastError, Result};
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

pub fn init_tracing(config: &OpsConfig) -> Result<()> {
    let filter = EnvFilter::try_new(config.log_level.clone())
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|err| CamcastError::Ops(format!("failed to create log filter: {err}")))?;

    let result = match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|err| CamcastError::Ops(format!("failed to open log file {path}: {err}")))?;
            fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
        }
        None => fmt().with_env_filter(filter).try_init(),
    };
    result.map_err(|err| CamcastError::Ops(format!("tracing init error: {err}")))?;
    Ok(())
}

/// Resolve the static file root, failing with `StaticRootMissing` when it is
/// not an existing directory.
pub fn ensure_static_root(path: &str) -> Result<PathBuf> {
    let dir = PathBuf::from(path);
    if !dir.is_dir() {
        return Err(CamcastError::StaticRootMissing(dir));
    }
    let resolved = dir.canonicalize().unwrap_or(dir);
    info!("HTTP server root set to: {:?}", resolved);
    Ok(resolved)
}

/// Operator-facing startup summary, one URL per line.
pub fn banner(title: &str, lines: &[(&str, String)]) -> String {
    let rule = "=".repeat(50);
    let mut out = format!("\n{rule}\n{title}\n");
    for (label, value) in lines {
        out.push_str(&format!("{label}: {value}\n"));
    }
    out.push_str(&rule);
    out.push('\n');
    out
}
