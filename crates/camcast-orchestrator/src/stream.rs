use std::{path::PathBuf, sync::Arc};

use camcast_capture::CaptureHandle;
use camcast_encode::FrameEncoder;
use camcast_network::{bind, serve, stream_router, StreamContext};
use camcast_ops::ensure_static_root;
use camcast_types::{config::CamcastConfig, Result};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Stream mode: every `/video_feed` client pulls its own M-JPEG sequence from
/// the one shared capture handle.
pub struct StreamServer {
    config: CamcastConfig,
    capture: CaptureHandle,
    encoder: Arc<dyn FrameEncoder>,
    static_root: Option<PathBuf>,
}

impl StreamServer {
    pub fn new(config: CamcastConfig, capture: CaptureHandle, encoder: Arc<dyn FrameEncoder>) -> Self {
        Self {
            config,
            capture,
            encoder,
            static_root: None,
        }
    }

    /// Resolve the configured static root once. A missing root releases the
    /// device, since nothing will be served.
    pub fn resolve_static_root(&mut self) -> Result<PathBuf> {
        if let Some(root) = &self.static_root {
            return Ok(root.clone());
        }
        match ensure_static_root(&self.config.stream.static_root) {
            Ok(root) => {
                self.static_root = Some(root.clone());
                Ok(root)
            }
            Err(err) => {
                self.capture.release();
                Err(err)
            }
        }
    }

    /// Check the static root, then bind the configured port and serve.
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        self.resolve_static_root()?;
        let listener = match bind(&self.config.server.host, self.config.server.http_port).await {
            Ok(listener) => listener,
            Err(err) => {
                self.capture.release();
                return Err(err);
            }
        };
        self.serve_on(listener, cancel).await
    }

    /// Serve until `cancel` fires. The device is released on every path out.
    pub async fn serve_on(mut self, listener: TcpListener, cancel: CancellationToken) -> Result<()> {
        let root = self.resolve_static_root()?;

        let ctx = StreamContext {
            source: Arc::new(self.capture.clone()),
            encoder: self.encoder,
            frame_delay: self.config.stream.frame_delay(),
            cancel: cancel.clone(),
        };
        let result = serve(listener, stream_router(ctx, &root), cancel, "HTTP server").await;

        self.capture.release();
        info!("Server and Webcam closed.");
        result
    }
}
