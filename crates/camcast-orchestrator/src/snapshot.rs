use camcast_capture::CaptureHandle;
use camcast_encode::SnapshotWriter;
use camcast_network::{
    bind, notification_channel, notify_router, run_broadcaster, serve, static_router, ClientSet,
    NotifyContext,
};
use camcast_ops::ensure_static_root;
use camcast_types::{config::CamcastConfig, Result};
use tokio::{net::TcpListener, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    capture_loop::{CaptureLoop, LoopSummary, Preview, TriggerSource},
    orchestrator_error,
};

/// Snapshot mode: a local capture loop plus the notification and static file
/// servers subscribers use to learn about and fetch each new image.
pub struct SnapshotSession {
    config: CamcastConfig,
    capture: CaptureHandle,
    clients: ClientSet,
    cancel: CancellationToken,
    listeners: Option<(TcpListener, TcpListener)>,
}

impl SnapshotSession {
    pub fn new(config: CamcastConfig, capture: CaptureHandle, cancel: CancellationToken) -> Self {
        Self {
            config,
            capture,
            clients: ClientSet::new(),
            cancel,
            listeners: None,
        }
    }

    /// Use already-bound listeners instead of the configured ports.
    pub fn with_listeners(mut self, ws: TcpListener, http: TcpListener) -> Self {
        self.listeners = Some((ws, http));
        self
    }

    pub fn clients(&self) -> ClientSet {
        self.clients.clone()
    }

    /// Run until the operator quits, the token is cancelled or capture fails.
    /// Both servers are shut down and the device released before returning.
    pub async fn run<T, P>(self, triggers: T, preview: P) -> Result<LoopSummary>
    where
        T: TriggerSource + Send + 'static,
        P: Preview + Send + 'static,
    {
        let Self {
            config,
            capture,
            clients,
            cancel,
            listeners,
        } = self;

        let root = match ensure_static_root(&config.snapshot.static_root) {
            Ok(root) => root,
            Err(err) => {
                capture.release();
                return Err(err);
            }
        };
        let (ws_listener, http_listener) = match listeners {
            Some(bound) => bound,
            None => match bind_both(&config).await {
                Ok(bound) => bound,
                Err(err) => {
                    capture.release();
                    return Err(err);
                }
            },
        };

        let (notifier, messages) = notification_channel();
        let broadcaster = tokio::spawn(run_broadcaster(messages, clients.clone(), cancel.clone()));
        let ws_server = tokio::spawn(serve(
            ws_listener,
            notify_router(NotifyContext {
                clients,
                cancel: cancel.clone(),
            }),
            cancel.clone(),
            "WebSocket server",
        ));
        let http_server = tokio::spawn(serve(
            http_listener,
            static_router(&root),
            cancel.clone(),
            "HTTP server",
        ));

        let writer = SnapshotWriter::jpeg(config.snapshot.path(), config.capture.jpeg_quality);
        let capture_loop = CaptureLoop::new(
            capture,
            writer,
            notifier,
            triggers,
            preview,
            config.snapshot.key_poll(),
            config.snapshot.loop_yield(),
            cancel.clone(),
        );
        let loop_cancel = cancel.clone();
        let loop_task = tokio::task::spawn_blocking(move || {
            let result = capture_loop.run();
            loop_cancel.cancel();
            result
        });

        let outcome = loop_task
            .await
            .map_err(|err| orchestrator_error(format!("capture loop panicked: {err}")));
        cancel.cancel();

        join_server(ws_server, "WebSocket server").await;
        join_server(http_server, "HTTP server").await;
        match broadcaster.await {
            Ok(count) => info!("{} notification(s) broadcast this session", count),
            Err(err) => warn!("Broadcaster task failed: {}", err),
        }
        info!("Camera released and servers stopped");
        outcome?
    }
}

async fn bind_both(config: &CamcastConfig) -> Result<(TcpListener, TcpListener)> {
    let ws = bind(&config.server.host, config.server.ws_port).await?;
    let http = bind(&config.server.host, config.server.http_port).await?;
    Ok((ws, http))
}

async fn join_server(task: JoinHandle<Result<()>>, name: &str) {
    match task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!("{} ended with error: {}", name, err),
        Err(err) => warn!("{} task failed: {}", name, err),
    }
}
