//! axum routers for both deployment modes.
//!
//! - stream mode: `GET /video_feed` (M-JPEG) plus static files for every
//!   other path
//! - snapshot mode: a WebSocket notification endpoint on any path, and a
//!   separate static file router

use std::{net::SocketAddr, path::Path, sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::{ConnectInfo, State, WebSocketUpgrade},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use camcast_capture::FrameSource;
use camcast_encode::FrameEncoder;
use camcast_types::Result;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tracing::info;

use crate::{
    clients::ClientSet,
    mjpeg::{MjpegStreamWriter, STREAM_CONTENT_TYPE},
    network_error,
    subscriber::handle_subscriber,
};

pub const VIDEO_FEED_PATH: &str = "/video_feed";

/// Shared by every stream-mode request.
#[derive(Clone)]
pub struct StreamContext {
    pub source: Arc<dyn FrameSource>,
    pub encoder: Arc<dyn FrameEncoder>,
    pub frame_delay: Duration,
    pub cancel: CancellationToken,
}

pub fn stream_router(ctx: StreamContext, static_root: &Path) -> Router {
    Router::new()
        .route(VIDEO_FEED_PATH, get(video_feed))
        .fallback_service(ServeDir::new(static_root))
        .with_state(ctx)
}

async fn video_feed(
    State(ctx): State<StreamContext>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
) -> Response {
    let mut writer = MjpegStreamWriter::new(ctx.source.clone(), ctx.encoder.clone(), ctx.frame_delay)
        .with_peer(peer.to_string());
    writer.activate();
    (
        StatusCode::OK,
        [
            (header::ACCESS_CONTROL_ALLOW_ORIGIN, "*"),
            (header::CONTENT_TYPE, STREAM_CONTENT_TYPE),
        ],
        Body::from_stream(writer.into_stream(ctx.cancel.clone())),
    )
        .into_response()
}

/// Shared by every notification subscriber.
#[derive(Clone)]
pub struct NotifyContext {
    pub clients: ClientSet,
    pub cancel: CancellationToken,
}

pub fn notify_router(ctx: NotifyContext) -> Router {
    Router::new()
        .route("/", get(ws_upgrade))
        .fallback(ws_upgrade)
        .with_state(ctx)
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(ctx): State<NotifyContext>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_subscriber(socket, ctx.clients, ctx.cancel))
}

pub fn static_router(static_root: &Path) -> Router {
    Router::new().fallback_service(ServeDir::new(static_root))
}

pub async fn bind(host: &str, port: u16) -> Result<TcpListener> {
    let addr = format!("{host}:{port}");
    TcpListener::bind(&addr)
        .await
        .map_err(|err| network_error(format!("failed to bind to {addr}: {err}")))
}

/// Serve `app` until `cancel` fires and in-flight connections finish.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    cancel: CancellationToken,
    name: &str,
) -> Result<()> {
    let local = listener
        .local_addr()
        .map_err(|err| network_error(format!("{name} listener has no address: {err}")))?;
    info!("{} listening on {}", name, local);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(cancel.cancelled_owned())
    .await
    .map_err(|err| network_error(format!("{name} server error: {err}")))?;
    info!("{} stopped", name);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mjpeg::tests::{parse_parts, ScriptedSource};
    use camcast_encode::JpegEncoder;
    use std::fs;
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt},
        net::TcpStream,
    };

    async fn start(app: Router) -> (SocketAddr, CancellationToken, tokio::task::JoinHandle<Result<()>>) {
        let listener = bind("127.0.0.1", 0).await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let cancel = CancellationToken::new();
        let task = tokio::spawn(serve(listener, app, cancel.clone(), "test"));
        (addr, cancel, task)
    }

    async fn get(addr: SocketAddr, path: &str) -> Vec<u8> {
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.expect("write request");
        let mut response = Vec::new();
        stream.read_to_end(&mut response).await.expect("read response");
        response
    }

    /// Undo chunked transfer encoding.
    fn dechunk(mut body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        loop {
            let line_end = body
                .windows(2)
                .position(|w| w == b"\r\n")
                .expect("chunk size line");
            let size = usize::from_str_radix(
                std::str::from_utf8(&body[..line_end]).expect("utf8").trim(),
                16,
            )
            .expect("hex chunk size");
            body = &body[line_end + 2..];
            if size == 0 {
                return out;
            }
            out.extend_from_slice(&body[..size]);
            body = &body[size + 2..];
        }
    }

    fn split_head(response: &[u8]) -> (String, &[u8]) {
        let end = response
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .expect("header terminator");
        (
            String::from_utf8_lossy(&response[..end]).to_lowercase(),
            &response[end + 4..],
        )
    }

    fn stream_ctx(frames: u64) -> StreamContext {
        StreamContext {
            source: Arc::new(ScriptedSource::new(frames)),
            encoder: Arc::new(JpegEncoder::default()),
            frame_delay: Duration::ZERO,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn video_feed_serves_multipart_parts() {
        let root = std::env::temp_dir().join("camcast-http-video");
        fs::create_dir_all(&root).expect("root");
        let (addr, cancel, task) = start(stream_router(stream_ctx(3), &root)).await;

        let response = get(addr, VIDEO_FEED_PATH).await;
        let (head, body) = split_head(&response);
        assert!(head.starts_with("http/1.1 200"));
        assert!(head.contains("access-control-allow-origin: *"));
        assert!(head.contains("content-type: multipart/x-mixed-replace; boundary=--frameboundary"));
        assert_eq!(parse_parts(&dechunk(body)).len(), 3);

        cancel.cancel();
        task.await.expect("join").expect("serve");
    }

    #[tokio::test]
    async fn other_paths_hit_static_files() {
        let root = std::env::temp_dir().join("camcast-http-static");
        fs::create_dir_all(&root).expect("root");
        fs::write(root.join("index-2.html"), "<html>viewer</html>").expect("write page");
        let (addr, cancel, task) = start(stream_router(stream_ctx(0), &root)).await;

        let response = get(addr, "/index-2.html").await;
        let (head, body) = split_head(&response);
        assert!(head.starts_with("http/1.1 200"));
        assert!(head.contains("content-type: text/html"));
        assert_eq!(body, b"<html>viewer</html>");

        let missing = get(addr, "/nope.html").await;
        assert!(split_head(&missing).0.starts_with("http/1.1 404"));

        cancel.cancel();
        task.await.expect("join").expect("serve");
        fs::remove_dir_all(&root).expect("cleanup");
    }

    #[tokio::test]
    async fn shutdown_ends_open_streams() {
        let root = std::env::temp_dir().join("camcast-http-shutdown");
        fs::create_dir_all(&root).expect("root");
        let mut ctx = stream_ctx(u64::MAX);
        ctx.frame_delay = Duration::from_millis(5);
        let stream_cancel = ctx.cancel.clone();
        let (addr, cancel, task) = start(stream_router(ctx, &root)).await;

        let reader = tokio::spawn(get(addr, VIDEO_FEED_PATH));
        tokio::time::sleep(Duration::from_millis(50)).await;
        stream_cancel.cancel();
        cancel.cancel();

        let response = reader.await.expect("reader");
        let (_, body) = split_head(&response);
        assert!(!parse_parts(&dechunk(body)).is_empty());
        task.await.expect("join").expect("serve");
    }
}
