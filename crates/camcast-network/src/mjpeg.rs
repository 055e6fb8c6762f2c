//! M-JPEG multipart framing.
//!
//! A stream writer moves `AwaitingConnection -> StreamingActive -> Closed`.
//! Each part on the wire is:
//!
//! ```text
//! --frameboundary\r\n
//! Content-Type: image/jpeg\r\n
//! Content-Length: <N>\r\n\r\n
//! <N bytes>\r\n
//! ```

use std::{convert::Infallible, sync::Arc, time::Duration};

use async_stream::stream;
use bytes::{BufMut, Bytes, BytesMut};
use camcast_capture::FrameSource;
use camcast_encode::FrameEncoder;
use camcast_types::frame::EncodedFrame;
use futures::Stream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const BOUNDARY: &str = "--frameboundary";
pub const STREAM_CONTENT_TYPE: &str = "multipart/x-mixed-replace; boundary=--frameboundary";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    AwaitingConnection,
    StreamingActive,
    Closed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StreamStats {
    pub parts_sent: u64,
    pub frames_skipped: u64,
    pub bytes_sent: u64,
}

/// Frame multipart body for one encoded image.
pub fn encode_part(frame: &EncodedFrame, content_type: &str) -> Bytes {
    let header = format!(
        "{BOUNDARY}\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\n\r\n",
        frame.len()
    );
    let mut buf = BytesMut::with_capacity(header.len() + frame.len() + 2);
    buf.put_slice(header.as_bytes());
    buf.put_slice(&frame.bytes);
    buf.put_slice(b"\r\n");
    buf.freeze()
}

/// Per-client pull loop against the shared capture source.
pub struct MjpegStreamWriter {
    source: Arc<dyn FrameSource>,
    encoder: Arc<dyn FrameEncoder>,
    frame_delay: Duration,
    state: StreamState,
    stats: StreamStats,
    peer: String,
}

impl MjpegStreamWriter {
    pub fn new(
        source: Arc<dyn FrameSource>,
        encoder: Arc<dyn FrameEncoder>,
        frame_delay: Duration,
    ) -> Self {
        Self {
            source,
            encoder,
            frame_delay,
            state: StreamState::AwaitingConnection,
            stats: StreamStats::default(),
            peer: "unknown".into(),
        }
    }

    pub fn with_peer(mut self, peer: impl Into<String>) -> Self {
        self.peer = peer.into();
        self
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn stats(&self) -> StreamStats {
        self.stats
    }

    /// Enter `StreamingActive`. The caller emits the response head.
    pub fn activate(&mut self) {
        if self.state == StreamState::AwaitingConnection {
            self.state = StreamState::StreamingActive;
            info!("Streaming to {}", self.peer);
        }
    }

    /// Next framed part, or `None` once the stream is closed. Encode failures
    /// are skipped; a capture failure closes the stream.
    pub async fn next_part(&mut self) -> Option<Bytes> {
        self.activate();
        while self.state == StreamState::StreamingActive {
            let frame = match self.source.read_frame().await {
                Ok(frame) => frame,
                Err(err) => {
                    warn!("Failed to capture frame for {}: {}", self.peer, err);
                    self.close();
                    return None;
                }
            };
            match self.encoder.encode(&frame) {
                Ok(encoded) => {
                    let part = encode_part(&encoded, self.encoder.content_type());
                    self.stats.parts_sent += 1;
                    self.stats.bytes_sent += part.len() as u64;
                    return Some(part);
                }
                Err(err) => {
                    self.stats.frames_skipped += 1;
                    warn!("Skipping frame {} for {}: {}", frame.sequence, self.peer, err);
                }
            }
        }
        None
    }

    pub fn close(&mut self) {
        if self.state == StreamState::Closed {
            return;
        }
        self.state = StreamState::Closed;
        info!(
            "Stream to {} closed: {} parts, {} skipped, {} bytes",
            self.peer, self.stats.parts_sent, self.stats.frames_skipped, self.stats.bytes_sent
        );
    }

    /// Response body: parts paced by the frame delay until the source fails,
    /// `cancel` fires, or the body is dropped on peer disconnect.
    pub fn into_stream(
        self,
        cancel: CancellationToken,
    ) -> impl Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
        let mut writer = self;
        stream! {
            loop {
                let part = tokio::select! {
                    _ = cancel.cancelled() => None,
                    part = writer.next_part() => part,
                };
                let Some(part) = part else { break };
                yield Ok(part);
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(writer.frame_delay) => {}
                }
            }
            writer.close();
        }
    }
}

impl Drop for MjpegStreamWriter {
    fn drop(&mut self) {
        if self.state == StreamState::StreamingActive {
            debug!("Peer {} went away mid-stream", self.peer);
        }
        self.close();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use camcast_capture::capture_error;
    use camcast_encode::{encode_error, JpegEncoder};
    use camcast_types::{frame::Frame, Result};
    use futures::StreamExt;
    use std::{collections::HashSet, sync::Mutex};

    /// Yields `count` frames then reports end-of-stream.
    pub(crate) struct ScriptedSource {
        remaining: Mutex<u64>,
        next: Mutex<u64>,
    }

    impl ScriptedSource {
        pub(crate) fn new(count: u64) -> Self {
            Self {
                remaining: Mutex::new(count),
                next: Mutex::new(0),
            }
        }
    }

    #[async_trait]
    impl FrameSource for ScriptedSource {
        async fn read_frame(&self) -> Result<Frame> {
            let mut remaining = self.remaining.lock().unwrap();
            if *remaining == 0 {
                return Err(capture_error("end of stream"));
            }
            *remaining -= 1;
            let mut next = self.next.lock().unwrap();
            *next += 1;
            let shade = (*next * 37 % 256) as u8;
            Ok(Frame::from_rgb(8, 8, vec![shade; 8 * 8 * 3], *next))
        }
    }

    struct FlakyEncoder {
        fail_on: HashSet<u64>,
        inner: JpegEncoder,
    }

    impl FrameEncoder for FlakyEncoder {
        fn encode(&self, frame: &Frame) -> Result<EncodedFrame> {
            if self.fail_on.contains(&frame.sequence) {
                return Err(encode_error("simulated failure"));
            }
            self.inner.encode(frame)
        }

        fn content_type(&self) -> &'static str {
            "image/jpeg"
        }
    }

    /// Split a multipart body into payloads, checking every part's framing.
    pub(crate) fn parse_parts(body: &[u8]) -> Vec<Vec<u8>> {
        let mut parts = Vec::new();
        let mut rest = body;
        while !rest.is_empty() {
            let prefix = format!("{BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: ");
            assert!(rest.starts_with(prefix.as_bytes()), "part header missing");
            rest = &rest[prefix.len()..];
            let end = rest
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
                .expect("header terminator");
            let len: usize = std::str::from_utf8(&rest[..end])
                .expect("utf8 length")
                .parse()
                .expect("numeric length");
            rest = &rest[end + 4..];
            parts.push(rest[..len].to_vec());
            assert_eq!(&rest[len..len + 2], b"\r\n", "trailing delimiter");
            rest = &rest[len + 2..];
        }
        parts
    }

    fn writer(source: ScriptedSource, encoder: impl FrameEncoder + 'static) -> MjpegStreamWriter {
        MjpegStreamWriter::new(Arc::new(source), Arc::new(encoder), Duration::ZERO)
    }

    async fn collect_body(writer: MjpegStreamWriter) -> Vec<u8> {
        let chunks: Vec<_> = writer.into_stream(CancellationToken::new()).collect().await;
        chunks
            .into_iter()
            .flat_map(|chunk| chunk.expect("infallible").to_vec())
            .collect()
    }

    #[test]
    fn part_framing_matches_wire_format() {
        let frame = EncodedFrame::new(vec![1, 2, 3, 4, 5], 1);
        let part = encode_part(&frame, "image/jpeg");
        assert_eq!(
            &part[..],
            b"--frameboundary\r\nContent-Type: image/jpeg\r\nContent-Length: 5\r\n\r\n\x01\x02\x03\x04\x05\r\n"
        );
    }

    #[tokio::test]
    async fn emits_one_part_per_successful_read() {
        let body = collect_body(writer(ScriptedSource::new(6), JpegEncoder::default())).await;
        let parts = parse_parts(&body);
        assert_eq!(parts.len(), 6);
        for payload in parts {
            assert_eq!(&payload[..2], &[0xFF, 0xD8]);
        }
    }

    #[tokio::test]
    async fn encode_failures_are_skipped() {
        let encoder = FlakyEncoder {
            fail_on: [2, 5, 6].into_iter().collect(),
            inner: JpegEncoder::default(),
        };
        let body = collect_body(writer(ScriptedSource::new(8), encoder)).await;
        assert_eq!(parse_parts(&body).len(), 5);
    }

    #[tokio::test]
    async fn state_machine_transitions() {
        let mut writer = writer(ScriptedSource::new(1), JpegEncoder::default());
        assert_eq!(writer.state(), StreamState::AwaitingConnection);

        assert!(writer.next_part().await.is_some());
        assert_eq!(writer.state(), StreamState::StreamingActive);

        assert!(writer.next_part().await.is_none());
        assert_eq!(writer.state(), StreamState::Closed);
        assert_eq!(writer.stats().parts_sent, 1);
        assert!(writer.next_part().await.is_none());
    }

    #[tokio::test]
    async fn cancellation_closes_stream() {
        let cancel = CancellationToken::new();
        let writer = MjpegStreamWriter::new(
            Arc::new(ScriptedSource::new(u64::MAX)),
            Arc::new(JpegEncoder::default()),
            Duration::from_secs(3600),
        );
        let mut body = Box::pin(writer.into_stream(cancel.clone()));

        assert!(body.next().await.is_some());
        cancel.cancel();
        assert!(body.next().await.is_none());
    }

    #[tokio::test]
    async fn dropped_body_leaves_source_usable() {
        let source = Arc::new(ScriptedSource::new(10));
        let first = MjpegStreamWriter::new(
            source.clone(),
            Arc::new(JpegEncoder::default()),
            Duration::ZERO,
        );
        let mut body = Box::pin(first.into_stream(CancellationToken::new()));
        assert!(body.next().await.is_some());
        drop(body);

        let mut second = MjpegStreamWriter::new(source, Arc::new(JpegEncoder::default()), Duration::ZERO);
        assert!(second.next_part().await.is_some());
    }
}
