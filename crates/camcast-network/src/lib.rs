//! Network delivery: M-JPEG streaming, subscriber registry, notification
//! fan-out and the HTTP/WebSocket servers carrying them.

pub mod broadcast;
pub mod clients;
pub mod http;
pub mod mjpeg;
pub mod subscriber;

use camcast_types::CamcastError;

pub use broadcast::{
    notification_channel, run_broadcaster, BroadcastReport, NotificationBroadcaster,
    NotificationSender,
};
pub use clients::{ChannelSink, ClientId, ClientSet, NotificationSink, Registration};
pub use http::{
    bind, notify_router, serve, static_router, stream_router, NotifyContext, StreamContext,
    VIDEO_FEED_PATH,
};
pub use mjpeg::{MjpegStreamWriter, StreamState, StreamStats, BOUNDARY, STREAM_CONTENT_TYPE};

pub fn network_error(message: impl Into<String>) -> CamcastError {
    CamcastError::Network(message.into())
}
