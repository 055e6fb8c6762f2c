use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// Notification kinds pushed to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    NewImageReady,
}

/// Immutable "new image ready" announcement. Carries no image bytes; clients
/// fetch `filename` from the static file server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub filename: String,
    /// Local wall-clock time, ISO-8601.
    pub timestamp: DateTime<Local>,
}

impl NotificationMessage {
    pub fn new_image_ready(filename: impl Into<String>) -> Self {
        Self {
            kind: NotificationKind::NewImageReady,
            filename: filename.into(),
            timestamp: Local::now(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_shape() {
        let message = NotificationMessage::new_image_ready("captured_latest.jpg");
        let value: serde_json::Value =
            serde_json::from_str(&message.to_json().expect("serialize")).expect("parse");

        assert_eq!(value["type"], "new_image_ready");
        assert_eq!(value["filename"], "captured_latest.jpg");
        let timestamp = value["timestamp"].as_str().expect("timestamp string");
        assert!(DateTime::parse_from_rfc3339(timestamp).is_ok());
        assert_eq!(value.as_object().map(|o| o.len()), Some(3));
    }
}
