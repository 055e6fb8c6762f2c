use std::sync::Arc;

use camcast_types::{notification::NotificationMessage, Result};
use futures::future::join_all;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{clients::ClientSet, network_error};

/// Delivery counts for one broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BroadcastReport {
    pub attempted: usize,
    pub delivered: usize,
    pub failed: usize,
}

/// Fans one message out to every current subscriber. Never mutates the set;
/// members only leave through their own registration.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotificationBroadcaster;

impl NotificationBroadcaster {
    pub fn new() -> Self {
        Self
    }

    pub async fn broadcast(
        &self,
        clients: &ClientSet,
        message: &NotificationMessage,
    ) -> Result<BroadcastReport> {
        let recipients = clients.snapshot();
        if recipients.is_empty() {
            return Ok(BroadcastReport::default());
        }

        let payload: Arc<str> = message
            .to_json()
            .map_err(|err| network_error(format!("failed to serialize notification: {err}")))?
            .into();

        let sends = recipients.iter().map(|(id, sink)| {
            let payload = Arc::clone(&payload);
            async move { (*id, sink.send(payload).await) }
        });

        let mut report = BroadcastReport {
            attempted: recipients.len(),
            ..Default::default()
        };
        for (id, result) in join_all(sends).await {
            match result {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    report.failed += 1;
                    debug!("Notification to client {} failed: {}", id, err);
                }
            }
        }
        Ok(report)
    }
}

/// Thread-safe entry point into the transport's broadcaster task.
#[derive(Debug, Clone)]
pub struct NotificationSender {
    tx: mpsc::UnboundedSender<NotificationMessage>,
}

impl NotificationSender {
    /// Callable from any thread, including ones outside the runtime.
    pub fn notify(&self, message: NotificationMessage) -> Result<()> {
        self.tx
            .send(message)
            .map_err(|_| network_error("notification transport has shut down"))
    }
}

pub fn notification_channel() -> (NotificationSender, mpsc::UnboundedReceiver<NotificationMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (NotificationSender { tx }, rx)
}

/// Drain handed-off messages and broadcast each one on the runtime. Returns the
/// number of broadcasts performed.
pub async fn run_broadcaster(
    mut messages: mpsc::UnboundedReceiver<NotificationMessage>,
    clients: ClientSet,
    cancel: CancellationToken,
) -> u64 {
    let broadcaster = NotificationBroadcaster::new();
    let mut broadcasts = 0;
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = messages.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };
        match broadcaster.broadcast(&clients, &message).await {
            Ok(report) => {
                broadcasts += 1;
                info!(
                    "Sent notification to {} client(s) ({} failed)",
                    report.delivered, report.failed
                );
            }
            Err(err) => warn!("Broadcast failed: {}", err),
        }
    }
    debug!("Broadcaster stopped after {} broadcasts", broadcasts);
    broadcasts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::NotificationSink;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingSink {
        received: Mutex<Vec<String>>,
        fail: bool,
    }

    impl RecordingSink {
        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }

        fn received(&self) -> Vec<String> {
            self.received.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn send(&self, payload: Arc<str>) -> Result<()> {
            self.received.lock().unwrap().push(payload.to_string());
            if self.fail {
                Err(network_error("simulated send failure"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn empty_set_performs_no_sends() {
        let clients = ClientSet::new();
        let message = NotificationMessage::new_image_ready("latest.jpg");
        let report = NotificationBroadcaster::new()
            .broadcast(&clients, &message)
            .await
            .expect("broadcast");
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn failures_do_not_block_others_or_change_membership() {
        let clients = ClientSet::new();
        let healthy: Vec<Arc<RecordingSink>> =
            (0..3).map(|_| Arc::new(RecordingSink::default())).collect();
        let broken: Vec<Arc<RecordingSink>> =
            (0..2).map(|_| Arc::new(RecordingSink::failing())).collect();
        let _registrations: Vec<_> = healthy
            .iter()
            .chain(broken.iter())
            .map(|sink| clients.register(sink.clone() as Arc<dyn NotificationSink>))
            .collect();

        let message = NotificationMessage::new_image_ready("latest.jpg");
        let report = NotificationBroadcaster::new()
            .broadcast(&clients, &message)
            .await
            .expect("broadcast");

        assert_eq!(report.attempted, 5);
        assert_eq!(report.delivered, 3);
        assert_eq!(report.failed, 2);
        assert_eq!(clients.len(), 5);

        let expected = message.to_json().expect("serialize");
        for sink in healthy.iter().chain(broken.iter()) {
            assert_eq!(sink.received(), vec![expected.clone()]);
        }
    }

    #[tokio::test]
    async fn handoff_from_foreign_thread_reaches_subscribers() {
        let clients = ClientSet::new();
        let sink = Arc::new(RecordingSink::default());
        let _registration = clients.register(sink.clone());

        let (sender, rx) = notification_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_broadcaster(rx, clients.clone(), cancel.clone()));

        std::thread::spawn(move || {
            sender
                .notify(NotificationMessage::new_image_ready("latest.jpg"))
                .expect("notify");
        })
        .join()
        .expect("sender thread");

        let broadcasts = task.await.expect("broadcaster task");
        assert_eq!(broadcasts, 1);
        let received = sink.received();
        assert_eq!(received.len(), 1);
        assert!(received[0].contains("new_image_ready"));
    }

    #[tokio::test]
    async fn cancellation_stops_broadcaster() {
        let (_sender, rx) = notification_channel();
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(run_broadcaster(rx, ClientSet::new(), cancel).await, 0);
    }
}
