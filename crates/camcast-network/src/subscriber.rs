use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::clients::{ChannelSink, ClientSet};

/// Messages a slow subscriber may have queued before sends to it fail.
pub const SUBSCRIBER_QUEUE: usize = 16;

/// Serve one subscriber until its connection closes. The socket is only ever
/// written from here; the broadcaster reaches it through the queue.
pub async fn handle_subscriber(socket: WebSocket, clients: ClientSet, cancel: CancellationToken) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<Arc<str>>(SUBSCRIBER_QUEUE);
    let mut registration = clients.register(Arc::new(ChannelSink::new(tx)));
    info!("Client connected. Total clients: {}", clients.len());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = ws_tx.send(Message::Close(None)).await;
                break;
            }
            queued = rx.recv() => {
                let Some(payload) = queued else { break };
                if let Err(err) = ws_tx.send(Message::Text(payload.to_string().into())).await {
                    debug!("Send to client {} failed: {}", registration.id(), err);
                    break;
                }
            }
            incoming = ws_rx.next() => match incoming {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(Message::Ping(data))) => {
                    let _ = ws_tx.send(Message::Pong(data)).await;
                }
                Some(Err(err)) => {
                    debug!("Client {} connection error: {}", registration.id(), err);
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }

    registration.close();
    info!("Client disconnected. Total clients: {}", clients.len());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        broadcast::NotificationBroadcaster,
        http::{bind, notify_router, serve, NotifyContext},
    };
    use camcast_types::notification::NotificationMessage;
    use std::time::Duration;
    use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};

    async fn wait_for_len(clients: &ClientSet, expected: usize) {
        for _ in 0..100 {
            if clients.len() == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("client set never reached {expected} (now {})", clients.len());
    }

    #[tokio::test]
    async fn subscriber_lifecycle_over_websocket() {
        let clients = ClientSet::new();
        let cancel = CancellationToken::new();
        let listener = bind("127.0.0.1", 0).await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let app = notify_router(NotifyContext {
            clients: clients.clone(),
            cancel: cancel.clone(),
        });
        let server = tokio::spawn(serve(listener, app, cancel.clone(), "notify"));

        let (mut ws, _) = connect_async(format!("ws://{addr}/")).await.expect("connect");
        wait_for_len(&clients, 1).await;

        let message = NotificationMessage::new_image_ready("captured_latest.jpg");
        let report = NotificationBroadcaster::new()
            .broadcast(&clients, &message)
            .await
            .expect("broadcast");
        assert_eq!(report.delivered, 1);

        let received = ws.next().await.expect("frame").expect("message");
        let value: serde_json::Value = match received {
            WsMessage::Text(text) => serde_json::from_str(text.as_str()).expect("json"),
            other => panic!("unexpected frame {other:?}"),
        };
        assert_eq!(value["type"], "new_image_ready");
        assert_eq!(value["filename"], "captured_latest.jpg");

        ws.close(None).await.expect("close");
        wait_for_len(&clients, 0).await;

        cancel.cancel();
        server.await.expect("join").expect("serve");
    }

    #[tokio::test]
    async fn shutdown_disconnects_subscribers() {
        let clients = ClientSet::new();
        let cancel = CancellationToken::new();
        let listener = bind("127.0.0.1", 0).await.expect("bind");
        let addr = listener.local_addr().expect("addr");
        let app = notify_router(NotifyContext {
            clients: clients.clone(),
            cancel: cancel.clone(),
        });
        let server = tokio::spawn(serve(listener, app, cancel.clone(), "notify"));

        let (mut ws, _) = connect_async(format!("ws://{addr}/any/path"))
            .await
            .expect("connect");
        wait_for_len(&clients, 1).await;

        cancel.cancel();
        loop {
            match ws.next().await {
                Some(Ok(WsMessage::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
        wait_for_len(&clients, 0).await;
        server.await.expect("join").expect("serve");
    }
}
