//! WebSocket handler speaking the relay frame protocol.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures::sink::SinkExt;
use futures::stream::{SplitSink, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::api::ws_connection::ConnectionGuard;
use crate::api::RelayState;
use crate::channel::{ClientFrame, RelayFrame};
use crate::protocol_constants::{
    MAX_FRAME_BYTES, TOPIC_CHANNEL_CAPACITY, WS_HEARTBEAT_CHECK_INTERVAL_SECS,
    WS_HEARTBEAT_TIMEOUT_SECS,
};

type WsSender = SplitSink<WebSocket, Message>;

fn to_message(frame: &RelayFrame) -> Option<Message> {
    serde_json::to_string(frame)
        .ok()
        .map(|s| Message::Text(s.into()))
}

async fn send_frame(sender: &mut WsSender, frame: &RelayFrame) -> bool {
    match to_message(frame) {
        Some(msg) => sender.send(msg).await.is_ok(),
        None => true,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Subscriptions
// ─────────────────────────────────────────────────────────────────────────────

/// Topics one connection listens to, each with its own forwarder task.
struct Subscriptions {
    topics: HashMap<String, CancellationToken>,
    parent: CancellationToken,
    outbound: mpsc::Sender<RelayFrame>,
}

impl Subscriptions {
    fn new(parent: CancellationToken, outbound: mpsc::Sender<RelayFrame>) -> Self {
        Self {
            topics: HashMap::new(),
            parent,
            outbound,
        }
    }

    fn subscribe(&mut self, state: &RelayState, topic: String) {
        if self.topics.contains_key(&topic) {
            return;
        }
        let token = self.parent.child_token();
        let rx = state.hub.subscribe(&topic);
        tokio::spawn(forward_topic(
            topic.clone(),
            rx,
            self.outbound.clone(),
            token.clone(),
        ));
        self.topics.insert(topic, token);
    }

    fn unsubscribe(&mut self, topic: &str) {
        if let Some(token) = self.topics.remove(topic) {
            token.cancel();
        }
    }

    fn len(&self) -> usize {
        self.topics.len()
    }

    fn clear(&mut self) {
        for (_, token) in self.topics.drain() {
            token.cancel();
        }
    }
}

/// Copies a topic's broadcast into the connection's outbound queue.
async fn forward_topic(
    topic: String,
    mut rx: broadcast::Receiver<String>,
    outbound: mpsc::Sender<RelayFrame>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            received = rx.recv() => match received {
                Ok(payload) => {
                    let frame = RelayFrame::Message {
                        topic: topic.clone(),
                        payload,
                    };
                    if outbound.send(frame).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log::warn!("[WS] Subscriber on {} lagged, skipped {} message(s)", topic, skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Frame Handling
// ─────────────────────────────────────────────────────────────────────────────

/// Applies one client frame. Returns the reply frame, if any.
fn handle_frame(
    state: &RelayState,
    guard: &ConnectionGuard,
    subscriptions: &mut Subscriptions,
    frame: ClientFrame,
) -> Option<RelayFrame> {
    match frame {
        ClientFrame::Subscribe { topic } => {
            if topic.is_empty() {
                return Some(RelayFrame::Error {
                    message: "topic is required".into(),
                });
            }
            log::debug!("[WS] {} subscribed to {}", guard.id(), topic);
            subscriptions.subscribe(state, topic);
            guard.set_subscriptions(subscriptions.len());
            None
        }
        ClientFrame::Unsubscribe { topic } => {
            subscriptions.unsubscribe(&topic);
            guard.set_subscriptions(subscriptions.len());
            None
        }
        ClientFrame::Publish { topic, payload } => {
            if payload.len() > MAX_FRAME_BYTES {
                return Some(RelayFrame::Error {
                    message: format!("payload exceeds {} bytes", MAX_FRAME_BYTES),
                });
            }
            state.hub.publish(&topic, payload);
            None
        }
        ClientFrame::Ping => Some(RelayFrame::Pong),
    }
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<RelayState>,
) -> impl IntoResponse {
    ws.max_message_size(MAX_FRAME_BYTES * 2)
        .on_upgrade(move |socket| handle_ws(socket, state))
}

/// Main WebSocket connection handler.
async fn handle_ws(socket: WebSocket, state: RelayState) {
    let (mut sender, mut receiver) = socket.split();
    let mut last_activity = Instant::now();

    let conn_guard = state.ws_manager.register();
    let cancel_token = conn_guard.cancel_token().clone();
    let (outbound_tx, mut outbound_rx) = mpsc::channel(TOPIC_CHANNEL_CAPACITY);
    let mut subscriptions = Subscriptions::new(cancel_token.child_token(), outbound_tx);

    log::info!("[WS] New connection established: {}", conn_guard.id());

    let mut heartbeat_interval =
        tokio::time::interval(Duration::from_secs(WS_HEARTBEAT_CHECK_INTERVAL_SECS));
    heartbeat_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                log::info!("[WS] Connection force-closed: {}", conn_guard.id());
                break;
            }
            msg = receiver.next() => {
                last_activity = Instant::now();
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(frame) => handle_frame(&state, &conn_guard, &mut subscriptions, frame),
                            Err(e) => {
                                log::warn!("[WS] Invalid frame from {}: {}", conn_guard.id(), e);
                                Some(RelayFrame::Error {
                                    message: format!("invalid frame: {}", e),
                                })
                            }
                        };
                        if let Some(reply) = reply {
                            if !send_frame(&mut sender, &reply).await {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    _ => {}
                }
            }
            Some(frame) = outbound_rx.recv() => {
                if !send_frame(&mut sender, &frame).await {
                    break;
                }
            }
            _ = heartbeat_interval.tick() => {
                if last_activity.elapsed() > Duration::from_secs(WS_HEARTBEAT_TIMEOUT_SECS) {
                    log::warn!("[WS] Heartbeat timeout: {}", conn_guard.id());
                    break;
                }
            }
        }
    }

    subscriptions.clear();
    state.hub.prune();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ChannelEvent, ChannelPort, WsChannel};

    async fn spawn_relay(state: RelayState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(crate::api::serve(listener, state));
        format!("ws://{addr}/ws")
    }

    #[tokio::test]
    async fn relays_between_ws_channels() {
        let state = RelayState::builder().build();
        let url = spawn_relay(state.clone()).await;

        let alice = WsChannel::new(url.clone());
        let bob = WsChannel::new(url);
        alice.connect().await.unwrap();
        bob.connect().await.unwrap();
        let mut bob_rx = bob.subscribe("room.r1").await.unwrap();

        // The SUBSCRIBE frame must reach the relay before the publish does.
        while state.hub.subscriber_count("room.r1") == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        alice.publish("room.r1", "hello".into()).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), bob_rx.recv())
            .await
            .unwrap();
        assert_eq!(event, Some(ChannelEvent::Message("hello".into())));

        alice.disconnect().await;
        bob.disconnect().await;
    }

    #[tokio::test]
    async fn oversized_publish_is_rejected() {
        let state = RelayState::builder().build();
        let (tx, _rx) = mpsc::channel(1);
        let mut subscriptions = Subscriptions::new(CancellationToken::new(), tx);
        let manager = std::sync::Arc::clone(&state.ws_manager);
        let guard = manager.register();

        let reply = handle_frame(
            &state,
            &guard,
            &mut subscriptions,
            ClientFrame::Publish {
                topic: "room.r1".into(),
                payload: "x".repeat(MAX_FRAME_BYTES + 1),
            },
        );
        assert!(matches!(reply, Some(RelayFrame::Error { .. })));
        assert_eq!(
            handle_frame(&state, &guard, &mut subscriptions, ClientFrame::Ping),
            Some(RelayFrame::Pong)
        );
    }

    #[tokio::test]
    async fn subscribe_is_idempotent_and_tracked() {
        let state = RelayState::builder().build();
        let (tx, _rx) = mpsc::channel(1);
        let mut subscriptions = Subscriptions::new(CancellationToken::new(), tx);
        let guard = state.ws_manager.register();

        for _ in 0..2 {
            handle_frame(
                &state,
                &guard,
                &mut subscriptions,
                ClientFrame::Subscribe {
                    topic: "room.r1".into(),
                },
            );
        }
        assert_eq!(state.hub.subscriber_count("room.r1"), 1);
        assert_eq!(state.ws_manager.subscription_count(), 1);

        handle_frame(
            &state,
            &guard,
            &mut subscriptions,
            ClientFrame::Unsubscribe {
                topic: "room.r1".into(),
            },
        );
        assert_eq!(state.ws_manager.subscription_count(), 0);
    }
}
