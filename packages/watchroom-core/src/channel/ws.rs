//! WebSocket client for the relay server.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use super::frame::{ClientFrame, RelayFrame};
use super::{ChannelError, ChannelEvent, ChannelPort, ChannelResult, SUBSCRIPTION_BUFFER};
use crate::protocol_constants::WS_PING_INTERVAL_SECS;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Subscribers = Arc<DashMap<String, mpsc::Sender<ChannelEvent>>>;

/// Live connection state, present between `connect` and `disconnect`.
struct Connection {
    outbound: mpsc::UnboundedSender<ClientFrame>,
    token: CancellationToken,
    /// Subscriptions made on this connection; dropped with it.
    subscribers: Subscribers,
}

/// [`ChannelPort`] over a WebSocket connection to the relay.
pub struct WsChannel {
    url: String,
    connection: Mutex<Option<Connection>>,
}

impl WsChannel {
    /// Creates a client for the relay's `/ws` endpoint, e.g. `ws://host:port/ws`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection: Mutex::new(None),
        }
    }

    fn send_frame(&self, frame: ClientFrame) -> ChannelResult<()> {
        let guard = self.connection.lock();
        let connection = guard.as_ref().ok_or(ChannelError::Closed)?;
        connection
            .outbound
            .send(frame)
            .map_err(|_| ChannelError::Closed)
    }

    fn subscribers(&self) -> ChannelResult<Subscribers> {
        self.connection
            .lock()
            .as_ref()
            .map(|connection| Arc::clone(&connection.subscribers))
            .ok_or(ChannelError::Closed)
    }

    /// Forwards queued frames to the socket and keeps it alive with pings.
    async fn writer_task(
        mut write: futures::stream::SplitSink<WsStream, Message>,
        mut outbound: mpsc::UnboundedReceiver<ClientFrame>,
        token: CancellationToken,
    ) {
        let mut ping = tokio::time::interval(Duration::from_secs(WS_PING_INTERVAL_SECS));
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping.tick().await;

        loop {
            let frame = tokio::select! {
                _ = token.cancelled() => break,
                _ = ping.tick() => ClientFrame::Ping,
                next = outbound.recv() => match next {
                    Some(frame) => frame,
                    None => break,
                },
            };

            let text = match serde_json::to_string(&frame) {
                Ok(text) => text,
                Err(e) => {
                    log::error!("[WsChannel] Failed to encode frame: {}", e);
                    continue;
                }
            };
            if let Err(e) = write.send(Message::text(text)).await {
                log::warn!("[WsChannel] Send failed: {}", e);
                token.cancel();
                break;
            }
        }

        let _ = write.send(Message::Close(None)).await;
        log::debug!("[WsChannel] Writer task terminated");
    }

    /// Routes relay frames to topic subscribers until the socket closes.
    async fn reader_task(
        mut read: futures::stream::SplitStream<WsStream>,
        subscribers: Subscribers,
        token: CancellationToken,
    ) {
        loop {
            let next = tokio::select! {
                _ = token.cancelled() => break,
                next = read.next() => next,
            };

            match next {
                Some(Ok(Message::Text(text))) => {
                    Self::route(text.as_str(), &subscribers).await;
                }
                Some(Ok(Message::Close(_))) | None => {
                    log::info!("[WsChannel] Relay closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    log::warn!("[WsChannel] Read error: {}", e);
                    break;
                }
            }
        }

        token.cancel();
        let topics: Vec<String> = subscribers.iter().map(|e| e.key().clone()).collect();
        for topic in topics {
            if let Some((_, tx)) = subscribers.remove(&topic) {
                let _ = tx.send(ChannelEvent::Closed).await;
            }
        }
        log::debug!("[WsChannel] Reader task terminated");
    }

    async fn route(text: &str, subscribers: &Subscribers) {
        let frame: RelayFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("[WsChannel] Ignoring unparseable relay frame: {}", e);
                return;
            }
        };

        match frame {
            RelayFrame::Message { topic, payload } => {
                let tx = subscribers.get(&topic).map(|entry| entry.value().clone());
                if let Some(tx) = tx {
                    if tx.send(ChannelEvent::Message(payload)).await.is_err() {
                        subscribers.remove(&topic);
                    }
                }
            }
            RelayFrame::Pong => log::trace!("[WsChannel] Pong"),
            RelayFrame::Error { message } => {
                log::warn!("[WsChannel] Relay error: {}", message);
                let senders: Vec<_> = subscribers.iter().map(|e| e.value().clone()).collect();
                for tx in senders {
                    let _ = tx.send(ChannelEvent::Error(message.clone())).await;
                }
            }
        }
    }
}

#[async_trait]
impl ChannelPort for WsChannel {
    async fn connect(&self) -> ChannelResult<()> {
        log::info!("[WsChannel] Connecting to {}", self.url);
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| ChannelError::Connect(e.to_string()))?;
        let (write, read) = stream.split();

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let subscribers: Subscribers = Arc::new(DashMap::new());

        let previous = self.connection.lock().replace(Connection {
            outbound,
            token: token.clone(),
            subscribers: Arc::clone(&subscribers),
        });
        if let Some(previous) = previous {
            previous.token.cancel();
        }

        tokio::spawn(Self::writer_task(write, outbound_rx, token.clone()));
        tokio::spawn(Self::reader_task(read, subscribers, token));
        log::info!("[WsChannel] Connected");
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> ChannelResult<mpsc::Receiver<ChannelEvent>> {
        let subscribers = self.subscribers()?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        subscribers.insert(topic.to_string(), tx);
        if let Err(e) = self.send_frame(ClientFrame::Subscribe {
            topic: topic.to_string(),
        }) {
            subscribers.remove(topic);
            return Err(e);
        }
        Ok(rx)
    }

    async fn publish(&self, topic: &str, payload: String) -> ChannelResult<()> {
        self.send_frame(ClientFrame::Publish {
            topic: topic.to_string(),
            payload,
        })
        .map_err(|e| match e {
            ChannelError::Closed => ChannelError::Closed,
            other => ChannelError::Publish(other.to_string()),
        })
    }

    async fn disconnect(&self) {
        let Some(connection) = self.connection.lock().take() else {
            return;
        };
        let topics: Vec<String> = connection
            .subscribers
            .iter()
            .map(|e| e.key().clone())
            .collect();
        for topic in topics {
            let _ = connection.outbound.send(ClientFrame::Unsubscribe { topic });
        }
        // Dropping the sender lets the writer drain the unsubscribes before closing.
        drop(connection.outbound);
        connection.subscribers.clear();
        log::info!("[WsChannel] Disconnected from {}", self.url);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_before_connect_is_closed() {
        let channel = WsChannel::new("ws://127.0.0.1:9/ws");
        assert_eq!(
            channel.publish("room.r1", "{}".into()).await,
            Err(ChannelError::Closed)
        );
        assert!(channel.subscribe("room.r1").await.is_err());
    }

    #[tokio::test]
    async fn relay_message_is_routed_to_topic() {
        let subscribers: Subscribers = Arc::new(DashMap::new());
        let (tx, mut rx) = mpsc::channel(4);
        subscribers.insert("room.r1".into(), tx);

        WsChannel::route(
            r#"{"op":"MESSAGE","topic":"room.r1","payload":"{\"type\":\"OWNER_LEFT\"}"}"#,
            &subscribers,
        )
        .await;
        WsChannel::route(r#"{"op":"MESSAGE","topic":"room.r2","payload":"x"}"#, &subscribers).await;

        assert_eq!(
            rx.recv().await,
            Some(ChannelEvent::Message(r#"{"type":"OWNER_LEFT"}"#.into()))
        );
        assert!(rx.try_recv().is_err());
    }
}
