//! In-process pub/sub broker.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use super::{ChannelError, ChannelEvent, ChannelPort, ChannelResult, SUBSCRIPTION_BUFFER};
use crate::protocol_constants::TOPIC_CHANNEL_CAPACITY;

/// Broker holding one broadcast channel per topic.
///
/// Every subscriber, the publisher included, receives each payload.
#[derive(Clone, Default)]
pub struct LocalChannelHub {
    topics: Arc<DashMap<String, broadcast::Sender<String>>>,
}

impl LocalChannelHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a port attached to this hub.
    pub fn channel(&self) -> LocalChannel {
        LocalChannel {
            hub: self.clone(),
            connected: AtomicBool::new(false),
            token: Mutex::new(CancellationToken::new()),
            failing_connects: AtomicU32::new(0),
            failing_publishes: AtomicU32::new(0),
        }
    }

    /// Publishes `payload` on `topic`. Returns the number of receivers.
    pub fn publish(&self, topic: &str, payload: String) -> usize {
        let sender = self.sender(topic);
        sender.send(payload).unwrap_or(0)
    }

    /// Subscribes to the raw broadcast of `topic`.
    pub fn subscribe(&self, topic: &str) -> broadcast::Receiver<String> {
        self.sender(topic).subscribe()
    }

    /// Number of live receivers on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.topics
            .get(topic)
            .map(|sender| sender.receiver_count())
            .unwrap_or(0)
    }

    /// Drops topics nobody listens to anymore.
    pub fn prune(&self) -> usize {
        let before = self.topics.len();
        self.topics.retain(|_, sender| sender.receiver_count() > 0);
        before - self.topics.len()
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<String> {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CHANNEL_CAPACITY).0)
            .clone()
    }
}

/// [`ChannelPort`] attached to a [`LocalChannelHub`].
pub struct LocalChannel {
    hub: LocalChannelHub,
    connected: AtomicBool,
    /// Parent of every forwarding task; replaced on each connect.
    token: Mutex<CancellationToken>,
    failing_connects: AtomicU32,
    failing_publishes: AtomicU32,
}

impl LocalChannel {
    /// Simulates a network drop: every subscriber sees [`ChannelEvent::Closed`].
    pub fn simulate_drop(&self) {
        log::info!("[LocalChannel] Simulating connection drop");
        self.connected.store(false, Ordering::SeqCst);
        self.token.lock().cancel();
    }

    /// Makes the next `count` connect attempts fail.
    pub fn fail_next_connects(&self, count: u32) {
        self.failing_connects.store(count, Ordering::SeqCst);
    }

    /// Makes the next `count` publishes fail while staying connected.
    pub fn fail_next_publishes(&self, count: u32) {
        self.failing_publishes.store(count, Ordering::SeqCst);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelPort for LocalChannel {
    async fn connect(&self) -> ChannelResult<()> {
        if take_failure(&self.failing_connects) {
            return Err(ChannelError::Connect("simulated connect failure".to_string()));
        }
        *self.token.lock() = CancellationToken::new();
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, topic: &str) -> ChannelResult<mpsc::Receiver<ChannelEvent>> {
        if !self.is_connected() {
            return Err(ChannelError::Closed);
        }

        let mut rx = self.hub.subscribe(topic);
        let (tx, events) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let token = self.token.lock().child_token();
        let topic = topic.to_string();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        let _ = tx.send(ChannelEvent::Closed).await;
                        break;
                    }
                    received = rx.recv() => match received {
                        Ok(payload) => {
                            if tx.send(ChannelEvent::Message(payload)).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            log::warn!("[LocalChannel] Subscriber on {} lagged by {} messages", topic, skipped);
                            let _ = tx
                                .send(ChannelEvent::Error(format!("lagged by {} messages", skipped)))
                                .await;
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            let _ = tx.send(ChannelEvent::Closed).await;
                            break;
                        }
                    }
                }
            }
            log::debug!("[LocalChannel] Forwarder for {} stopped", topic);
        });

        Ok(events)
    }

    async fn publish(&self, topic: &str, payload: String) -> ChannelResult<()> {
        if !self.is_connected() {
            return Err(ChannelError::Closed);
        }
        if take_failure(&self.failing_publishes) {
            return Err(ChannelError::Publish("simulated publish failure".to_string()));
        }
        self.hub.publish(topic, payload);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.token.lock().cancel();
    }
}

/// Consumes one pending simulated failure, if any.
fn take_failure(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_payloads() {
        let hub = LocalChannelHub::new();
        let a = hub.channel();
        let b = hub.channel();
        a.connect().await.unwrap();
        b.connect().await.unwrap();

        let mut rx = b.subscribe("room.r1").await.unwrap();
        a.publish("room.r1", "hello".into()).await.unwrap();

        assert_eq!(rx.recv().await, Some(ChannelEvent::Message("hello".into())));
    }

    #[tokio::test]
    async fn publish_requires_connection() {
        let hub = LocalChannelHub::new();
        let a = hub.channel();
        assert_eq!(
            a.publish("room.r1", "x".into()).await,
            Err(ChannelError::Closed)
        );
    }

    #[tokio::test]
    async fn simulated_publish_failure_is_consumed_once() {
        let hub = LocalChannelHub::new();
        let a = hub.channel();
        a.connect().await.unwrap();
        let mut rx = hub.subscribe("room.r1");
        a.fail_next_publishes(1);

        assert!(matches!(
            a.publish("room.r1", "lost".into()).await,
            Err(ChannelError::Publish(_))
        ));
        a.publish("room.r1", "kept".into()).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), "kept");
        assert!(a.is_connected());
    }

    #[tokio::test]
    async fn simulated_drop_closes_subscriptions() {
        let hub = LocalChannelHub::new();
        let a = hub.channel();
        a.connect().await.unwrap();
        let mut rx = a.subscribe("room.r1").await.unwrap();

        a.simulate_drop();

        assert_eq!(rx.recv().await, Some(ChannelEvent::Closed));
        assert!(!a.is_connected());
        a.connect().await.unwrap();
        assert!(a.is_connected());
    }

    #[tokio::test]
    async fn failing_connects_are_counted_down() {
        let hub = LocalChannelHub::new();
        let a = hub.channel();
        a.fail_next_connects(2);
        assert!(a.connect().await.is_err());
        assert!(a.connect().await.is_err());
        assert!(a.connect().await.is_ok());
    }

    #[tokio::test]
    async fn prune_drops_unused_topics() {
        let hub = LocalChannelHub::new();
        let rx = hub.subscribe("room.r1");
        hub.publish("room.r2", "x".into());
        assert_eq!(hub.prune(), 1);
        assert_eq!(hub.subscriber_count("room.r1"), 1);
        drop(rx);
        assert_eq!(hub.prune(), 1);
    }
}
