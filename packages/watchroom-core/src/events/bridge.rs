//! Bridge that maps room events onto a broadcast channel.

use std::sync::Arc;

use futures::stream::{Stream, StreamExt};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;

use super::emitter::EventEmitter;
use super::{BroadcastEvent, ConnectionEvent, NoticeEvent, RoomEvent};

/// Fans room events out to `tokio::sync::broadcast` subscribers.
///
/// An optional external emitter (e.g. a UI toolkit's event sink) can be set
/// after construction and receives every event before the broadcast.
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<BroadcastEvent>,
    external_emitter: Arc<RwLock<Option<Arc<dyn EventEmitter>>>>,
}

impl BroadcastEventBridge {
    /// Creates a new bridge with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            external_emitter: Arc::new(RwLock::new(None)),
        }
    }

    /// Sets an external emitter that sees every event first.
    pub fn set_external_emitter(&self, emitter: Arc<dyn EventEmitter>) {
        *self.external_emitter.write() = Some(emitter);
    }

    /// Returns a new receiver for the broadcast channel.
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }

    /// Events as a stream. A lagging consumer skips what it missed.
    pub fn stream(&self) -> impl Stream<Item = BroadcastEvent> + Send + 'static {
        BroadcastStream::new(self.tx.subscribe()).filter_map(|result| async move {
            match result {
                Ok(event) => Some(event),
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    log::warn!("[EventBridge] Stream consumer lagged, skipped {} event(s)", skipped);
                    None
                }
            }
        })
    }
}

/// Generates an [`EventEmitter`] method that forwards to the external emitter
/// (if set) and then sends to the broadcast channel.
macro_rules! impl_emit {
    ($method:ident, $event_ty:ty, $variant:ident) => {
        fn $method(&self, event: $event_ty) {
            if let Some(ref emitter) = *self.external_emitter.read() {
                emitter.$method(event.clone());
            }
            if let Err(e) = self.tx.send(BroadcastEvent::$variant(event)) {
                log::trace!("[EventBridge] No broadcast receivers: {}", e);
            }
        }
    };
}

impl EventEmitter for BroadcastEventBridge {
    impl_emit!(emit_room, RoomEvent, Room);
    impl_emit!(emit_connection, ConnectionEvent, Connection);
    impl_emit!(emit_notice, NoticeEvent, Notice);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NoopEventEmitter;

    #[tokio::test]
    async fn bridge_delivers_to_subscribers() {
        let bridge = BroadcastEventBridge::new(8);
        bridge.set_external_emitter(Arc::new(NoopEventEmitter));
        let mut rx = bridge.subscribe();

        bridge.emit_connection(ConnectionEvent::Connected {
            room_id: "r1".into(),
            timestamp: 1,
        });

        match rx.recv().await.unwrap() {
            BroadcastEvent::Connection(ConnectionEvent::Connected { room_id, .. }) => {
                assert_eq!(room_id, "r1");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn stream_skips_lagged_events() {
        let bridge = BroadcastEventBridge::new(2);
        let stream = bridge.stream();
        for attempt in 0..3 {
            bridge.emit_connection(ConnectionEvent::Reconnecting {
                room_id: "r1".into(),
                attempt,
                delay_ms: 500,
                timestamp: 0,
            });
        }

        let events: Vec<_> = stream.take(2).collect().await;
        let attempts: Vec<u32> = events
            .into_iter()
            .map(|event| match event {
                BroadcastEvent::Connection(ConnectionEvent::Reconnecting { attempt, .. }) => attempt,
                other => panic!("unexpected event: {:?}", other),
            })
            .collect();
        assert_eq!(attempts, vec![1, 2]);
    }

    #[test]
    fn emitting_without_subscribers_is_harmless() {
        let bridge = BroadcastEventBridge::new(8);
        bridge.emit_notice(NoticeEvent::Evicted {
            room_id: "r1".into(),
            timestamp: 0,
        });
    }
}
