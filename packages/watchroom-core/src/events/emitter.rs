//! Event emitter abstraction for decoupling the room session from transport.
//!
//! The session depends on the [`EventEmitter`] trait rather than concrete
//! broadcast channels, enabling testing and alternative front-ends.

use super::{ConnectionEvent, NoticeEvent, RoomEvent};

/// Trait for emitting room events without knowledge of how they are delivered.
///
/// # Example
///
/// ```ignore
/// let emitter: Arc<dyn EventEmitter> = Arc::new(LoggingEventEmitter);
/// let handle = RoomSession::spawn(params, channel, player, emitter)?;
/// ```
pub trait EventEmitter: Send + Sync {
    /// Emits a room state change.
    fn emit_room(&self, event: RoomEvent);

    /// Emits a connectivity change.
    fn emit_connection(&self, event: ConnectionEvent);

    /// Emits a user-facing notice.
    fn emit_notice(&self, event: NoticeEvent);
}

/// No-op emitter for headless use or testing.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_room(&self, _event: RoomEvent) {}

    fn emit_connection(&self, _event: ConnectionEvent) {}

    fn emit_notice(&self, _event: NoticeEvent) {}
}

/// Logging emitter for debugging and development.
///
/// Logs all events at debug level.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_room(&self, event: RoomEvent) {
        tracing::debug!(?event, "room_event");
    }

    fn emit_connection(&self, event: ConnectionEvent) {
        tracing::debug!(?event, "connection_event");
    }

    fn emit_notice(&self, event: NoticeEvent) {
        tracing::debug!(?event, "notice_event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Test emitter that counts events.
    struct CountingEventEmitter {
        room_count: AtomicUsize,
        notice_count: AtomicUsize,
    }

    impl EventEmitter for CountingEventEmitter {
        fn emit_room(&self, _event: RoomEvent) {
            self.room_count.fetch_add(1, Ordering::SeqCst);
        }

        fn emit_connection(&self, _event: ConnectionEvent) {}

        fn emit_notice(&self, _event: NoticeEvent) {
            self.notice_count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn counting_emitter_tracks_events() {
        let emitter = Arc::new(CountingEventEmitter {
            room_count: AtomicUsize::new(0),
            notice_count: AtomicUsize::new(0),
        });
        let dyn_emitter: Arc<dyn EventEmitter> = emitter.clone();

        dyn_emitter.emit_room(RoomEvent::QueueChanged {
            room_id: "r1".into(),
            queue: vec![],
            timestamp: 0,
        });
        dyn_emitter.emit_notice(NoticeEvent::Evicted {
            room_id: "r1".into(),
            timestamp: 0,
        });
        dyn_emitter.emit_connection(ConnectionEvent::Connected {
            room_id: "r1".into(),
            timestamp: 0,
        });

        assert_eq!(emitter.room_count.load(Ordering::SeqCst), 1);
        assert_eq!(emitter.notice_count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn notice_serializes_with_type_tag() {
        let json = serde_json::to_value(NoticeEvent::PermissionDenied {
            room_id: "r1".into(),
            message: "set video requires room ownership".into(),
            timestamp: 5,
        })
        .unwrap();
        assert_eq!(json["type"], "permissionDenied");
        assert_eq!(json["roomId"], "r1");
    }
}
