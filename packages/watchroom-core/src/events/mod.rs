//! Event system for the presentation layer.
//!
//! This module provides:
//! - [`EventEmitter`] trait the room session emits through
//! - [`BroadcastEventBridge`] for fan-out to any number of subscribers
//! - Event types for room state, connection health and user-facing notices

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

use crate::state::{ChatEntry, EngineState, Participant, PlaybackState, QueueItem};

/// Events broadcast to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Room state slices changed.
    Room(RoomEvent),

    /// Channel connectivity changed.
    Connection(ConnectionEvent),

    /// Something the user should be told about.
    Notice(NoticeEvent),
}

/// Events describing a change of one room state slice.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RoomEvent {
    /// The engine moved to a new lifecycle state.
    #[serde(rename_all = "camelCase")]
    StateChanged {
        room_id: String,
        state: EngineState,
        /// Unix timestamp in milliseconds.
        timestamp: u64,
    },
    /// Roster or owner changed.
    #[serde(rename_all = "camelCase")]
    RosterChanged {
        room_id: String,
        owner_id: Option<String>,
        participants: Vec<Participant>,
        timestamp: u64,
    },
    /// Local playback state changed.
    #[serde(rename_all = "camelCase")]
    PlaybackChanged {
        room_id: String,
        playback: PlaybackState,
        timestamp: u64,
    },
    /// Queue order or votes changed.
    #[serde(rename_all = "camelCase")]
    QueueChanged {
        room_id: String,
        queue: Vec<QueueItem>,
        timestamp: u64,
    },
    /// An entry was appended to the timeline.
    #[serde(rename_all = "camelCase")]
    ChatAppended {
        room_id: String,
        entry: ChatEntry,
        timestamp: u64,
    },
}

/// Events related to the channel connection.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConnectionEvent {
    /// Subscribed to the room topic.
    #[serde(rename_all = "camelCase")]
    Connected { room_id: String, timestamp: u64 },
    /// Channel lost; state is retained.
    #[serde(rename_all = "camelCase")]
    Disconnected {
        room_id: String,
        reason: String,
        timestamp: u64,
    },
    /// A reconnect attempt is scheduled.
    #[serde(rename_all = "camelCase")]
    Reconnecting {
        room_id: String,
        attempt: u32,
        delay_ms: u64,
        timestamp: u64,
    },
    /// Reconnect attempts exhausted; the session is over.
    #[serde(rename_all = "camelCase")]
    ReconnectFailed {
        room_id: String,
        attempts: u32,
        timestamp: u64,
    },
}

/// User-facing notices.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum NoticeEvent {
    /// A local action needed room ownership.
    #[serde(rename_all = "camelCase")]
    PermissionDenied {
        room_id: String,
        message: String,
        timestamp: u64,
    },
    /// The owner left; the room is over for this peer.
    #[serde(rename_all = "camelCase")]
    OwnerLost {
        room_id: String,
        owner_id: Option<String>,
        timestamp: u64,
    },
    /// The owner evicted the local participant.
    #[serde(rename_all = "camelCase")]
    Evicted { room_id: String, timestamp: u64 },
    /// A local request failed for another reason.
    #[serde(rename_all = "camelCase")]
    RequestFailed {
        room_id: String,
        code: String,
        message: String,
        timestamp: u64,
    },
}

impl From<RoomEvent> for BroadcastEvent {
    fn from(event: RoomEvent) -> Self {
        BroadcastEvent::Room(event)
    }
}

impl From<ConnectionEvent> for BroadcastEvent {
    fn from(event: ConnectionEvent) -> Self {
        BroadcastEvent::Connection(event)
    }
}

impl From<NoticeEvent> for BroadcastEvent {
    fn from(event: NoticeEvent) -> Self {
        BroadcastEvent::Notice(event)
    }
}
