//! Watchroom Core - room synchronization engine.
//!
//! Peers in a room share one video: the owner's player is authoritative and
//! followers correct their drift against its broadcasts. Participants chat and
//! vote on a queue of upcoming videos. Everything travels as JSON messages on
//! a per-room pub/sub topic.
//!
//! # Architecture
//!
//! - [`state`]: domain types and [`SyncConfig`]
//! - [`protocol`]: the wire message union
//! - [`services`]: presence, playback, queue and chat state, composed by
//!   [`RoomSyncEngine`]
//! - [`session`]: the async task driving an engine, and [`RoomHandle`]
//! - [`channel`]: the [`ChannelPort`] transport with in-process and WebSocket
//!   implementations
//! - [`collaborators`]: room directory and video catalog over HTTP
//! - [`events`]: events for the presentation layer
//! - [`api`]: the relay server
//!
//! # Abstraction Traits
//!
//! - [`ChannelPort`](channel::ChannelPort): pub/sub transport
//! - [`MediaPlayer`](player::MediaPlayer): the local video player
//! - [`EventEmitter`](events::EventEmitter): presentation events
//! - [`QueueCache`](cache::QueueCache): local queue persistence
//! - [`RoomDirectory`](collaborators::RoomDirectory) and
//!   [`VideoCatalog`](collaborators::VideoCatalog): request/response collaborators

#![allow(missing_docs)]
#![warn(clippy::all)]

pub mod api;
pub mod cache;
pub mod channel;
pub mod collaborators;
pub mod error;
pub mod events;
pub mod player;
pub mod protocol;
pub mod protocol_constants;
pub mod services;
pub mod session;
pub mod state;
pub mod utils;

// Re-export commonly used types at the crate root
pub use error::{ErrorCode, RoomError, RoomResult};
pub use events::{
    BroadcastEvent, BroadcastEventBridge, ConnectionEvent, EventEmitter, LoggingEventEmitter,
    NoopEventEmitter, NoticeEvent, RoomEvent,
};
pub use state::{
    ChatEntry, ChatKind, EngineState, Participant, PlaybackState, QueueItem, RoomSnapshot,
    SyncConfig, VideoCandidate,
};
pub use utils::now_millis;

// Re-export engine and session types
pub use protocol::RoomMessage;
pub use services::{ProposeOutcome, RoomSyncEngine};
pub use session::{RoomHandle, RoomSession};

// Re-export ports and their implementations
pub use cache::{FileQueueCache, MemoryQueueCache, QueueCache};
pub use channel::{ChannelError, ChannelEvent, ChannelPort, LocalChannel, LocalChannelHub, WsChannel};
pub use collaborators::{
    CatalogVideo, DebouncedSearch, ExternalSearchConfig, ExternalVideo, HttpRoomDirectory,
    HttpVideoCatalog, RoomDirectory, RoomInfo, VideoCatalog,
};
pub use player::{ClockPlayer, MediaPlayer};

// Re-export API types
pub use api::{start_server, RelayState, RelayStateBuilder, ServerError, WsConnectionManager};
