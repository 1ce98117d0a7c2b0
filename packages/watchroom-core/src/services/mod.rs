//! Room state services.
//!
//! Each service owns one slice of room state. [`RoomSyncEngine`] composes them
//! and is the only writer; the session layer drives the engine.

pub mod message_timeline;
pub mod playback_synchronizer;
pub mod presence_tracker;
pub mod queue_coordinator;
pub mod room_sync_engine;

pub use message_timeline::MessageTimeline;
pub use playback_synchronizer::{EndOfVideo, FollowerOutcome, PlaybackSynchronizer};
pub use presence_tracker::{LeaveOutcome, OwnerAuthority, PresenceTracker};
pub use queue_coordinator::{ProposeOutcome, QueueCoordinator};
pub use room_sync_engine::RoomSyncEngine;
