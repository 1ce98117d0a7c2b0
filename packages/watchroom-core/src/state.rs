//! Core room state types and synchronization configuration.
//!
//! This module provides the data model shared by every component of the
//! engine ([`Participant`], [`PlaybackState`], [`QueueItem`], [`ChatEntry`]),
//! the read-only [`RoomSnapshot`] handed to the presentation layer, and
//! [`SyncConfig`] which carries the tunable timing parameters.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol_constants::{QUEUE_KEY_SEPARATOR, SYSTEM_SENDER_NAME};

// ─────────────────────────────────────────────────────────────────────────────
// Participants
// ─────────────────────────────────────────────────────────────────────────────

/// A peer connected to the room.
///
/// Identity is the `id` alone; two participants with the same id are the same
/// peer even if their display name or avatar changed between sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    /// Unique per session.
    pub id: String,
    /// Name shown in the roster and chat.
    pub display_name: String,
    /// Avatar image URL (may be empty).
    #[serde(default)]
    pub avatar_url: String,
}

impl Participant {
    /// Creates a participant.
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        avatar_url: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            avatar_url: avatar_url.into(),
        }
    }

    /// The synthetic sender of engine-generated chat notices.
    pub fn system() -> Self {
        Self::new("", SYSTEM_SENDER_NAME, "")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Playback
// ─────────────────────────────────────────────────────────────────────────────

/// Locally tracked playback state.
///
/// An empty `video_url` means nothing is playing and the browse/queue view is
/// shown. `position_seconds` is never negative.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackState {
    pub video_url: String,
    pub position_seconds: f64,
    pub is_playing: bool,
    /// Unix timestamp in milliseconds of the last local mutation.
    pub last_updated_at_local: u64,
}

impl PlaybackState {
    /// Returns `true` while a video is loaded.
    #[must_use]
    pub fn is_active(&self) -> bool {
        !self.video_url.is_empty()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Queue
// ─────────────────────────────────────────────────────────────────────────────

/// A video somebody wants to watch next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoCandidate {
    pub title: String,
    pub source_url: String,
    #[serde(default)]
    pub thumbnail_url: String,
}

impl VideoCandidate {
    /// Creates a candidate.
    pub fn new(
        title: impl Into<String>,
        source_url: impl Into<String>,
        thumbnail_url: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            source_url: source_url.into(),
            thumbnail_url: thumbnail_url.into(),
        }
    }

    /// Queue key for this candidate; identical submissions share a key.
    #[must_use]
    pub fn key(&self) -> String {
        QueueItem::derive_key(&self.source_url, &self.title)
    }
}

/// A ranked entry in the vote queue.
///
/// Invariant: `votes == voters.len()` and voters are unique by participant id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub key: String,
    pub title: String,
    pub source_url: String,
    #[serde(default)]
    pub thumbnail_url: String,
    #[serde(default)]
    pub votes: u32,
    #[serde(default)]
    pub voters: Vec<Participant>,
}

impl QueueItem {
    /// Derives the stable key from source and title.
    #[must_use]
    pub fn derive_key(source_url: &str, title: &str) -> String {
        format!("{}{}{}", source_url.trim(), QUEUE_KEY_SEPARATOR, title.trim())
    }

    /// Creates an item carrying a single vote from `proposer`.
    pub fn from_candidate(candidate: &VideoCandidate, proposer: Participant) -> Self {
        Self {
            key: candidate.key(),
            title: candidate.title.clone(),
            source_url: candidate.source_url.clone(),
            thumbnail_url: candidate.thumbnail_url.clone(),
            votes: 1,
            voters: vec![proposer],
        }
    }

    /// Returns `true` if `participant_id` has voted for this item.
    #[must_use]
    pub fn has_voter(&self, participant_id: &str) -> bool {
        self.voters.iter().any(|v| v.id == participant_id)
    }

    /// Back to a candidate, for promotion to playback.
    #[must_use]
    pub fn to_candidate(&self) -> VideoCandidate {
        VideoCandidate::new(&self.title, &self.source_url, &self.thumbnail_url)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Timeline
// ─────────────────────────────────────────────────────────────────────────────

/// Kind of a timeline entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChatKind {
    /// Message typed by a participant.
    Chat,
    /// Synthesized when a participant joins.
    SystemJoin,
    /// Synthesized when a participant leaves.
    SystemLeave,
    /// Engine-generated notice (video changes, owner loss).
    SystemNotice,
}

/// An entry in the local chat timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEntry {
    pub sender: Participant,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attachment: Option<Vec<u8>>,
    pub kind: ChatKind,
    /// Arrival order on this peer only.
    pub local_sequence: u64,
}

impl ChatEntry {
    /// A participant-authored chat message (sequence assigned on append).
    pub fn chat(sender: Participant, content: String, attachment: Option<Vec<u8>>) -> Self {
        Self {
            sender,
            content,
            attachment,
            kind: ChatKind::Chat,
            local_sequence: 0,
        }
    }

    /// A system entry (join, leave, notice) with no attachment.
    pub fn system(kind: ChatKind, sender: Participant, content: impl Into<String>) -> Self {
        Self {
            sender,
            content: content.into(),
            attachment: None,
            kind,
            local_sequence: 0,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine State Machine
// ─────────────────────────────────────────────────────────────────────────────

/// Lifecycle state of a room session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum EngineState {
    /// Channel handshake in progress; outbound messages are queued.
    #[default]
    Connecting,
    /// JOIN announced, waiting for the owner's reconciliation burst.
    Joining,
    /// Fully synchronized.
    Active,
    /// Channel lost; state retained while reconnecting.
    Disconnected,
    /// Session over. Terminal.
    Left,
}

impl EngineState {
    /// Returns `true` once the session can no longer be resumed.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Left
    }
}

/// Immutable view of the room handed to the presentation layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSnapshot {
    pub room_id: String,
    pub local_participant: Participant,
    pub state: EngineState,
    pub owner_id: Option<String>,
    pub is_owner: bool,
    pub participants: Vec<Participant>,
    pub playback: PlaybackState,
    pub queue: Vec<QueueItem>,
    pub timeline: Vec<ChatEntry>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Timing and capacity parameters of a room session.
///
/// The drift thresholds and snapshot interval trade bandwidth against
/// smoothness; they are tunable but must satisfy [`SyncConfig::validate`].
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    /// Owner emits VIDEO_PROGRESS only when its position moved further than this (seconds).
    pub owner_emit_threshold_secs: f64,

    /// Followers seek only when drift exceeds this (seconds).
    /// Must be larger than `owner_emit_threshold_secs`.
    pub follower_drift_tolerance_secs: f64,

    /// Interval of the owner's full playback snapshot (milliseconds).
    pub snapshot_interval_ms: u64,

    /// Interval at which the owner's player position is polled (milliseconds).
    pub progress_poll_interval_ms: u64,

    /// How long a joining peer waits for the owner's reconciliation burst (milliseconds).
    pub join_timeout_ms: u64,

    /// First reconnect delay (milliseconds); doubled on every failed attempt.
    pub reconnect_base_delay_ms: u64,

    /// Upper bound for the reconnect delay (milliseconds).
    pub reconnect_max_delay_ms: u64,

    /// Reconnect attempts before the session gives up (0 = unlimited).
    pub reconnect_max_attempts: u32,

    /// Capacity of the command channel from the presentation layer.
    pub command_channel_capacity: usize,

    /// Capacity of the event broadcast channel.
    pub event_channel_capacity: usize,
}

impl SyncConfig {
    /// Validates the configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.owner_emit_threshold_secs > 0.0) {
            return Err("owner_emit_threshold_secs must be > 0".to_string());
        }
        if !(self.follower_drift_tolerance_secs > self.owner_emit_threshold_secs) {
            return Err(
                "follower_drift_tolerance_secs must exceed owner_emit_threshold_secs \
                 (equal thresholds make followers oscillate)"
                    .to_string(),
            );
        }
        if self.snapshot_interval_ms == 0 {
            return Err("snapshot_interval_ms must be >= 1".to_string());
        }
        if self.progress_poll_interval_ms == 0 {
            return Err("progress_poll_interval_ms must be >= 1".to_string());
        }
        if self.join_timeout_ms == 0 {
            return Err("join_timeout_ms must be >= 1".to_string());
        }
        if self.reconnect_base_delay_ms == 0
            || self.reconnect_base_delay_ms > self.reconnect_max_delay_ms
        {
            return Err(
                "reconnect delays must satisfy 0 < base <= max".to_string(),
            );
        }
        if self.command_channel_capacity == 0 || self.event_channel_capacity == 0 {
            return Err(
                "channel capacities must be >= 1 (tokio channels panic on 0)".to_string(),
            );
        }
        Ok(())
    }

    pub fn snapshot_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_interval_ms)
    }

    pub fn progress_poll_interval(&self) -> Duration {
        Duration::from_millis(self.progress_poll_interval_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            owner_emit_threshold_secs: 1.0,
            follower_drift_tolerance_secs: 2.0,
            snapshot_interval_ms: 5_000,
            progress_poll_interval_ms: 1_000,
            join_timeout_ms: 3_000,
            reconnect_base_delay_ms: 500,
            reconnect_max_delay_ms: 30_000,
            reconnect_max_attempts: 10,
            command_channel_capacity: 64,
            event_channel_capacity: 100,
        }
    }
}
