//! Authoritative playback state and follower drift correction.
//!
//! Only the owner originates playback messages; every owner operation demands
//! an [`OwnerAuthority`]. Followers apply inbound messages silently.
//!
//! Two thresholds govern the exchange:
//! - the owner emits `VIDEO_PROGRESS` once its position moved more than
//!   `owner_emit_threshold` since the last report
//! - a follower seeks only when it drifted more than `follower_drift_tolerance`
//!
//! The follower tolerance is strictly larger so a follower never chases the
//! owner's own reporting granularity.

use crate::error::{RoomError, RoomResult};
use crate::player::MediaPlayer;
use crate::protocol::RoomMessage;
use crate::services::presence_tracker::OwnerAuthority;
use crate::state::{PlaybackState, QueueItem, SyncConfig};
use crate::utils::now_millis;

/// What a follower did with an inbound playback message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowerOutcome {
    /// Not a playback message.
    Ignored,
    /// Empty URL: playback cleared, browse view revealed.
    Cleared,
    /// A different video was loaded at the authoritative position.
    Loaded,
    /// Same video, drift exceeded tolerance, seeked.
    Seeked,
    /// Same video, within tolerance; play state applied without seeking.
    InSync,
}

/// Result of the end-of-video transition.
#[derive(Debug, Clone, PartialEq)]
pub enum EndOfVideo {
    /// The owner promoted the given queue head; `update` must be published.
    Promoted { item: QueueItem, update: RoomMessage },
    /// Queue was empty; playback cleared and `update` tells followers to browse.
    Browse { update: RoomMessage },
    /// A follower's video ended; it waits for the owner's next update.
    AwaitOwner,
}

/// Owns the local [`PlaybackState`] slice.
#[derive(Debug)]
pub struct PlaybackSynchronizer {
    state: PlaybackState,
    /// Position carried by the last VIDEO_* message the owner emitted.
    last_reported_seconds: f64,
    owner_emit_threshold: f64,
    follower_drift_tolerance: f64,
}

impl PlaybackSynchronizer {
    /// Creates a synchronizer with the thresholds from `config`.
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            state: PlaybackState::default(),
            last_reported_seconds: 0.0,
            owner_emit_threshold: config.owner_emit_threshold_secs,
            follower_drift_tolerance: config.follower_drift_tolerance_secs,
        }
    }

    /// Current playback state.
    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    /// Returns `true` while a video is loaded.
    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Owner operations
    // ─────────────────────────────────────────────────────────────────────────────

    /// Starts `url` from the beginning and returns the `VIDEO_UPDATE` to publish.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::InvalidRequest`] for an empty URL; use
    /// [`Self::owner_clear`] to stop playback.
    pub fn owner_set_video(
        &mut self,
        _authority: &OwnerAuthority,
        url: &str,
        player: &mut dyn MediaPlayer,
    ) -> RoomResult<RoomMessage> {
        let url = url.trim();
        if url.is_empty() {
            return Err(RoomError::InvalidRequest("video URL is empty".to_string()));
        }

        log::info!("[Playback] Owner set video {}", url);
        self.state = PlaybackState {
            video_url: url.to_string(),
            position_seconds: 0.0,
            is_playing: true,
            last_updated_at_local: now_millis(),
        };
        self.last_reported_seconds = 0.0;
        player.load(url, 0.0);
        player.set_playing(true);

        Ok(self.full_update())
    }

    /// Stops playback for everyone and returns the empty `VIDEO_UPDATE`.
    pub fn owner_clear(
        &mut self,
        _authority: &OwnerAuthority,
        player: &mut dyn MediaPlayer,
    ) -> RoomMessage {
        self.clear_local(player);
        self.full_update()
    }

    /// Pauses at the player's current position.
    ///
    /// Returns `None` when nothing is loaded or playback is already paused.
    pub fn owner_pause(
        &mut self,
        _authority: &OwnerAuthority,
        player: &mut dyn MediaPlayer,
    ) -> Option<RoomMessage> {
        if !self.state.is_active() || !self.state.is_playing {
            return None;
        }
        let position = player.position().max(0.0);
        player.set_playing(false);
        self.record_owner_state(position, false);

        Some(RoomMessage::VideoPause {
            video_url: self.state.video_url.clone(),
            position_seconds: position,
        })
    }

    /// Resumes at the player's current position.
    ///
    /// Returns `None` when nothing is loaded or playback is already running.
    pub fn owner_resume(
        &mut self,
        _authority: &OwnerAuthority,
        player: &mut dyn MediaPlayer,
    ) -> Option<RoomMessage> {
        if !self.state.is_active() || self.state.is_playing {
            return None;
        }
        let position = player.position().max(0.0);
        player.set_playing(true);
        self.record_owner_state(position, true);

        Some(RoomMessage::VideoPlay {
            video_url: self.state.video_url.clone(),
            position_seconds: position,
        })
    }

    /// Reports the owner's position; emits `VIDEO_PROGRESS` only when it moved
    /// more than the emit threshold since the last report.
    pub fn owner_report_progress(
        &mut self,
        _authority: &OwnerAuthority,
        current_seconds: f64,
    ) -> Option<RoomMessage> {
        if !self.state.is_active() || !current_seconds.is_finite() {
            return None;
        }
        let current = current_seconds.max(0.0);
        self.state.position_seconds = current;
        self.state.last_updated_at_local = now_millis();

        if (current - self.last_reported_seconds).abs() <= self.owner_emit_threshold {
            return None;
        }
        self.last_reported_seconds = current;
        Some(RoomMessage::VideoProgress {
            video_url: self.state.video_url.clone(),
            position_seconds: current,
        })
    }

    /// Full-state `VIDEO_UPDATE` for the periodic snapshot and joiner
    /// reconciliation. Returns `None` while no video is active.
    pub fn owner_snapshot(
        &mut self,
        _authority: &OwnerAuthority,
        player: &dyn MediaPlayer,
    ) -> Option<RoomMessage> {
        if !self.state.is_active() {
            return None;
        }
        let position = player.position().max(0.0);
        self.record_owner_state(position, self.state.is_playing);
        Some(self.full_update())
    }

    /// End-of-video transition.
    ///
    /// With an authority, promotes `next` (already dequeued by the caller) or
    /// clears playback when there is nothing left. Without one, only marks the
    /// local player as stopped.
    pub fn on_video_ended(
        &mut self,
        authority: Option<&OwnerAuthority>,
        next: Option<QueueItem>,
        player: &mut dyn MediaPlayer,
    ) -> RoomResult<EndOfVideo> {
        let Some(authority) = authority else {
            self.state.is_playing = false;
            self.state.last_updated_at_local = now_millis();
            return Ok(EndOfVideo::AwaitOwner);
        };

        match next {
            Some(item) => {
                let update = self.owner_set_video(authority, &item.source_url, player)?;
                Ok(EndOfVideo::Promoted { item, update })
            }
            None => {
                log::info!("[Playback] Video ended with empty queue, showing browse view");
                Ok(EndOfVideo::Browse {
                    update: self.owner_clear(authority, player),
                })
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Follower operations
    // ─────────────────────────────────────────────────────────────────────────────

    /// Applies an authoritative playback message on a follower.
    ///
    /// Never produces outbound messages.
    pub fn follower_apply(
        &mut self,
        message: &RoomMessage,
        player: &mut dyn MediaPlayer,
    ) -> FollowerOutcome {
        let (url, position, playing) = match message {
            RoomMessage::VideoUpdate {
                video_url,
                position_seconds,
                is_playing,
            } => (video_url, *position_seconds, Some(*is_playing)),
            RoomMessage::VideoPlay {
                video_url,
                position_seconds,
            } => (video_url, *position_seconds, Some(true)),
            RoomMessage::VideoPause {
                video_url,
                position_seconds,
            } => (video_url, *position_seconds, Some(false)),
            RoomMessage::VideoProgress {
                video_url,
                position_seconds,
            } => (video_url, *position_seconds, None),
            _ => return FollowerOutcome::Ignored,
        };

        if url.is_empty() {
            self.clear_local(player);
            return FollowerOutcome::Cleared;
        }

        let position = position.max(0.0);

        if *url != self.state.video_url {
            // A different video always reloads, drift tolerance does not apply.
            let is_playing = playing.unwrap_or(true);
            log::info!("[Playback] Loading {} at {:.1}s", url, position);
            player.load(url, position);
            player.set_playing(is_playing);
            self.state = PlaybackState {
                video_url: url.clone(),
                position_seconds: position,
                is_playing,
                last_updated_at_local: now_millis(),
            };
            return FollowerOutcome::Loaded;
        }

        if let Some(is_playing) = playing {
            if is_playing != self.state.is_playing {
                player.set_playing(is_playing);
                self.state.is_playing = is_playing;
            }
        }

        let local = player.position();
        let outcome = if (local - position).abs() > self.follower_drift_tolerance {
            log::debug!(
                "[Playback] Drift {:.2}s exceeds tolerance, seeking to {:.1}s",
                local - position,
                position
            );
            player.seek_to(position);
            self.state.position_seconds = position;
            FollowerOutcome::Seeked
        } else {
            self.state.position_seconds = local.max(0.0);
            FollowerOutcome::InSync
        };
        self.state.last_updated_at_local = now_millis();
        outcome
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Private helpers
    // ─────────────────────────────────────────────────────────────────────────────

    fn clear_local(&mut self, player: &mut dyn MediaPlayer) {
        if self.state.is_active() {
            log::info!("[Playback] Clearing playback of {}", self.state.video_url);
        }
        player.clear();
        self.state = PlaybackState {
            last_updated_at_local: now_millis(),
            ..PlaybackState::default()
        };
        self.last_reported_seconds = 0.0;
    }

    fn record_owner_state(&mut self, position: f64, is_playing: bool) {
        self.state.position_seconds = position;
        self.state.is_playing = is_playing;
        self.state.last_updated_at_local = now_millis();
        self.last_reported_seconds = position;
    }

    fn full_update(&self) -> RoomMessage {
        RoomMessage::VideoUpdate {
            video_url: self.state.video_url.clone(),
            position_seconds: self.state.position_seconds,
            is_playing: self.state.is_playing,
        }
    }
}
