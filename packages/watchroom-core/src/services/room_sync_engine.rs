//! The room state machine.
//!
//! [`RoomSyncEngine`] composes the four state owners ([`PresenceTracker`],
//! [`PlaybackSynchronizer`], [`QueueCoordinator`], [`MessageTimeline`]) behind a
//! single entry point. It never awaits: inbound messages, timer ticks and local
//! commands are applied synchronously, and anything that must go on the wire is
//! pushed to an outbox that the session drains once the channel is up.
//!
//! Lifecycle: `Connecting -> Joining -> Active`, with `Disconnected` between
//! reconnect attempts and `Left` as the terminal state.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::cache::QueueCache;
use crate::collaborators::RoomInfo;
use crate::error::{RoomError, RoomResult};
use crate::events::{EventEmitter, NoticeEvent, RoomEvent};
use crate::player::MediaPlayer;
use crate::protocol::{decode_attachment, RoomMessage};
use crate::protocol_constants::{queue_cache_key, SYSTEM_SENDER_NAME};
use crate::services::message_timeline::MessageTimeline;
use crate::services::playback_synchronizer::{EndOfVideo, FollowerOutcome, PlaybackSynchronizer};
use crate::services::presence_tracker::{LeaveOutcome, OwnerAuthority, PresenceTracker};
use crate::services::queue_coordinator::{ProposeOutcome, QueueCoordinator};
use crate::state::{
    ChatEntry, ChatKind, EngineState, Participant, RoomSnapshot, SyncConfig, VideoCandidate,
};
use crate::utils::{display_title, now_millis, title_from_url};

/// Synchronous core of one room session.
pub struct RoomSyncEngine {
    room_id: String,
    local: Participant,
    state: EngineState,

    presence: PresenceTracker,
    playback: PlaybackSynchronizer,
    queue: QueueCoordinator,
    timeline: MessageTimeline,

    player: Box<dyn MediaPlayer>,
    outbox: VecDeque<RoomMessage>,
    cache: Option<Arc<dyn QueueCache>>,
    emitter: Arc<dyn EventEmitter>,
}

impl RoomSyncEngine {
    /// Creates an engine in `Connecting` and restores the cached queue, if any.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::Configuration`] for an invalid `config` and
    /// [`RoomError::InvalidRequest`] for an empty room or participant id.
    pub fn new(
        room_id: impl Into<String>,
        local: Participant,
        config: &SyncConfig,
        player: Box<dyn MediaPlayer>,
        emitter: Arc<dyn EventEmitter>,
        cache: Option<Arc<dyn QueueCache>>,
    ) -> RoomResult<Self> {
        config.validate().map_err(RoomError::Configuration)?;
        let room_id = room_id.into();
        if room_id.trim().is_empty() {
            return Err(RoomError::InvalidRequest("room id is empty".to_string()));
        }
        if local.id.trim().is_empty() {
            return Err(RoomError::InvalidRequest(
                "participant id is empty".to_string(),
            ));
        }

        let mut presence = PresenceTracker::new();
        // Present locally from the start, but never owner by default.
        presence.replace_roster(Vec::new(), None, &local);

        let mut engine = Self {
            queue: QueueCoordinator::new(room_id.clone()),
            room_id,
            local,
            state: EngineState::Connecting,
            presence,
            playback: PlaybackSynchronizer::new(config),
            timeline: MessageTimeline::new(),
            player,
            outbox: VecDeque::new(),
            cache,
            emitter,
        };
        engine.restore_cached_queue();
        Ok(engine)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Accessors
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn local_participant(&self) -> &Participant {
        &self.local
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    /// Returns `true` if the local participant owns the room.
    pub fn is_owner(&self) -> bool {
        self.presence.is_owner(&self.local.id)
    }

    pub fn player(&self) -> &dyn MediaPlayer {
        self.player.as_ref()
    }

    /// Immutable copy of every state slice for the presentation layer.
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            room_id: self.room_id.clone(),
            local_participant: self.local.clone(),
            state: self.state,
            owner_id: self.presence.owner_id().map(str::to_string),
            is_owner: self.is_owner(),
            participants: self.presence.participants().to_vec(),
            playback: self.playback.state().clone(),
            queue: self.queue.items().to_vec(),
            timeline: self.timeline.entries().to_vec(),
        }
    }

    /// Takes the messages that may go on the wire now.
    ///
    /// While `Connecting` or `Disconnected` nothing is released; messages stay
    /// queued until the channel is back.
    pub fn drain_outbox(&mut self) -> Vec<RoomMessage> {
        match self.state {
            EngineState::Connecting | EngineState::Disconnected => Vec::new(),
            EngineState::Joining | EngineState::Active | EngineState::Left => {
                self.outbox.drain(..).collect()
            }
        }
    }

    /// Puts messages the channel refused back at the head of the outbox,
    /// ahead of anything queued since, keeping their order.
    pub fn requeue_front(&mut self, messages: Vec<RoomMessage>) {
        for message in messages.into_iter().rev() {
            self.outbox.push_front(message);
        }
    }

    /// Number of messages waiting in the outbox.
    pub fn pending_outbound(&self) -> usize {
        self.outbox.len()
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Connection lifecycle
    // ─────────────────────────────────────────────────────────────────────────────

    /// The channel is subscribed: announce ourselves.
    ///
    /// A reconnecting owner resumes `Active` and re-broadcasts its state;
    /// everybody else waits for the owner's reconciliation burst in `Joining`.
    pub fn on_connected(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        // JOIN goes out before anything queued while offline, exactly once.
        self.outbox
            .retain(|message| !matches!(message, RoomMessage::Join { .. }));
        self.outbox.push_front(RoomMessage::join(&self.local));

        if self.is_owner() {
            self.set_state(EngineState::Active);
            self.queue_reconciliation_burst();
            self.maybe_promote_head();
        } else {
            self.set_state(EngineState::Joining);
        }
    }

    /// The channel dropped. State is retained for the reconnect.
    pub fn on_disconnected(&mut self, reason: &str) {
        if self.state.is_terminal() || self.state == EngineState::Disconnected {
            return;
        }
        log::warn!("[Engine] Room {} disconnected: {}", self.room_id, reason);
        self.set_state(EngineState::Disconnected);
    }

    /// Applies room metadata fetched while joining.
    pub fn on_room_info(&mut self, info: Option<RoomInfo>) {
        let Some(info) = info else {
            log::info!("[Engine] Room {} unknown to the directory", self.room_id);
            return;
        };
        let Some(owner_id) = info.owner_id.filter(|id| !id.is_empty()) else {
            return;
        };
        if self.presence.owner_id() == Some(owner_id.as_str()) {
            return;
        }

        self.presence.set_owner(Some(owner_id.clone()));
        self.emit_roster();

        if owner_id == self.local.id && self.state == EngineState::Joining {
            log::info!("[Engine] Directory names us owner of {}", self.room_id);
            self.set_state(EngineState::Active);
            self.queue_reconciliation_burst();
            self.maybe_promote_head();
        }
    }

    /// No reconciliation arrived in time.
    ///
    /// Without a known owner the local participant claims the room (first
    /// joiner). Otherwise the owner is silent and we go `Active` with no video.
    pub fn on_join_timeout(&mut self) {
        if self.state != EngineState::Joining {
            return;
        }

        if self.presence.owner_id().is_none() {
            log::info!(
                "[Engine] No owner answered in {}, claiming ownership",
                self.room_id
            );
            self.presence.set_owner(Some(self.local.id.clone()));
            self.emit_roster();
            self.set_state(EngineState::Active);
            self.queue_reconciliation_burst();
            self.maybe_promote_head();
        } else {
            log::info!(
                "[Engine] Owner of {} did not reconcile in time, continuing without video",
                self.room_id
            );
            self.set_state(EngineState::Active);
        }
    }

    /// Leaves the room: LEAVE, or OWNER_LEFT when we own it. Terminal.
    pub fn leave(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        let message = if self.is_owner() {
            RoomMessage::OwnerLeft {
                sender_id: Some(self.local.id.clone()),
            }
        } else {
            RoomMessage::leave(&self.local)
        };
        log::info!("[Engine] {} leaving room {}", self.local.id, self.room_id);
        self.outbox.push_back(message);
        self.set_state(EngineState::Left);
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Inbound dispatch
    // ─────────────────────────────────────────────────────────────────────────────

    /// Decodes and applies a raw channel payload. Malformed payloads are dropped.
    pub fn handle_raw(&mut self, raw: &str) {
        match RoomMessage::decode(raw) {
            Ok(message) => self.handle_message(message),
            Err(e) => log::warn!("[Engine] Dropping message in {}: {}", self.room_id, e),
        }
    }

    /// Applies one inbound message.
    pub fn handle_message(&mut self, message: RoomMessage) {
        if self.state.is_terminal() {
            return;
        }
        log::trace!("[Engine] {} <- {}", self.local.id, message.kind());

        match message {
            RoomMessage::Join {
                sender_id,
                sender,
                avatar_url,
            } => self.on_remote_join(Participant::new(sender_id, sender, avatar_url)),
            RoomMessage::Leave { sender_id, .. } => self.on_remote_leave(&sender_id),
            RoomMessage::OwnerLeft { sender_id } => self.on_owner_left(sender_id),
            RoomMessage::Chat {
                sender_id,
                sender,
                avatar_url,
                content,
                attachment,
            } => self.on_remote_chat(
                Participant::new(sender_id, sender, avatar_url),
                content,
                attachment,
            ),
            message @ (RoomMessage::VideoUpdate { .. }
            | RoomMessage::VideoPlay { .. }
            | RoomMessage::VideoPause { .. }
            | RoomMessage::VideoProgress { .. }) => self.on_remote_playback(message),
            RoomMessage::QueueUpdate {
                room_id,
                queue,
                sender_id,
            } => {
                if room_id != self.room_id {
                    log::warn!("[Engine] Ignoring QUEUE_UPDATE for room {}", room_id);
                    return;
                }
                if sender_id.as_deref() == Some(self.local.id.as_str()) {
                    return;
                }
                self.queue.apply_snapshot(queue);
                self.persist_queue();
                self.emit_queue();
                self.maybe_promote_head();
            }
            RoomMessage::RosterSnapshot {
                room_id,
                owner_id,
                participants,
            } => {
                if room_id != self.room_id || self.is_owner() {
                    return;
                }
                self.presence
                    .replace_roster(participants, owner_id, &self.local);
                self.emit_roster();
                if self.state == EngineState::Joining {
                    self.set_state(EngineState::Active);
                }
            }
            RoomMessage::Evict { participant_id } => self.on_evict(&participant_id),
        }
    }

    fn on_remote_join(&mut self, participant: Participant) {
        if participant.id == self.local.id {
            return;
        }
        let name = participant.display_name.clone();
        if self.presence.on_join(participant) {
            self.append_system(ChatKind::SystemJoin, format!("{} joined the room", name));
        }
        self.emit_roster();

        // Every JOIN, duplicates included, may come from a peer that missed state.
        if self.is_owner() && self.state == EngineState::Active {
            self.queue_reconciliation_burst();
        }
    }

    fn on_remote_leave(&mut self, participant_id: &str) {
        if participant_id == self.local.id {
            return;
        }
        match self.presence.on_leave(participant_id) {
            LeaveOutcome::Unknown => {}
            LeaveOutcome::Left(participant) => {
                self.append_system(
                    ChatKind::SystemLeave,
                    format!("{} left the room", participant.display_name),
                );
                self.emit_roster();
                if self.is_owner() && self.queue.retract_votes(&participant.id) {
                    self.broadcast_queue();
                }
            }
            LeaveOutcome::OwnerLost(owner) => self.owner_lost(Some(owner)),
        }
    }

    fn on_owner_left(&mut self, sender_id: Option<String>) {
        if self.is_owner() {
            return;
        }
        let owner_id = sender_id.or_else(|| self.presence.owner_id().map(str::to_string));
        let owner = match owner_id {
            Some(id) => match self.presence.on_leave(&id) {
                LeaveOutcome::Left(p) | LeaveOutcome::OwnerLost(p) => Some(p),
                LeaveOutcome::Unknown => None,
            },
            None => None,
        };
        self.owner_lost(owner);
    }

    fn owner_lost(&mut self, owner: Option<Participant>) {
        let owner_id = owner.as_ref().map(|p| p.id.clone());
        if let Some(owner) = &owner {
            self.append_system(
                ChatKind::SystemLeave,
                format!("{} left the room", owner.display_name),
            );
        }
        self.append_system(
            ChatKind::SystemNotice,
            "The room owner left. This room is closed.",
        );
        self.presence.set_owner(None);
        self.emit_roster();
        self.emitter.emit_notice(NoticeEvent::OwnerLost {
            room_id: self.room_id.clone(),
            owner_id,
            timestamp: now_millis(),
        });
        self.leave();
    }

    fn on_remote_chat(&mut self, sender: Participant, content: String, attachment: Option<String>) {
        if sender.id == self.local.id {
            return;
        }
        let attachment = match attachment.as_deref().map(decode_attachment).transpose() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("[Engine] Dropping chat attachment: {}", e);
                None
            }
        };

        let is_notice =
            sender.display_name == SYSTEM_SENDER_NAME && self.presence.is_owner(&sender.id);
        let entry = if is_notice {
            ChatEntry::system(ChatKind::SystemNotice, Participant::system(), content)
        } else {
            ChatEntry::chat(sender, content, attachment)
        };
        self.append_entry(entry);
    }

    fn on_remote_playback(&mut self, message: RoomMessage) {
        if self.is_owner() {
            return;
        }
        let reconciles = matches!(message, RoomMessage::VideoUpdate { .. });
        let outcome = self.playback.follower_apply(&message, self.player.as_mut());
        if outcome != FollowerOutcome::Ignored {
            self.emit_playback();
        }
        if reconciles && self.state == EngineState::Joining {
            self.set_state(EngineState::Active);
        }
    }

    fn on_evict(&mut self, participant_id: &str) {
        if self.is_owner() {
            return;
        }
        if participant_id == self.local.id {
            log::info!("[Engine] Evicted from {}", self.room_id);
            self.append_system(ChatKind::SystemNotice, "You were removed from the room.");
            self.emitter.emit_notice(NoticeEvent::Evicted {
                room_id: self.room_id.clone(),
                timestamp: now_millis(),
            });
            self.leave();
            return;
        }
        if let LeaveOutcome::Left(participant) = self.presence.on_leave(participant_id) {
            self.append_system(
                ChatKind::SystemLeave,
                format!("{} was removed from the room", participant.display_name),
            );
            self.emit_roster();
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Local commands
    // ─────────────────────────────────────────────────────────────────────────────

    /// Sends a chat message (text and/or image bytes).
    pub fn send_chat(&mut self, content: String, attachment: Option<Vec<u8>>) -> RoomResult<()> {
        self.ensure_open()?;
        if content.trim().is_empty() && attachment.is_none() {
            return Err(RoomError::InvalidRequest("chat message is empty".to_string()));
        }
        let message = RoomMessage::chat(&self.local, content.clone(), attachment.as_deref());
        self.append_entry(ChatEntry::chat(self.local.clone(), content, attachment));
        self.outbox.push_back(message);
        Ok(())
    }

    /// Owner: plays `url` for everyone from the beginning.
    pub fn set_video(&mut self, url: &str) -> RoomResult<()> {
        self.ensure_open()?;
        let authority = self.authorize("set video")?;
        self.start_video(&authority, url, &title_from_url(url))
    }

    /// Owner: stops playback and shows everyone the browse view.
    pub fn clear_video(&mut self) -> RoomResult<()> {
        self.ensure_open()?;
        let authority = self.authorize("clear video")?;
        let message = self.playback.owner_clear(&authority, self.player.as_mut());
        self.outbox.push_back(message);
        self.emit_playback();
        Ok(())
    }

    /// Owner: pauses playback.
    pub fn pause(&mut self) -> RoomResult<()> {
        self.ensure_open()?;
        let authority = self.authorize("pause")?;
        if let Some(message) = self.playback.owner_pause(&authority, self.player.as_mut()) {
            self.outbox.push_back(message);
            self.emit_playback();
        }
        Ok(())
    }

    /// Owner: resumes playback.
    pub fn resume(&mut self) -> RoomResult<()> {
        self.ensure_open()?;
        let authority = self.authorize("resume")?;
        if let Some(message) = self.playback.owner_resume(&authority, self.player.as_mut()) {
            self.outbox.push_back(message);
            self.emit_playback();
        }
        Ok(())
    }

    /// Proposes a video. Starts it right away when the owner proposes in an
    /// idle room; otherwise it is queued (or counted as a vote).
    pub fn propose(&mut self, candidate: VideoCandidate) -> RoomResult<ProposeOutcome> {
        self.ensure_open()?;
        let outcome = self
            .queue
            .propose(&self.local, candidate, self.playback.is_active())?;

        match outcome {
            ProposeOutcome::PlayNow(candidate) => {
                if let Ok(authority) = self.authorize("play now") {
                    self.start_video(&authority, &candidate.source_url, &candidate.title)?;
                    Ok(ProposeOutcome::PlayNow(candidate))
                } else {
                    // Only the owner starts playback; it promotes this as soon as it sees it.
                    let key = self.queue.enqueue(&self.local, &candidate);
                    self.broadcast_queue();
                    Ok(ProposeOutcome::Queued { key })
                }
            }
            outcome => {
                if outcome.mutated() {
                    self.broadcast_queue();
                }
                Ok(outcome)
            }
        }
    }

    /// Moves the local vote to the item with `key`.
    pub fn vote(&mut self, key: &str) -> RoomResult<bool> {
        self.ensure_open()?;
        let changed = self.queue.vote(&self.local, key)?;
        if changed {
            self.broadcast_queue();
        }
        Ok(changed)
    }

    /// Owner: removes the queue item at `index`.
    pub fn remove_queue_item(&mut self, index: usize) -> RoomResult<()> {
        self.ensure_open()?;
        let authority = self.authorize("remove queue item")?;
        self.queue.remove_at(&authority, index)?;
        self.broadcast_queue();
        Ok(())
    }

    /// Owner: removes `participant_id` from the room.
    pub fn evict(&mut self, participant_id: &str) -> RoomResult<()> {
        self.ensure_open()?;
        let authority = self.authorize("evict participant")?;
        let Some(participant) = self.presence.evict(&authority, participant_id)? else {
            return Err(RoomError::InvalidRequest(format!(
                "{} is not in the room",
                participant_id
            )));
        };
        self.outbox.push_back(RoomMessage::Evict {
            participant_id: participant.id.clone(),
        });
        self.append_system(
            ChatKind::SystemLeave,
            format!("{} was removed from the room", participant.display_name),
        );
        self.emit_roster();
        if self.queue.retract_votes(&participant.id) {
            self.broadcast_queue();
        }
        Ok(())
    }

    /// The local player reached the end of the video.
    ///
    /// The owner promotes the queue head if it carries a vote, skipping
    /// heads that cannot be played, and otherwise sends everyone to browse.
    pub fn video_ended(&mut self) -> RoomResult<()> {
        if self.state.is_terminal() {
            return Ok(());
        }
        let Ok(authority) = self.authorize("end video") else {
            self.playback
                .on_video_ended(None, None, self.player.as_mut())?;
            self.emit_playback();
            return Ok(());
        };

        let mut queue_changed = false;
        loop {
            let next = if self.head_is_voted() {
                self.queue.dequeue_head(&authority)
            } else {
                None
            };
            queue_changed |= next.is_some();

            match self
                .playback
                .on_video_ended(Some(&authority), next, self.player.as_mut())
            {
                Ok(EndOfVideo::Promoted { item, update }) => {
                    self.outbox.push_back(update);
                    self.announce_now_playing(&item.title);
                    break;
                }
                Ok(EndOfVideo::Browse { update }) => {
                    self.outbox.push_back(update);
                    break;
                }
                Ok(EndOfVideo::AwaitOwner) => break,
                // Only a dequeued item can fail, so the queue shrinks each pass.
                Err(e) => log::warn!("[Engine] Skipping unplayable queue head: {}", e),
            }
        }
        if queue_changed {
            self.broadcast_queue();
        }
        self.emit_playback();
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Timer ticks
    // ─────────────────────────────────────────────────────────────────────────────

    /// Progress poll: detects end of video and throttles owner progress reports.
    pub fn tick_progress(&mut self) -> RoomResult<()> {
        if self.state != EngineState::Active || !self.playback.is_active() {
            return Ok(());
        }
        if self.player.has_ended() && self.playback.state().is_playing {
            return self.video_ended();
        }
        if let Ok(authority) = self.presence.authorize(&self.local.id, "report progress") {
            let position = self.player.position();
            if let Some(message) = self.playback.owner_report_progress(&authority, position) {
                self.outbox.push_back(message);
            }
        }
        Ok(())
    }

    /// Periodic full snapshot from the owner.
    pub fn tick_snapshot(&mut self) {
        if self.state != EngineState::Active {
            return;
        }
        if let Ok(authority) = self.presence.authorize(&self.local.id, "snapshot") {
            if let Some(message) = self.playback.owner_snapshot(&authority, self.player.as_ref()) {
                self.outbox.push_back(message);
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Private helpers
    // ─────────────────────────────────────────────────────────────────────────────

    fn ensure_open(&self) -> RoomResult<()> {
        if self.state.is_terminal() {
            return Err(RoomError::InvalidState("session already left".to_string()));
        }
        Ok(())
    }

    fn authorize(&self, action: &str) -> RoomResult<OwnerAuthority> {
        self.presence.authorize(&self.local.id, action)
    }

    fn start_video(&mut self, authority: &OwnerAuthority, url: &str, title: &str) -> RoomResult<()> {
        let message = self
            .playback
            .owner_set_video(authority, url, self.player.as_mut())?;
        self.outbox.push_back(message);
        self.announce_now_playing(title);
        self.emit_playback();
        Ok(())
    }

    fn announce_now_playing(&mut self, title: &str) {
        let content = format!("Now playing: {}", display_title(title));
        self.append_entry(ChatEntry::system(
            ChatKind::SystemNotice,
            Participant::system(),
            content.clone(),
        ));
        self.outbox.push_back(RoomMessage::Chat {
            sender_id: self.local.id.clone(),
            sender: SYSTEM_SENDER_NAME.to_string(),
            avatar_url: String::new(),
            content,
            attachment: None,
        });
    }

    /// Owner: starts the queue head when nothing is playing.
    fn maybe_promote_head(&mut self) {
        if self.state != EngineState::Active || self.playback.is_active() || !self.head_is_voted()
        {
            return;
        }
        let Ok(authority) = self.presence.authorize(&self.local.id, "promote queue head") else {
            return;
        };
        let Some(item) = self.queue.dequeue_head(&authority) else {
            return;
        };
        log::info!("[Engine] Promoting {} in idle room {}", item.key, self.room_id);
        if let Err(e) = self.start_video(&authority, &item.source_url, &item.title) {
            log::warn!("[Engine] Failed to promote {}: {}", item.key, e);
        }
        self.broadcast_queue();
    }

    /// Unvoted items never start on their own.
    fn head_is_voted(&self) -> bool {
        self.queue.items().first().is_some_and(|item| item.votes > 0)
    }

    /// Owner's answer to a JOIN: roster, playback (if any) and queue.
    fn queue_reconciliation_burst(&mut self) {
        let Ok(authority) = self.presence.authorize(&self.local.id, "reconcile") else {
            return;
        };
        self.outbox.push_back(RoomMessage::RosterSnapshot {
            room_id: self.room_id.clone(),
            owner_id: Some(authority.owner_id().to_string()),
            participants: self.presence.participants().to_vec(),
        });
        if let Some(update) = self.playback.owner_snapshot(&authority, self.player.as_ref()) {
            self.outbox.push_back(update);
        }
        self.outbox
            .push_back(self.queue.queue_update(Some(self.local.id.clone())));
    }

    fn broadcast_queue(&mut self) {
        self.outbox
            .push_back(self.queue.queue_update(Some(self.local.id.clone())));
        self.persist_queue();
        self.emit_queue();
    }

    fn persist_queue(&self) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.store(&queue_cache_key(&self.room_id), self.queue.items()) {
                log::warn!("[Engine] Failed to cache queue of {}: {}", self.room_id, e);
            }
        }
    }

    fn restore_cached_queue(&mut self) {
        let Some(cache) = &self.cache else {
            return;
        };
        match cache.load(&queue_cache_key(&self.room_id)) {
            Ok(Some(items)) => {
                log::info!(
                    "[Engine] Restored {} cached queue items for {}",
                    items.len(),
                    self.room_id
                );
                self.queue.apply_snapshot(items);
            }
            Ok(None) => {}
            Err(e) => log::warn!("[Engine] Ignoring unreadable queue cache: {}", e),
        }
    }

    fn append_system(&mut self, kind: ChatKind, content: impl Into<String>) {
        self.append_entry(ChatEntry::system(kind, Participant::system(), content));
    }

    fn append_entry(&mut self, entry: ChatEntry) {
        self.timeline.append(entry);
        if let Some(entry) = self.timeline.last() {
            self.emitter.emit_room(RoomEvent::ChatAppended {
                room_id: self.room_id.clone(),
                entry: entry.clone(),
                timestamp: now_millis(),
            });
        }
    }

    fn set_state(&mut self, state: EngineState) {
        if self.state == state {
            return;
        }
        log::info!(
            "[Engine] {} in {}: {:?} -> {:?}",
            self.local.id,
            self.room_id,
            self.state,
            state
        );
        self.state = state;
        self.emitter.emit_room(RoomEvent::StateChanged {
            room_id: self.room_id.clone(),
            state,
            timestamp: now_millis(),
        });
    }

    fn emit_roster(&self) {
        self.emitter.emit_room(RoomEvent::RosterChanged {
            room_id: self.room_id.clone(),
            owner_id: self.presence.owner_id().map(str::to_string),
            participants: self.presence.participants().to_vec(),
            timestamp: now_millis(),
        });
    }

    fn emit_playback(&self) {
        self.emitter.emit_room(RoomEvent::PlaybackChanged {
            room_id: self.room_id.clone(),
            playback: self.playback.state().clone(),
            timestamp: now_millis(),
        });
    }

    fn emit_queue(&self) {
        self.emitter.emit_room(RoomEvent::QueueChanged {
            room_id: self.room_id.clone(),
            queue: self.queue.items().to_vec(),
            timestamp: now_millis(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryQueueCache;
    use crate::events::NoopEventEmitter;
    use crate::player::ClockPlayer;
    use crate::state::QueueItem;

    fn engine(id: &str, name: &str) -> RoomSyncEngine {
        RoomSyncEngine::new(
            "r1",
            Participant::new(id, name, ""),
            &SyncConfig::default(),
            Box::new(ClockPlayer::new()),
            Arc::new(NoopEventEmitter),
            None,
        )
        .unwrap()
    }

    /// Alice owns an active room.
    fn owner() -> RoomSyncEngine {
        let mut alice = engine("a", "Alice");
        alice.on_connected();
        alice.on_join_timeout();
        alice.drain_outbox();
        assert!(alice.is_owner());
        alice
    }

    /// Delivers everything `from` may send to each peer in `to`.
    fn pump(from: &mut RoomSyncEngine, to: &mut [&mut RoomSyncEngine]) -> Vec<RoomMessage> {
        let messages = from.drain_outbox();
        for message in &messages {
            let raw = message.encode().unwrap();
            for peer in to.iter_mut() {
                peer.handle_raw(&raw);
            }
        }
        messages
    }

    fn kinds(messages: &[RoomMessage]) -> Vec<&'static str> {
        messages.iter().map(RoomMessage::kind).collect()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Lifecycle Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn rejects_invalid_configuration() {
        let config = SyncConfig {
            follower_drift_tolerance_secs: 0.5,
            ..Default::default()
        };
        let result = RoomSyncEngine::new(
            "r1",
            Participant::new("a", "Alice", ""),
            &config,
            Box::new(ClockPlayer::new()),
            Arc::new(NoopEventEmitter),
            None,
        );
        assert!(matches!(result, Err(RoomError::Configuration(_))));
    }

    #[test]
    fn outbox_is_held_while_connecting() {
        let mut alice = engine("a", "Alice");
        alice.send_chat("early".into(), None).unwrap();
        assert!(alice.drain_outbox().is_empty());
        assert_eq!(alice.pending_outbound(), 1);

        alice.on_connected();
        let sent = alice.drain_outbox();
        assert_eq!(kinds(&sent), vec!["JOIN", "CHAT"]);
    }

    #[test]
    fn join_timeout_without_owner_claims_room() {
        let mut alice = engine("a", "Alice");
        alice.on_connected();
        assert_eq!(alice.state(), EngineState::Joining);

        alice.on_join_timeout();

        assert_eq!(alice.state(), EngineState::Active);
        assert!(alice.is_owner());
        let sent = alice.drain_outbox();
        assert_eq!(kinds(&sent), vec!["JOIN", "ROSTER_SNAPSHOT", "QUEUE_UPDATE"]);
    }

    #[test]
    fn directory_naming_us_owner_activates_immediately() {
        let mut alice = engine("a", "Alice");
        alice.on_connected();
        alice.on_room_info(Some(RoomInfo {
            id: "r1".into(),
            owner_id: Some("a".into()),
        }));
        assert_eq!(alice.state(), EngineState::Active);
        assert!(alice.is_owner());
    }

    #[test]
    fn timeout_with_known_owner_stays_follower() {
        let mut bob = engine("b", "Bob");
        bob.on_connected();
        bob.on_room_info(Some(RoomInfo {
            id: "r1".into(),
            owner_id: Some("a".into()),
        }));
        assert_eq!(bob.state(), EngineState::Joining);

        bob.on_join_timeout();
        assert_eq!(bob.state(), EngineState::Active);
        assert!(!bob.is_owner());
        assert!(!bob.snapshot().playback.is_active());
    }

    #[test]
    fn reconciliation_burst_activates_joiner() {
        let mut alice = owner();
        alice.set_video("https://v/intro.mp4").unwrap();
        alice.drain_outbox();

        let mut bob = engine("b", "Bob");
        bob.on_connected();
        pump(&mut bob, &mut [&mut alice]);
        let burst = pump(&mut alice, &mut [&mut bob]);

        assert_eq!(
            kinds(&burst),
            vec!["ROSTER_SNAPSHOT", "VIDEO_UPDATE", "QUEUE_UPDATE"]
        );
        assert_eq!(bob.state(), EngineState::Active);
        let snap = bob.snapshot();
        assert_eq!(snap.owner_id.as_deref(), Some("a"));
        assert_eq!(snap.participants.len(), 2);
        assert_eq!(snap.playback.video_url, "https://v/intro.mp4");
    }

    #[test]
    fn disconnect_retains_state_and_rejoins() {
        let mut alice = owner();
        alice.set_video("https://v/intro.mp4").unwrap();
        alice.drain_outbox();

        alice.on_disconnected("network lost");
        assert_eq!(alice.state(), EngineState::Disconnected);
        alice.send_chat("while offline".into(), None).unwrap();
        assert!(alice.drain_outbox().is_empty());

        alice.on_connected();
        assert_eq!(alice.state(), EngineState::Active);
        let sent = alice.drain_outbox();
        assert_eq!(sent[0].kind(), "JOIN");
        assert!(kinds(&sent).contains(&"CHAT"));
        assert!(kinds(&sent).contains(&"VIDEO_UPDATE"));
        assert_eq!(alice.snapshot().playback.video_url, "https://v/intro.mp4");
    }

    #[test]
    fn leave_emits_owner_left_for_owner() {
        let mut alice = owner();
        alice.leave();
        assert_eq!(alice.state(), EngineState::Left);
        assert_eq!(kinds(&alice.drain_outbox()), vec!["OWNER_LEFT"]);
        assert!(alice.send_chat("late".into(), None).is_err());
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Dispatch Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn malformed_messages_are_dropped() {
        let mut alice = owner();
        let before = alice.snapshot();
        alice.handle_raw("{\"type\":\"VIDEO_PLAY\"}");
        alice.handle_raw("garbage");
        assert_eq!(alice.snapshot(), before);
    }

    #[test]
    fn join_and_leave_produce_system_entries() {
        let mut alice = owner();
        let bob = Participant::new("b", "Bob", "");
        alice.handle_message(RoomMessage::join(&bob));
        alice.handle_message(RoomMessage::join(&bob));
        alice.handle_message(RoomMessage::leave(&bob));

        let timeline = alice.snapshot().timeline;
        let system: Vec<ChatKind> = timeline.iter().map(|e| e.kind).collect();
        assert_eq!(system, vec![ChatKind::SystemJoin, ChatKind::SystemLeave]);
        assert_eq!(timeline[0].content, "Bob joined the room");
    }

    #[test]
    fn own_echoes_are_ignored() {
        let mut alice = owner();
        alice.send_chat("hi".into(), None).unwrap();
        let echoes = alice.drain_outbox();
        for message in echoes {
            alice.handle_message(message);
        }
        alice.handle_message(RoomMessage::join(&Participant::new("a", "Alice", "")));
        assert_eq!(alice.snapshot().timeline.len(), 1);
        assert_eq!(alice.snapshot().participants.len(), 1);
    }

    #[test]
    fn owner_ignores_foreign_playback() {
        let mut alice = owner();
        alice.handle_message(RoomMessage::VideoUpdate {
            video_url: "https://v/rogue".into(),
            position_seconds: 5.0,
            is_playing: true,
        });
        assert!(!alice.snapshot().playback.is_active());
    }

    #[test]
    fn follower_cannot_mutate_playback() {
        let mut bob = engine("b", "Bob");
        bob.on_connected();
        bob.handle_message(RoomMessage::RosterSnapshot {
            room_id: "r1".into(),
            owner_id: Some("a".into()),
            participants: vec![Participant::new("a", "Alice", "")],
        });

        for result in [
            bob.set_video("https://v/1"),
            bob.pause(),
            bob.resume(),
            bob.clear_video(),
            bob.remove_queue_item(0),
            bob.evict("a"),
        ] {
            assert!(matches!(result, Err(RoomError::PermissionDenied(_))));
        }
        assert_eq!(kinds(&bob.drain_outbox()), vec!["JOIN"]);
    }

    #[test]
    fn owner_left_sends_follower_to_left() {
        let mut bob = engine("b", "Bob");
        bob.on_connected();
        bob.handle_message(RoomMessage::RosterSnapshot {
            room_id: "r1".into(),
            owner_id: Some("a".into()),
            participants: vec![Participant::new("a", "Alice", "")],
        });

        bob.handle_message(RoomMessage::OwnerLeft {
            sender_id: Some("a".into()),
        });

        let snap = bob.snapshot();
        assert_eq!(snap.state, EngineState::Left);
        assert_eq!(snap.owner_id, None);
        assert_eq!(snap.timeline.last().unwrap().kind, ChatKind::SystemNotice);
        assert_eq!(kinds(&bob.drain_outbox()), vec!["JOIN", "LEAVE"]);
    }

    #[test]
    fn evicted_follower_leaves() {
        let mut alice = owner();
        let mut bob = engine("b", "Bob");
        bob.on_connected();
        pump(&mut bob, &mut [&mut alice]);
        pump(&mut alice, &mut [&mut bob]);

        alice.evict("b").unwrap();
        pump(&mut alice, &mut [&mut bob]);

        assert_eq!(bob.state(), EngineState::Left);
        assert_eq!(alice.snapshot().participants.len(), 1);
    }

    #[test]
    fn system_sender_from_owner_is_a_notice() {
        let mut alice = owner();
        let mut bob = engine("b", "Bob");
        bob.on_connected();
        pump(&mut bob, &mut [&mut alice]);
        pump(&mut alice, &mut [&mut bob]);

        alice.set_video("https://v/play/Intro.mp4").unwrap();
        pump(&mut alice, &mut [&mut bob]);

        let last = bob.snapshot().timeline.last().cloned().unwrap();
        assert_eq!(last.kind, ChatKind::SystemNotice);
        assert_eq!(last.content, "Now playing: Intro");
    }

    #[test]
    fn chat_attachment_arrives_as_bytes() {
        let mut alice = owner();
        let mut bob = engine("b", "Bob");
        bob.on_connected();
        pump(&mut bob, &mut [&mut alice]);
        pump(&mut alice, &mut [&mut bob]);

        bob.send_chat("look".into(), Some(vec![1, 2, 3])).unwrap();
        pump(&mut bob, &mut [&mut alice]);

        let last = alice.snapshot().timeline.last().cloned().unwrap();
        assert_eq!(last.kind, ChatKind::Chat);
        assert_eq!(last.attachment, Some(vec![1, 2, 3]));
        assert_eq!(last.sender.id, "b");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Queue Tests
    // ─────────────────────────────────────────────────────────────────────────

    #[test]
    fn owner_proposal_in_idle_room_plays_immediately() {
        let mut alice = owner();
        let outcome = alice
            .propose(VideoCandidate::new("Intro.mp4", "https://v/intro", ""))
            .unwrap();
        assert!(matches!(outcome, ProposeOutcome::PlayNow(_)));
        let snap = alice.snapshot();
        assert_eq!(snap.playback.video_url, "https://v/intro");
        assert!(snap.queue.is_empty());
    }

    #[test]
    fn follower_proposal_in_idle_room_is_promoted_by_owner() {
        let mut alice = owner();
        let mut bob = engine("b", "Bob");
        bob.on_connected();
        pump(&mut bob, &mut [&mut alice]);
        pump(&mut alice, &mut [&mut bob]);

        let outcome = bob
            .propose(VideoCandidate::new("Clip", "https://v/clip", ""))
            .unwrap();
        assert!(matches!(outcome, ProposeOutcome::Queued { .. }));
        assert_eq!(bob.snapshot().queue.len(), 1);
        pump(&mut bob, &mut [&mut alice]);
        pump(&mut alice, &mut [&mut bob]);

        assert_eq!(alice.snapshot().playback.video_url, "https://v/clip");
        assert!(alice.snapshot().queue.is_empty());
        assert_eq!(bob.snapshot().playback.video_url, "https://v/clip");
        assert!(bob.snapshot().queue.is_empty());
    }

    #[test]
    fn video_end_with_empty_queue_clears_followers() {
        let mut alice = owner();
        let mut bob = engine("b", "Bob");
        bob.on_connected();
        pump(&mut bob, &mut [&mut alice]);
        alice.set_video("https://v/1").unwrap();
        pump(&mut alice, &mut [&mut bob]);
        assert!(bob.snapshot().playback.is_active());

        alice.video_ended().unwrap();
        pump(&mut alice, &mut [&mut bob]);

        assert!(!alice.snapshot().playback.is_active());
        assert!(!bob.snapshot().playback.is_active());
    }

    fn voted_item(title: &str, url: &str, voter: &str) -> QueueItem {
        QueueItem::from_candidate(
            &VideoCandidate::new(title, url, ""),
            Participant::new(voter, voter.to_uppercase(), ""),
        )
    }

    #[test]
    fn video_end_promotes_past_item_without_source() {
        let mut alice = owner();
        alice.set_video("https://v/1").unwrap();
        alice.drain_outbox();

        let mut bad = voted_item("Bad", "", "b");
        bad.votes = 5;
        alice.handle_message(RoomMessage::QueueUpdate {
            room_id: "r1".into(),
            queue: vec![bad, voted_item("Good", "https://v/good", "c")],
            sender_id: Some("b".into()),
        });
        assert_eq!(alice.snapshot().queue.len(), 1);

        alice.video_ended().unwrap();

        let snap = alice.snapshot();
        assert_eq!(snap.playback.video_url, "https://v/good");
        assert!(snap.playback.is_playing);
        assert!(snap.queue.is_empty());
        let sent = kinds(&alice.drain_outbox());
        assert!(sent.contains(&"VIDEO_UPDATE"));
        assert!(sent.contains(&"QUEUE_UPDATE"));
    }

    #[test]
    fn video_end_leaves_unvoted_items_queued() {
        let mut alice = owner();
        alice.set_video("https://v/1").unwrap();
        let mut orphan = voted_item("Orphan", "https://v/orphan", "b");
        orphan.voters.clear();
        alice.handle_message(RoomMessage::QueueUpdate {
            room_id: "r1".into(),
            queue: vec![orphan],
            sender_id: Some("b".into()),
        });
        alice.drain_outbox();

        alice.video_ended().unwrap();

        let snap = alice.snapshot();
        assert!(!snap.playback.is_active());
        assert_eq!(snap.queue.len(), 1);
        assert_eq!(snap.queue[0].votes, 0);
        assert_eq!(kinds(&alice.drain_outbox()), vec!["VIDEO_UPDATE"]);
    }

    #[test]
    fn requeued_messages_go_out_first_and_join_once() {
        let mut bob = engine("b", "Bob");
        bob.on_connected();
        bob.send_chat("first".into(), None).unwrap();
        let sent = bob.drain_outbox();
        assert_eq!(kinds(&sent), vec!["JOIN", "CHAT"]);

        bob.on_disconnected("publish failed");
        bob.send_chat("second".into(), None).unwrap();
        bob.requeue_front(sent);
        assert_eq!(bob.pending_outbound(), 3);

        bob.on_connected();
        let sent = bob.drain_outbox();
        assert_eq!(kinds(&sent), vec!["JOIN", "CHAT", "CHAT"]);
        let contents: Vec<&str> = sent
            .iter()
            .filter_map(|m| match m {
                RoomMessage::Chat { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(contents, vec!["first", "second"]);
    }

    #[test]
    fn queue_is_cached_and_restored() {
        let cache: Arc<dyn QueueCache> = Arc::new(MemoryQueueCache::new());
        let make = |cache: Arc<dyn QueueCache>| {
            RoomSyncEngine::new(
                "r1",
                Participant::new("b", "Bob", ""),
                &SyncConfig::default(),
                Box::new(ClockPlayer::new()),
                Arc::new(NoopEventEmitter),
                Some(cache),
            )
            .unwrap()
        };

        let mut bob = make(cache.clone());
        bob.on_connected();
        bob.handle_message(RoomMessage::VideoUpdate {
            video_url: "https://v/1".into(),
            position_seconds: 0.0,
            is_playing: true,
        });
        bob.propose(VideoCandidate::new("Clip", "https://v/clip", ""))
            .unwrap();

        let restored = make(cache);
        assert_eq!(restored.snapshot().queue.len(), 1);
        assert_eq!(restored.snapshot().queue[0].title, "Clip");
    }

    #[test]
    fn queue_update_for_other_room_is_ignored() {
        let mut alice = owner();
        let mut other = QueueCoordinator::new("r2");
        other
            .propose(
                &Participant::new("z", "Zed", ""),
                VideoCandidate::new("X", "https://v/x", ""),
                true,
            )
            .unwrap();
        alice.handle_message(other.queue_update(None));
        assert!(alice.snapshot().queue.is_empty());
    }
}
