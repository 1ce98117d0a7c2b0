//! Async driver of a room.
//!
//! A [`RoomSession`] is one tokio task that owns a [`RoomSyncEngine`], the
//! [`ChannelPort`], the room timers and the reconnect loop. The engine never
//! awaits; the session feeds it channel events, timer ticks and commands from
//! [`RoomHandle`]s, then flushes the engine's outbox to the channel.

mod backoff;
mod handle;
mod timer;

pub use backoff::ReconnectBackoff;
pub use handle::RoomHandle;
pub use timer::RoomTimer;

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};

use crate::cache::QueueCache;
use crate::channel::{ChannelEvent, ChannelPort, ChannelResult};
use crate::collaborators::{RoomDirectory, RoomInfo};
use crate::error::{RoomError, RoomResult};
use crate::events::{ConnectionEvent, EventEmitter, NoopEventEmitter, NoticeEvent};
use crate::player::{ClockPlayer, MediaPlayer};
use crate::protocol_constants::room_topic;
use crate::services::room_sync_engine::RoomSyncEngine;
use crate::state::{EngineState, Participant, RoomSnapshot, SyncConfig};
use crate::utils::now_millis;
use handle::RoomCommand;

/// Why the connected phase ended.
enum Exit {
    Left,
    Disconnected(String),
}

/// Builder for a [`RoomSession`].
pub struct RoomSessionBuilder {
    room_id: String,
    local: Participant,
    config: SyncConfig,
    channel: Option<Arc<dyn ChannelPort>>,
    player: Option<Box<dyn MediaPlayer>>,
    emitter: Option<Arc<dyn EventEmitter>>,
    directory: Option<Arc<dyn RoomDirectory>>,
    cache: Option<Arc<dyn QueueCache>>,
}

impl RoomSessionBuilder {
    /// Sets timing parameters (defaults to [`SyncConfig::default`]).
    pub fn config(mut self, config: SyncConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the pub/sub transport. Required.
    pub fn channel(mut self, channel: Arc<dyn ChannelPort>) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Sets the local player (defaults to a headless [`ClockPlayer`]).
    pub fn player(mut self, player: Box<dyn MediaPlayer>) -> Self {
        self.player = Some(player);
        self
    }

    /// Sets the event sink (defaults to [`NoopEventEmitter`]).
    pub fn emitter(mut self, emitter: Arc<dyn EventEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    /// Sets the room directory consulted while joining.
    pub fn directory(mut self, directory: Arc<dyn RoomDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Sets the queue cache.
    pub fn cache(mut self, cache: Arc<dyn QueueCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Validates the configuration and spawns the session task.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::Configuration`] when no channel was set or the
    /// configuration is invalid.
    pub fn spawn(self) -> RoomResult<RoomHandle> {
        let channel = self
            .channel
            .ok_or_else(|| RoomError::Configuration("a channel is required".to_string()))?;
        let emitter = self.emitter.unwrap_or_else(|| Arc::new(NoopEventEmitter));
        let player = self
            .player
            .unwrap_or_else(|| Box::new(ClockPlayer::new()));

        let engine = RoomSyncEngine::new(
            self.room_id,
            self.local,
            &self.config,
            player,
            Arc::clone(&emitter),
            self.cache,
        )?;

        let (command_tx, commands) = mpsc::channel(self.config.command_channel_capacity);
        let (snapshot_tx, snapshots) = watch::channel(engine.snapshot());
        let (info_tx, room_info) = mpsc::channel(1);

        let session = RoomSession {
            topic: room_topic(engine.room_id()),
            engine,
            channel,
            directory: self.directory,
            emitter,
            backoff: ReconnectBackoff::from_config(&self.config),
            snapshot_timer: RoomTimer::interval(self.config.snapshot_interval()),
            progress_timer: RoomTimer::interval(self.config.progress_poll_interval()),
            join_timer: RoomTimer::deadline(self.config.join_timeout()),
            commands,
            snapshot_tx,
            info_tx,
            room_info,
            leave_replies: Vec::new(),
        };
        tokio::spawn(session.run());

        Ok(RoomHandle::new(command_tx, snapshots))
    }
}

/// The task that drives one room.
pub struct RoomSession {
    engine: RoomSyncEngine,
    topic: String,
    channel: Arc<dyn ChannelPort>,
    directory: Option<Arc<dyn RoomDirectory>>,
    emitter: Arc<dyn EventEmitter>,
    backoff: ReconnectBackoff,

    snapshot_timer: RoomTimer,
    progress_timer: RoomTimer,
    join_timer: RoomTimer,

    commands: mpsc::Receiver<RoomCommand>,
    snapshot_tx: watch::Sender<RoomSnapshot>,
    info_tx: mpsc::Sender<Option<RoomInfo>>,
    room_info: mpsc::Receiver<Option<RoomInfo>>,
    leave_replies: Vec<oneshot::Sender<()>>,
}

impl RoomSession {
    /// Starts building a session for `local` in `room_id`.
    pub fn builder(room_id: impl Into<String>, local: Participant) -> RoomSessionBuilder {
        RoomSessionBuilder {
            room_id: room_id.into(),
            local,
            config: SyncConfig::default(),
            channel: None,
            player: None,
            emitter: None,
            directory: None,
            cache: None,
        }
    }

    async fn run(mut self) {
        let room_id = self.engine.room_id().to_string();
        log::info!(
            "[Session] Starting session for {} in {}",
            self.engine.local_participant().id,
            room_id
        );

        loop {
            match self.connect().await {
                Ok(events) => {
                    self.backoff.reset();
                    match self.run_connected(events).await {
                        Exit::Left => break,
                        Exit::Disconnected(reason) => {
                            self.channel.disconnect().await;
                            self.engine.on_disconnected(&reason);
                            self.sync_timers();
                            self.publish_snapshot();
                            self.emitter.emit_connection(ConnectionEvent::Disconnected {
                                room_id: room_id.clone(),
                                reason,
                                timestamp: now_millis(),
                            });
                        }
                    }
                }
                Err(e) => {
                    log::warn!("[Session] Connect to {} failed: {}", room_id, e);
                }
            }

            if self.engine.state().is_terminal() {
                break;
            }

            let Some(delay) = self.backoff.next_delay() else {
                log::error!(
                    "[Session] Giving up on {} after {} attempts",
                    room_id,
                    self.backoff.attempt()
                );
                self.emitter.emit_connection(ConnectionEvent::ReconnectFailed {
                    room_id: room_id.clone(),
                    attempts: self.backoff.attempt(),
                    timestamp: now_millis(),
                });
                self.engine.leave();
                break;
            };

            self.emitter.emit_connection(ConnectionEvent::Reconnecting {
                room_id: room_id.clone(),
                attempt: self.backoff.attempt(),
                delay_ms: delay.as_millis() as u64,
                timestamp: now_millis(),
            });
            if !self.wait_offline(delay).await {
                break;
            }
        }

        self.channel.disconnect().await;
        self.sync_timers();
        self.publish_snapshot();
        for reply in self.leave_replies.drain(..) {
            let _ = reply.send(());
        }
        log::info!("[Session] Session for {} ended", room_id);
    }

    /// Connects, subscribes and announces the local participant.
    async fn connect(&mut self) -> ChannelResult<mpsc::Receiver<ChannelEvent>> {
        self.channel.connect().await?;
        let events = self.channel.subscribe(&self.topic).await?;

        self.engine.on_connected();
        self.emitter.emit_connection(ConnectionEvent::Connected {
            room_id: self.engine.room_id().to_string(),
            timestamp: now_millis(),
        });
        if self.engine.state() == EngineState::Joining {
            self.request_room_info();
        }
        Ok(events)
    }

    /// Fetches room metadata off the loop; the answer comes back through `room_info`.
    fn request_room_info(&self) {
        let Some(directory) = self.directory.clone() else {
            return;
        };
        let tx = self.info_tx.clone();
        let room_id = self.engine.room_id().to_string();
        tokio::spawn(async move {
            match directory.get_room_info(&room_id).await {
                Ok(info) => {
                    let _ = tx.send(info).await;
                }
                Err(e) => log::warn!("[Session] Room info for {} unavailable: {}", room_id, e),
            }
        });
    }

    async fn run_connected(&mut self, mut events: mpsc::Receiver<ChannelEvent>) -> Exit {
        self.sync_timers();
        if let Err(e) = self.flush().await {
            return Exit::Disconnected(e.to_string());
        }
        self.publish_snapshot();

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.apply(command),
                    None => {
                        log::info!("[Session] All handles dropped, leaving");
                        self.engine.leave();
                    }
                },
                event = events.recv() => match event {
                    Some(ChannelEvent::Message(raw)) => self.engine.handle_raw(&raw),
                    Some(ChannelEvent::Error(e)) => {
                        log::warn!("[Session] Channel error: {}", e);
                    }
                    Some(ChannelEvent::Closed) | None => {
                        return Exit::Disconnected("channel closed".to_string());
                    }
                },
                Some(info) = self.room_info.recv() => self.engine.on_room_info(info),
                _ = self.join_timer.fired() => self.engine.on_join_timeout(),
                _ = self.snapshot_timer.fired() => self.engine.tick_snapshot(),
                _ = self.progress_timer.fired() => {
                    if let Err(e) = self.engine.tick_progress() {
                        log::warn!("[Session] Progress tick failed: {}", e);
                    }
                }
            }

            self.sync_timers();
            let flushed = self.flush().await;
            self.publish_snapshot();

            if self.engine.state().is_terminal() {
                return Exit::Left;
            }
            if let Err(e) = flushed {
                return Exit::Disconnected(e.to_string());
            }
        }
    }

    /// Serves commands while waiting out a reconnect delay.
    ///
    /// Returns `false` if the session should stop instead of reconnecting.
    async fn wait_offline(&mut self, delay: std::time::Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return true,
                command = self.commands.recv() => match command {
                    Some(command) => self.apply(command),
                    None => self.engine.leave(),
                },
            }
            self.publish_snapshot();
            if self.engine.state().is_terminal() {
                return false;
            }
        }
    }

    fn apply(&mut self, command: RoomCommand) {
        let engine = &mut self.engine;
        match command {
            RoomCommand::SendChat {
                content,
                attachment,
                reply,
            } => {
                let result = engine.send_chat(content, attachment);
                self.respond(reply, result);
            }
            RoomCommand::SetVideo { url, reply } => {
                let result = engine.set_video(&url);
                self.respond(reply, result);
            }
            RoomCommand::ClearVideo { reply } => {
                let result = engine.clear_video();
                self.respond(reply, result);
            }
            RoomCommand::Pause { reply } => {
                let result = engine.pause();
                self.respond(reply, result);
            }
            RoomCommand::Resume { reply } => {
                let result = engine.resume();
                self.respond(reply, result);
            }
            RoomCommand::Propose { candidate, reply } => {
                let result = engine.propose(candidate);
                self.respond(reply, result);
            }
            RoomCommand::Vote { key, reply } => {
                let result = engine.vote(&key);
                self.respond(reply, result);
            }
            RoomCommand::RemoveQueueItem { index, reply } => {
                let result = engine.remove_queue_item(index);
                self.respond(reply, result);
            }
            RoomCommand::Evict {
                participant_id,
                reply,
            } => {
                let result = engine.evict(&participant_id);
                self.respond(reply, result);
            }
            RoomCommand::VideoEnded { reply } => {
                let result = engine.video_ended();
                self.respond(reply, result);
            }
            RoomCommand::Leave { reply } => {
                engine.leave();
                self.leave_replies.push(reply);
            }
        }
    }

    /// Replies to the caller and turns failures into notices.
    fn respond<T>(&self, reply: oneshot::Sender<RoomResult<T>>, result: RoomResult<T>) {
        if let Err(e) = &result {
            let room_id = self.engine.room_id().to_string();
            let notice = match e {
                RoomError::PermissionDenied(message) => NoticeEvent::PermissionDenied {
                    room_id,
                    message: message.clone(),
                    timestamp: now_millis(),
                },
                other => NoticeEvent::RequestFailed {
                    room_id,
                    code: other.code().to_string(),
                    message: other.to_string(),
                    timestamp: now_millis(),
                },
            };
            self.emitter.emit_notice(notice);
        }
        let _ = reply.send(result);
    }

    /// Arms the timers the current state needs and tears down the rest.
    fn sync_timers(&mut self) {
        match self.engine.state() {
            EngineState::Joining => {
                self.join_timer.arm();
                self.snapshot_timer.disarm();
                self.progress_timer.disarm();
            }
            EngineState::Active => {
                self.join_timer.disarm();
                self.snapshot_timer.arm();
                self.progress_timer.arm();
            }
            EngineState::Connecting | EngineState::Disconnected | EngineState::Left => {
                self.join_timer.disarm();
                self.snapshot_timer.disarm();
                self.progress_timer.disarm();
            }
        }
    }

    /// Publishes everything the engine released.
    ///
    /// On a publish error the refused message and everything after it go
    /// back to the engine for the next connection.
    async fn flush(&mut self) -> ChannelResult<()> {
        let mut pending = self.engine.drain_outbox().into_iter();
        while let Some(message) = pending.next() {
            let payload = match message.encode() {
                Ok(payload) => payload,
                Err(e) => {
                    log::error!("[Session] Dropping unencodable {}: {}", message.kind(), e);
                    continue;
                }
            };
            if let Err(e) = self.channel.publish(&self.topic, payload).await {
                let mut unsent = vec![message];
                unsent.extend(pending);
                log::warn!("[Session] Publish failed, keeping {} message(s): {}", unsent.len(), e);
                self.engine.requeue_front(unsent);
                return Err(e);
            }
        }
        Ok(())
    }

    fn publish_snapshot(&self) {
        let snapshot = self.engine.snapshot();
        self.snapshot_tx.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}
