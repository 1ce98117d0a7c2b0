//! Command handle for a running room session.

use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{RoomError, RoomResult};
use crate::services::queue_coordinator::ProposeOutcome;
use crate::state::{EngineState, RoomSnapshot, VideoCandidate};

type Reply<T> = oneshot::Sender<RoomResult<T>>;

/// Requests from the presentation layer, applied inside the session task.
pub(crate) enum RoomCommand {
    SendChat {
        content: String,
        attachment: Option<Vec<u8>>,
        reply: Reply<()>,
    },
    SetVideo {
        url: String,
        reply: Reply<()>,
    },
    ClearVideo {
        reply: Reply<()>,
    },
    Pause {
        reply: Reply<()>,
    },
    Resume {
        reply: Reply<()>,
    },
    Propose {
        candidate: VideoCandidate,
        reply: Reply<ProposeOutcome>,
    },
    Vote {
        key: String,
        reply: Reply<bool>,
    },
    RemoveQueueItem {
        index: usize,
        reply: Reply<()>,
    },
    Evict {
        participant_id: String,
        reply: Reply<()>,
    },
    VideoEnded {
        reply: Reply<()>,
    },
    Leave {
        reply: oneshot::Sender<()>,
    },
}

/// Cloneable handle to a room session.
///
/// Every method is answered by the session task; once the session has ended
/// they fail with [`RoomError::InvalidState`].
#[derive(Clone)]
pub struct RoomHandle {
    commands: mpsc::Sender<RoomCommand>,
    snapshots: watch::Receiver<RoomSnapshot>,
}

impl RoomHandle {
    pub(crate) fn new(
        commands: mpsc::Sender<RoomCommand>,
        snapshots: watch::Receiver<RoomSnapshot>,
    ) -> Self {
        Self {
            commands,
            snapshots,
        }
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> RoomSnapshot {
        self.snapshots.borrow().clone()
    }

    /// Receiver that is notified on every snapshot change.
    pub fn watch(&self) -> watch::Receiver<RoomSnapshot> {
        self.snapshots.clone()
    }

    /// Waits until a snapshot satisfies `predicate` and returns it.
    pub async fn wait_for<F>(&self, mut predicate: F) -> RoomResult<RoomSnapshot>
    where
        F: FnMut(&RoomSnapshot) -> bool,
    {
        let mut rx = self.snapshots.clone();
        let snapshot = rx
            .wait_for(|snapshot| predicate(snapshot))
            .await
            .map_err(|_| session_ended())?;
        Ok(snapshot.clone())
    }

    /// Waits until the engine reaches `state`.
    pub async fn wait_for_state(&self, state: EngineState) -> RoomResult<RoomSnapshot> {
        self.wait_for(|snapshot| snapshot.state == state).await
    }

    pub async fn send_chat(&self, content: impl Into<String>) -> RoomResult<()> {
        let content = content.into();
        self.request(|reply| RoomCommand::SendChat {
            content,
            attachment: None,
            reply,
        })
        .await
    }

    /// Sends a chat message with an (already compressed) image attachment.
    pub async fn send_image(&self, content: impl Into<String>, image: Vec<u8>) -> RoomResult<()> {
        let content = content.into();
        self.request(|reply| RoomCommand::SendChat {
            content,
            attachment: Some(image),
            reply,
        })
        .await
    }

    pub async fn set_video(&self, url: impl Into<String>) -> RoomResult<()> {
        let url = url.into();
        self.request(|reply| RoomCommand::SetVideo { url, reply })
            .await
    }

    pub async fn clear_video(&self) -> RoomResult<()> {
        self.request(|reply| RoomCommand::ClearVideo { reply }).await
    }

    pub async fn pause(&self) -> RoomResult<()> {
        self.request(|reply| RoomCommand::Pause { reply }).await
    }

    pub async fn resume(&self) -> RoomResult<()> {
        self.request(|reply| RoomCommand::Resume { reply }).await
    }

    pub async fn propose(&self, candidate: VideoCandidate) -> RoomResult<ProposeOutcome> {
        self.request(|reply| RoomCommand::Propose { candidate, reply })
            .await
    }

    pub async fn vote(&self, key: impl Into<String>) -> RoomResult<bool> {
        let key = key.into();
        self.request(|reply| RoomCommand::Vote { key, reply }).await
    }

    pub async fn remove_queue_item(&self, index: usize) -> RoomResult<()> {
        self.request(|reply| RoomCommand::RemoveQueueItem { index, reply })
            .await
    }

    pub async fn evict(&self, participant_id: impl Into<String>) -> RoomResult<()> {
        let participant_id = participant_id.into();
        self.request(|reply| RoomCommand::Evict {
            participant_id,
            reply,
        })
        .await
    }

    /// Reports that the local player reached the end of the video.
    pub async fn video_ended(&self) -> RoomResult<()> {
        self.request(|reply| RoomCommand::VideoEnded { reply })
            .await
    }

    /// Leaves the room and waits until the session has shut down.
    ///
    /// Leaving an already finished session is a no-op.
    pub async fn leave(&self) {
        let (reply, done) = oneshot::channel();
        if self.commands.send(RoomCommand::Leave { reply }).await.is_ok() {
            let _ = done.await;
        }
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> RoomCommand,
    ) -> RoomResult<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| session_ended())?;
        response.await.map_err(|_| session_ended())?
    }
}

fn session_ended() -> RoomError {
    RoomError::InvalidState("room session has ended".to_string())
}
