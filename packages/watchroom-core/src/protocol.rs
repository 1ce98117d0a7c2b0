//! Wire format of the per-room broadcast topic.
//!
//! Every message is a JSON object discriminated by `type`. Decoding validates
//! required fields and numeric ranges; anything that fails is reported as
//! [`RoomError::MalformedMessage`] and dropped by the engine.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{RoomError, RoomResult};
use crate::state::{Participant, QueueItem};

/// A message exchanged on `room.<roomId>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoomMessage {
    /// A peer connected (or reconnected) and announces itself.
    #[serde(rename_all = "camelCase")]
    Join {
        sender_id: String,
        sender: String,
        #[serde(default)]
        avatar_url: String,
    },
    /// A peer left the room.
    #[serde(rename_all = "camelCase")]
    Leave {
        sender_id: String,
        sender: String,
        #[serde(default)]
        avatar_url: String,
    },
    /// The owner left on purpose; the room is dissolved.
    #[serde(rename_all = "camelCase")]
    OwnerLeft {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_id: Option<String>,
    },
    /// Chat message, optionally with a base64 image attachment.
    #[serde(rename_all = "camelCase")]
    Chat {
        sender_id: String,
        sender: String,
        #[serde(default)]
        avatar_url: String,
        #[serde(default)]
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attachment: Option<String>,
    },
    /// Full playback reconciliation from the owner.
    #[serde(rename_all = "camelCase")]
    VideoUpdate {
        #[serde(default)]
        video_url: String,
        #[serde(default)]
        position_seconds: f64,
        #[serde(default)]
        is_playing: bool,
    },
    /// Owner resumed playback.
    #[serde(rename_all = "camelCase")]
    VideoPlay {
        video_url: String,
        position_seconds: f64,
    },
    /// Owner paused playback.
    #[serde(rename_all = "camelCase")]
    VideoPause {
        video_url: String,
        position_seconds: f64,
    },
    /// Throttled position report from the owner.
    #[serde(rename_all = "camelCase")]
    VideoProgress {
        video_url: String,
        position_seconds: f64,
    },
    /// Entire ordered queue after a mutation.
    #[serde(rename_all = "camelCase")]
    QueueUpdate {
        room_id: String,
        queue: Vec<QueueItem>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender_id: Option<String>,
    },
    /// Roster and owner identity, sent by the owner to a joining peer.
    #[serde(rename_all = "camelCase")]
    RosterSnapshot {
        room_id: String,
        #[serde(default)]
        owner_id: Option<String>,
        participants: Vec<Participant>,
    },
    /// Owner removes a participant from the room.
    #[serde(rename_all = "camelCase")]
    Evict { participant_id: String },
}

impl RoomMessage {
    /// Announces `participant` to the room.
    pub fn join(participant: &Participant) -> Self {
        Self::Join {
            sender_id: participant.id.clone(),
            sender: participant.display_name.clone(),
            avatar_url: participant.avatar_url.clone(),
        }
    }

    /// Announces that `participant` left.
    pub fn leave(participant: &Participant) -> Self {
        Self::Leave {
            sender_id: participant.id.clone(),
            sender: participant.display_name.clone(),
            avatar_url: participant.avatar_url.clone(),
        }
    }

    /// Chat from `participant`; the attachment is base64-encoded for the wire.
    pub fn chat(participant: &Participant, content: String, attachment: Option<&[u8]>) -> Self {
        Self::Chat {
            sender_id: participant.id.clone(),
            sender: participant.display_name.clone(),
            avatar_url: participant.avatar_url.clone(),
            content,
            attachment: attachment.map(|bytes| BASE64.encode(bytes)),
        }
    }

    /// Parses and validates a raw JSON payload.
    pub fn decode(raw: &str) -> RoomResult<Self> {
        let message: Self = serde_json::from_str(raw)
            .map_err(|e| RoomError::MalformedMessage(e.to_string()))?;
        message.validate()?;
        Ok(message)
    }

    /// Serializes the message to its JSON wire form.
    pub fn encode(&self) -> RoomResult<String> {
        serde_json::to_string(self).map_err(|e| RoomError::InvalidState(e.to_string()))
    }

    /// Wire name of the message kind, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Join { .. } => "JOIN",
            Self::Leave { .. } => "LEAVE",
            Self::OwnerLeft { .. } => "OWNER_LEFT",
            Self::Chat { .. } => "CHAT",
            Self::VideoUpdate { .. } => "VIDEO_UPDATE",
            Self::VideoPlay { .. } => "VIDEO_PLAY",
            Self::VideoPause { .. } => "VIDEO_PAUSE",
            Self::VideoProgress { .. } => "VIDEO_PROGRESS",
            Self::QueueUpdate { .. } => "QUEUE_UPDATE",
            Self::RosterSnapshot { .. } => "ROSTER_SNAPSHOT",
            Self::Evict { .. } => "EVICT",
        }
    }

    /// The participant carried by JOIN, LEAVE and CHAT messages.
    pub fn participant(&self) -> Option<Participant> {
        match self {
            Self::Join {
                sender_id,
                sender,
                avatar_url,
            }
            | Self::Leave {
                sender_id,
                sender,
                avatar_url,
            }
            | Self::Chat {
                sender_id,
                sender,
                avatar_url,
                ..
            } => Some(Participant::new(sender_id, sender, avatar_url)),
            _ => None,
        }
    }

    fn validate(&self) -> RoomResult<()> {
        match self {
            Self::Join { sender_id, .. } | Self::Leave { sender_id, .. } => {
                require_non_empty("senderId", sender_id)
            }
            Self::Chat {
                sender_id,
                attachment,
                ..
            } => {
                require_non_empty("senderId", sender_id)?;
                if let Some(encoded) = attachment {
                    decode_attachment(encoded)?;
                }
                Ok(())
            }
            Self::VideoUpdate {
                position_seconds, ..
            } => require_position(*position_seconds),
            Self::VideoPlay {
                video_url,
                position_seconds,
            }
            | Self::VideoPause {
                video_url,
                position_seconds,
            }
            | Self::VideoProgress {
                video_url,
                position_seconds,
            } => {
                require_non_empty("videoUrl", video_url)?;
                require_position(*position_seconds)
            }
            Self::QueueUpdate { room_id, .. } | Self::RosterSnapshot { room_id, .. } => {
                require_non_empty("roomId", room_id)
            }
            Self::Evict { participant_id } => require_non_empty("participantId", participant_id),
            Self::OwnerLeft { .. } => Ok(()),
        }
    }
}

/// Decodes a base64 attachment from a CHAT payload.
pub fn decode_attachment(encoded: &str) -> RoomResult<Vec<u8>> {
    BASE64
        .decode(encoded.trim())
        .map_err(|e| RoomError::MalformedMessage(format!("attachment: {}", e)))
}

fn require_non_empty(field: &str, value: &str) -> RoomResult<()> {
    if value.trim().is_empty() {
        return Err(RoomError::MalformedMessage(format!("missing {}", field)));
    }
    Ok(())
}

fn require_position(seconds: f64) -> RoomResult<()> {
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(RoomError::MalformedMessage(format!(
            "positionSeconds out of range: {}",
            seconds
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::VideoCandidate;

    #[test]
    fn join_uses_flat_wire_fields() {
        let alice = Participant::new("a", "Alice", "https://img/a.png");
        let json = serde_json::to_value(RoomMessage::join(&alice)).unwrap();
        assert_eq!(json["type"], "JOIN");
        assert_eq!(json["senderId"], "a");
        assert_eq!(json["sender"], "Alice");
        assert_eq!(json["avatarUrl"], "https://img/a.png");
    }

    #[test]
    fn video_update_decodes_with_defaults() {
        let msg = RoomMessage::decode(r#"{"type":"VIDEO_UPDATE"}"#).unwrap();
        assert_eq!(
            msg,
            RoomMessage::VideoUpdate {
                video_url: String::new(),
                position_seconds: 0.0,
                is_playing: false,
            }
        );
    }

    #[test]
    fn owner_left_kind_is_screaming_snake_case() {
        let raw = RoomMessage::OwnerLeft { sender_id: None }.encode().unwrap();
        assert_eq!(raw, r#"{"type":"OWNER_LEFT"}"#);
    }

    #[test]
    fn progress_without_position_is_malformed() {
        let err = RoomMessage::decode(r#"{"type":"VIDEO_PROGRESS","videoUrl":"v1"}"#).unwrap_err();
        assert!(matches!(err, RoomError::MalformedMessage(_)));
    }

    #[test]
    fn negative_position_is_malformed() {
        let err = RoomMessage::decode(
            r#"{"type":"VIDEO_PLAY","videoUrl":"v1","positionSeconds":-3.0}"#,
        )
        .unwrap_err();
        assert!(matches!(err, RoomError::MalformedMessage(_)));
    }

    #[test]
    fn unknown_type_is_malformed() {
        assert!(RoomMessage::decode(r#"{"type":"TELEPORT"}"#).is_err());
        assert!(RoomMessage::decode("not json").is_err());
    }

    #[test]
    fn join_without_sender_id_is_malformed() {
        let err = RoomMessage::decode(r#"{"type":"JOIN","senderId":"","sender":"x"}"#).unwrap_err();
        assert_eq!(err.code(), "malformed_message");
    }

    #[test]
    fn chat_attachment_travels_as_base64() {
        let bob = Participant::new("b", "Bob", "");
        let msg = RoomMessage::chat(&bob, "look".into(), Some(&[0xff, 0xd8, 0x01]));
        let raw = msg.encode().unwrap();
        let back = RoomMessage::decode(&raw).unwrap();
        match back {
            RoomMessage::Chat { attachment, .. } => {
                assert_eq!(decode_attachment(&attachment.unwrap()).unwrap(), vec![0xff, 0xd8, 0x01]);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn chat_with_invalid_attachment_is_malformed() {
        let raw = r#"{"type":"CHAT","senderId":"b","sender":"Bob","attachment":"***"}"#;
        assert!(matches!(
            RoomMessage::decode(raw),
            Err(RoomError::MalformedMessage(_))
        ));
    }

    #[test]
    fn queue_update_round_trips_field_for_field() {
        let carol = Participant::new("c", "Carol", "https://img/c.png");
        let dave = Participant::new("d", "Dave", "");
        let mut first = QueueItem::from_candidate(
            &VideoCandidate::new("v2", "https://v/2", "https://t/2"),
            carol.clone(),
        );
        first.voters.push(dave);
        first.votes = 2;
        let second =
            QueueItem::from_candidate(&VideoCandidate::new("v3", "https://v/3", ""), carol);
        let queue = vec![first, second];

        let raw = RoomMessage::QueueUpdate {
            room_id: "r1".into(),
            queue: queue.clone(),
            sender_id: Some("c".into()),
        }
        .encode()
        .unwrap();

        match RoomMessage::decode(&raw).unwrap() {
            RoomMessage::QueueUpdate {
                room_id,
                queue: parsed,
                sender_id,
            } => {
                assert_eq!(room_id, "r1");
                assert_eq!(sender_id.as_deref(), Some("c"));
                assert_eq!(parsed, queue);
            }
            other => panic!("unexpected message: {:?}", other),
        }
    }

    #[test]
    fn participant_is_extracted_from_chat() {
        let raw = r#"{"type":"CHAT","senderId":"b","sender":"Bob","avatarUrl":"u","content":"hi"}"#;
        let msg = RoomMessage::decode(raw).unwrap();
        assert_eq!(msg.participant(), Some(Participant::new("b", "Bob", "u")));
        assert_eq!(msg.kind(), "CHAT");
    }
}
