//! Relay frame protocol spoken over the WebSocket between a [`super::WsChannel`]
//! and the relay server.

use serde::{Deserialize, Serialize};

/// Frames sent by a client to the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientFrame {
    Subscribe { topic: String },
    Unsubscribe { topic: String },
    Publish { topic: String, payload: String },
    Ping,
}

/// Frames sent by the relay to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelayFrame {
    /// A payload published on a topic the client subscribed to.
    Message { topic: String, payload: String },
    Pong,
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_frames_use_op_tag() {
        let json = serde_json::to_string(&ClientFrame::Subscribe {
            topic: "room.r1".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"op":"SUBSCRIBE","topic":"room.r1"}"#);
        assert_eq!(
            serde_json::to_string(&ClientFrame::Ping).unwrap(),
            r#"{"op":"PING"}"#
        );
    }

    #[test]
    fn relay_message_parses() {
        let frame: RelayFrame =
            serde_json::from_str(r#"{"op":"MESSAGE","topic":"room.r1","payload":"{}"}"#).unwrap();
        assert_eq!(
            frame,
            RelayFrame::Message {
                topic: "room.r1".into(),
                payload: "{}".into(),
            }
        );
    }
}
