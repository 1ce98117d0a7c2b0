//! Fixed protocol constants that should NOT be changed.
//!
//! These values are shared by every peer in a room. Changing them breaks
//! interoperability with peers running an older build.

// ─────────────────────────────────────────────────────────────────────────────
// Topics and Keys
// ─────────────────────────────────────────────────────────────────────────────

/// Prefix of the per-room broadcast topic (`room.<roomId>`).
pub const ROOM_TOPIC_PREFIX: &str = "room.";

/// Prefix of the local queue cache key (`queue:<roomId>`).
pub const QUEUE_CACHE_PREFIX: &str = "queue:";

/// Separator between source URL and title in a queue item key.
pub const QUEUE_KEY_SEPARATOR: char = '#';

/// Sender name used for engine-generated chat notices.
pub const SYSTEM_SENDER_NAME: &str = "System";

/// Returns the broadcast topic for a room.
#[must_use]
pub fn room_topic(room_id: &str) -> String {
    format!("{ROOM_TOPIC_PREFIX}{room_id}")
}

/// Returns the queue cache key for a room.
#[must_use]
pub fn queue_cache_key(room_id: &str) -> String {
    format!("{QUEUE_CACHE_PREFIX}{room_id}")
}

// ─────────────────────────────────────────────────────────────────────────────
// Relay Server
// ─────────────────────────────────────────────────────────────────────────────

/// Service identifier returned by the relay health endpoint.
pub const SERVICE_ID: &str = "watchroom-relay";

/// Seconds without any client frame before the relay drops a connection.
///
/// Clients send `PING` every [`WS_PING_INTERVAL_SECS`].
pub const WS_HEARTBEAT_TIMEOUT_SECS: u64 = 30;

/// Interval between relay heartbeat checks (seconds).
pub const WS_HEARTBEAT_CHECK_INTERVAL_SECS: u64 = 1;

/// Interval between client `PING` frames (seconds).
pub const WS_PING_INTERVAL_SECS: u64 = 10;

/// Capacity of each per-topic broadcast channel.
///
/// A subscriber lagging further than this misses messages; the next
/// snapshot from the owner repairs its state.
pub const TOPIC_CHANNEL_CAPACITY: usize = 256;

/// Upper bound for a single relay frame (bytes). Attachments ride inside CHAT
/// payloads, so this must fit a compressed image.
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_and_cache_key_formats() {
        assert_eq!(room_topic("42"), "room.42");
        assert_eq!(queue_cache_key("42"), "queue:42");
    }
}
