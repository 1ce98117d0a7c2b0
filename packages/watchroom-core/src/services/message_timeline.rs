//! Append-only chat history of one peer.
//!
//! Entries are ordered by local arrival; there is no cross-peer total order.

use crate::state::ChatEntry;

/// Ordered list of chat and system entries.
#[derive(Debug, Default)]
pub struct MessageTimeline {
    entries: Vec<ChatEntry>,
    next_sequence: u64,
}

impl MessageTimeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `entry`, stamping the next local sequence number.
    ///
    /// Returns the assigned sequence.
    pub fn append(&mut self, mut entry: ChatEntry) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        entry.local_sequence = sequence;
        self.entries.push(entry);
        sequence
    }

    pub fn entries(&self) -> &[ChatEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Most recent entry.
    pub fn last(&self) -> Option<&ChatEntry> {
        self.entries.last()
    }
}
