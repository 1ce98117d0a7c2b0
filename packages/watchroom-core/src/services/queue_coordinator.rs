//! Vote-ranked queue of upcoming videos.
//!
//! Ordering is by votes descending; ties keep insertion order (the sort is
//! stable), so every peer applying the same sequence of mutations ends up with
//! the same queue. Each participant holds at most one vote across the whole
//! queue.

use crate::error::{RoomError, RoomResult};
use crate::protocol::RoomMessage;
use crate::services::presence_tracker::OwnerAuthority;
use crate::state::{Participant, QueueItem, VideoCandidate};

/// Result of [`QueueCoordinator::propose`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposeOutcome {
    /// Nothing is playing: the candidate should start immediately.
    /// The queue was not touched.
    PlayNow(VideoCandidate),
    /// A new item was appended with the proposer's vote.
    Queued { key: String },
    /// The candidate was already queued; the proposal counted as a vote.
    Voted { key: String, changed: bool },
}

impl ProposeOutcome {
    /// Returns `true` if the queue changed and a `QUEUE_UPDATE` is due.
    pub fn mutated(&self) -> bool {
        match self {
            Self::PlayNow(_) => false,
            Self::Queued { .. } => true,
            Self::Voted { changed, .. } => *changed,
        }
    }
}

/// Owns the ordered [`QueueItem`] list of one room.
#[derive(Debug)]
pub struct QueueCoordinator {
    room_id: String,
    items: Vec<QueueItem>,
}

impl QueueCoordinator {
    /// Creates an empty queue for `room_id`.
    pub fn new(room_id: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            items: Vec::new(),
        }
    }

    /// Items in rank order.
    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Proposes `candidate` on behalf of `proposer`.
    ///
    /// - Already queued: counts as a vote for the existing item.
    /// - Nothing playing: [`ProposeOutcome::PlayNow`], queue untouched.
    /// - Otherwise: appended with `votes = 1`.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::InvalidRequest`] for a candidate without a source URL.
    pub fn propose(
        &mut self,
        proposer: &Participant,
        candidate: VideoCandidate,
        video_active: bool,
    ) -> RoomResult<ProposeOutcome> {
        if candidate.source_url.trim().is_empty() {
            return Err(RoomError::InvalidRequest(
                "candidate has no source URL".to_string(),
            ));
        }

        let key = candidate.key();
        if self.position_of(&key).is_some() {
            let changed = self.vote(proposer, &key)?;
            return Ok(ProposeOutcome::Voted { key, changed });
        }

        if !video_active {
            return Ok(ProposeOutcome::PlayNow(candidate));
        }

        Ok(ProposeOutcome::Queued {
            key: self.enqueue(proposer, &candidate),
        })
    }

    /// Appends `candidate` unconditionally, moving the proposer's vote to it.
    ///
    /// Used directly when an idle room cannot start playback locally and the
    /// item has to wait for the owner to promote it.
    pub fn enqueue(&mut self, proposer: &Participant, candidate: &VideoCandidate) -> String {
        let key = candidate.key();
        if self.position_of(&key).is_some() {
            // Vote on an existing key cannot fail.
            let _ = self.vote(proposer, &key);
            return key;
        }

        self.retract_votes(&proposer.id);
        log::info!("[Queue] {} queued {}", proposer.id, key);
        self.items
            .push(QueueItem::from_candidate(candidate, proposer.clone()));
        self.sort();
        key
    }

    /// Casts or moves `voter`'s vote to the item with `key`.
    ///
    /// Returns `false` when the voter already backs that item.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::QueueItemNotFound`] for an unknown key.
    pub fn vote(&mut self, voter: &Participant, key: &str) -> RoomResult<bool> {
        let index = self
            .position_of(key)
            .ok_or_else(|| RoomError::QueueItemNotFound(key.to_string()))?;

        if self.items[index].has_voter(&voter.id) {
            return Ok(false);
        }

        self.retract_votes(&voter.id);
        // Retracting never removes items, so the index is still valid.
        let item = &mut self.items[index];
        item.voters.push(voter.clone());
        item.votes = item.voters.len() as u32;
        log::debug!("[Queue] {} voted for {} ({} votes)", voter.id, key, item.votes);
        self.sort();
        Ok(true)
    }

    /// Removes `participant_id`'s vote from every item.
    ///
    /// Returns `true` if a vote was removed.
    pub fn retract_votes(&mut self, participant_id: &str) -> bool {
        let mut removed = false;
        for item in &mut self.items {
            let before = item.voters.len();
            item.voters.retain(|v| v.id != participant_id);
            if item.voters.len() != before {
                item.votes = item.voters.len() as u32;
                removed = true;
            }
        }
        if removed {
            self.sort();
        }
        removed
    }

    /// Owner-only removal by rank index.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::QueueItemNotFound`] when `index` is out of range.
    pub fn remove_at(
        &mut self,
        authority: &OwnerAuthority,
        index: usize,
    ) -> RoomResult<QueueItem> {
        if index >= self.items.len() {
            return Err(RoomError::QueueItemNotFound(format!("index {}", index)));
        }
        let item = self.items.remove(index);
        log::info!(
            "[Queue] Owner {} removed {}",
            authority.owner_id(),
            item.key
        );
        Ok(item)
    }

    /// Owner-only: takes the highest-ranked item for promotion to playback.
    pub fn dequeue_head(&mut self, _authority: &OwnerAuthority) -> Option<QueueItem> {
        if self.items.is_empty() {
            None
        } else {
            Some(self.items.remove(0))
        }
    }

    /// Replaces the queue with a received or cached list.
    ///
    /// Items are normalised: items without a source URL are dropped, duplicate
    /// keys keep the first occurrence, voters are deduplicated by id and
    /// `votes` is recomputed from them.
    pub fn apply_snapshot(&mut self, items: Vec<QueueItem>) {
        let mut normalised: Vec<QueueItem> = Vec::with_capacity(items.len());
        for mut item in items {
            if item.source_url.trim().is_empty() {
                log::warn!("[Queue] Dropping {} without source URL from snapshot", item.key);
                continue;
            }
            if item.key.trim().is_empty() {
                item.key = QueueItem::derive_key(&item.source_url, &item.title);
            }
            if normalised.iter().any(|existing| existing.key == item.key) {
                log::warn!("[Queue] Dropping duplicate key {} from snapshot", item.key);
                continue;
            }
            let mut voters: Vec<Participant> = Vec::with_capacity(item.voters.len());
            for voter in item.voters.drain(..) {
                if !voters.iter().any(|v| v.id == voter.id) {
                    voters.push(voter);
                }
            }
            item.votes = voters.len() as u32;
            item.voters = voters;
            normalised.push(item);
        }
        self.items = normalised;
        self.sort();
    }

    /// Full `QUEUE_UPDATE` carrying the current order.
    pub fn queue_update(&self, sender_id: Option<String>) -> RoomMessage {
        RoomMessage::QueueUpdate {
            room_id: self.room_id.clone(),
            queue: self.items.clone(),
            sender_id,
        }
    }

    fn position_of(&self, key: &str) -> Option<usize> {
        self.items.iter().position(|item| item.key == key)
    }

    fn sort(&mut self) {
        // Vec::sort_by is stable: equal vote counts keep insertion order.
        self.items.sort_by(|a, b| b.votes.cmp(&a.votes));
    }
}
