//! Live participant roster and owner identity.
//!
//! Responsibilities:
//! - Roster insertion/removal (idempotent on duplicate JOIN)
//! - Owner assignment by the first-joiner convention or room metadata
//! - Issuing [`OwnerAuthority`] tokens required by owner-only operations
//!
//! Owner loss never promotes another participant: authority cannot move
//! without a consensus protocol, so the room ends for followers instead.

use crate::error::{RoomError, RoomResult};
use crate::state::Participant;

/// Proof that a participant was the owner when the token was issued.
///
/// Only [`PresenceTracker::authorize`] constructs it, so sibling components
/// can demand one instead of reading the roster themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerAuthority {
    owner_id: String,
}

impl OwnerAuthority {
    /// Id of the authorized owner.
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }
}

/// Result of processing a LEAVE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaveOutcome {
    /// Participant was not in the roster.
    Unknown,
    /// A non-owner left.
    Left(Participant),
    /// The owner left; `owner_id` is now `None`.
    OwnerLost(Participant),
}

/// Tracks who is in the room and who owns it.
#[derive(Debug, Default)]
pub struct PresenceTracker {
    /// Roster in join order.
    roster: Vec<Participant>,
    owner_id: Option<String>,
}

impl PresenceTracker {
    /// Creates an empty tracker.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `participant`; the first participant of an empty, ownerless room
    /// becomes its owner.
    ///
    /// Returns `true` if the participant was newly added. A duplicate id is a
    /// no-op (reconnect races), though a changed name or avatar is refreshed.
    pub fn on_join(&mut self, participant: Participant) -> bool {
        if let Some(existing) = self.roster.iter_mut().find(|p| p.id == participant.id) {
            if *existing != participant {
                log::debug!(
                    "[Presence] Refreshing profile of {} on duplicate JOIN",
                    participant.id
                );
                *existing = participant;
            }
            return false;
        }

        if self.roster.is_empty() && self.owner_id.is_none() {
            log::info!(
                "[Presence] {} joined an empty room and becomes owner",
                participant.id
            );
            self.owner_id = Some(participant.id.clone());
        }
        self.roster.push(participant);
        true
    }

    /// Removes `participant_id` from the roster.
    pub fn on_leave(&mut self, participant_id: &str) -> LeaveOutcome {
        let Some(index) = self.roster.iter().position(|p| p.id == participant_id) else {
            if self.is_owner(participant_id) {
                // Owner known from metadata but never seen in the roster.
                self.owner_id = None;
                return LeaveOutcome::OwnerLost(Participant::new(participant_id, "", ""));
            }
            return LeaveOutcome::Unknown;
        };

        let participant = self.roster.remove(index);
        if self.is_owner(participant_id) {
            log::warn!("[Presence] Owner {} left, room has no owner", participant_id);
            self.owner_id = None;
            LeaveOutcome::OwnerLost(participant)
        } else {
            LeaveOutcome::Left(participant)
        }
    }

    /// Returns `true` if `participant_id` is the current owner.
    #[must_use]
    pub fn is_owner(&self, participant_id: &str) -> bool {
        self.owner_id.as_deref() == Some(participant_id)
    }

    /// Issues an owner capability for `participant_id`.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::PermissionDenied`] if the participant is not the owner.
    pub fn authorize(&self, participant_id: &str, action: &str) -> RoomResult<OwnerAuthority> {
        if self.is_owner(participant_id) {
            Ok(OwnerAuthority {
                owner_id: participant_id.to_string(),
            })
        } else {
            Err(RoomError::PermissionDenied(format!(
                "{} requires room ownership",
                action
            )))
        }
    }

    /// Records the owner named by room metadata or a roster snapshot.
    pub fn set_owner(&mut self, owner_id: Option<String>) {
        if self.owner_id != owner_id {
            log::info!(
                "[Presence] Owner set: {:?} -> {:?}",
                self.owner_id,
                owner_id
            );
            self.owner_id = owner_id;
        }
    }

    /// Replaces the roster with an authoritative snapshot, keeping `local`
    /// present even if the snapshot predates its JOIN.
    pub fn replace_roster(
        &mut self,
        participants: Vec<Participant>,
        owner_id: Option<String>,
        local: &Participant,
    ) {
        let mut roster: Vec<Participant> = Vec::with_capacity(participants.len() + 1);
        for participant in participants {
            if !roster.iter().any(|p| p.id == participant.id) {
                roster.push(participant);
            }
        }
        if !roster.iter().any(|p| p.id == local.id) {
            roster.push(local.clone());
        }
        self.roster = roster;
        self.set_owner(owner_id);
    }

    /// Owner-initiated removal of another participant.
    ///
    /// # Errors
    ///
    /// Returns [`RoomError::InvalidState`] when the owner tries to evict itself.
    pub fn evict(
        &mut self,
        authority: &OwnerAuthority,
        participant_id: &str,
    ) -> RoomResult<Option<Participant>> {
        if authority.owner_id() == participant_id {
            return Err(RoomError::InvalidState(
                "the owner cannot evict itself".to_string(),
            ));
        }
        match self.on_leave(participant_id) {
            LeaveOutcome::Left(p) | LeaveOutcome::OwnerLost(p) => Ok(Some(p)),
            LeaveOutcome::Unknown => Ok(None),
        }
    }

    /// Current owner id.
    pub fn owner_id(&self) -> Option<&str> {
        self.owner_id.as_deref()
    }

    /// Participants in join order.
    pub fn participants(&self) -> &[Participant] {
        &self.roster
    }

    /// Looks up a participant by id.
    pub fn get(&self, participant_id: &str) -> Option<&Participant> {
        self.roster.iter().find(|p| p.id == participant_id)
    }

    /// Number of participants.
    pub fn len(&self) -> usize {
        self.roster.len()
    }

    /// Returns `true` if nobody is in the room.
    pub fn is_empty(&self) -> bool {
        self.roster.is_empty()
    }
}
