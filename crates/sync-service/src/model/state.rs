//! Authoritative per-session state.
//!
//! One `InvestigationState` exists per live session. Each accepted
//! transition produces a new value; values are never mutated after they
//! are stamped by the sequencer.

use common::types::SessionId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Session lifecycle status.
///
/// ```text
/// WAITING -> ACTIVE -> {PAUSED <-> ACTIVE} -> {COMPLETED | TERMINATED}
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Waiting,
    Active,
    Paused,
    Completed,
    Terminated,
}

impl SessionStatus {
    /// Terminal statuses absorb every further event.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Terminated)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Waiting => "WAITING",
            SessionStatus::Active => "ACTIVE",
            SessionStatus::Paused => "PAUSED",
            SessionStatus::Completed => "COMPLETED",
            SessionStatus::Terminated => "TERMINATED",
        }
    }
}

/// Patient mood, derived from metrics on every reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Mood {
    Calm,
    Anxious,
    Defensive,
    Breakthrough,
}

/// Psychological metrics. All three levels stay within `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub trust: f64,
    pub stress: f64,
    pub compliance: f64,
    pub mood: Mood,
}

/// Physical form of an inventory item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemKind {
    Physical,
    Conceptual,
    Document,
}

/// Forward-only item lifecycle: `LOCKED -> VISIBLE -> HELD -> {USED | ANALYZED}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemStatus {
    Locked,
    Visible,
    Held,
    Used,
    Analyzed,
}

impl ItemStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ItemStatus::Locked => "LOCKED",
            ItemStatus::Visible => "VISIBLE",
            ItemStatus::Held => "HELD",
            ItemStatus::Used => "USED",
            ItemStatus::Analyzed => "ANALYZED",
        }
    }
}

/// One scenario item as it appears in `inventory`.
///
/// `acquiredAt` and `unlockedBy` are always present on the wire and are
/// `null` until the item is picked up or revealed. Items that start visible
/// keep `unlockedBy: null`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ItemKind,
    pub status: ItemStatus,
    /// Event timestamp (ms) of the pick-up.
    pub acquired_at: Option<i64>,
    /// Node id or flag name that revealed the item.
    pub unlocked_by: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionStatus {
    Online,
    Offline,
    Reconnecting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Activity {
    Idle,
    Typing,
    Reading,
    Interacting,
}

/// One of the two participant seats in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Seat {
    Patient,
    Doctor,
}

impl Seat {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Seat::Patient => "PATIENT",
            Seat::Doctor => "DOCTOR",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantState {
    /// Unset until the seat is first joined; fixed afterwards.
    pub user_id: Option<String>,
    pub connection_status: ConnectionStatus,
    pub last_ack_sequence_id: u64,
    pub current_activity: Activity,
}

impl ParticipantState {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            user_id: None,
            connection_status: ConnectionStatus::Offline,
            last_ack_sequence_id: 0,
            current_activity: Activity::Idle,
        }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        self.connection_status == ConnectionStatus::Online
    }
}

/// Exactly two slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participants {
    pub patient: ParticipantState,
    pub doctor: ParticipantState,
}

impl Participants {
    #[must_use]
    pub fn get(&self, seat: Seat) -> &ParticipantState {
        match seat {
            Seat::Patient => &self.patient,
            Seat::Doctor => &self.doctor,
        }
    }

    pub fn get_mut(&mut self, seat: Seat) -> &mut ParticipantState {
        match seat {
            Seat::Patient => &mut self.patient,
            Seat::Doctor => &mut self.doctor,
        }
    }

    #[must_use]
    pub fn both_online(&self) -> bool {
        self.patient.is_online() && self.doctor.is_online()
    }

    /// Seat currently held by `user_id`, if any.
    #[must_use]
    pub fn seat_of(&self, user_id: &str) -> Option<Seat> {
        [Seat::Patient, Seat::Doctor]
            .into_iter()
            .find(|seat| self.get(*seat).user_id.as_deref() == Some(user_id))
    }
}

/// The authoritative snapshot of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestigationState {
    pub session_id: SessionId,
    pub sequence_id: u64,
    pub last_update_timestamp: i64,
    pub status: SessionStatus,
    pub metrics: Metrics,
    pub action_node_id: String,
    pub narrative_flags: BTreeMap<String, bool>,
    pub inventory: Vec<InventoryItem>,
    pub participants: Participants,
}

impl InvestigationState {
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    #[must_use]
    pub fn has_flag(&self, flag: &str) -> bool {
        self.narrative_flags.get(flag).copied().unwrap_or(false)
    }

    pub fn set_flag(&mut self, flag: &str) {
        self.narrative_flags.insert(flag.to_string(), true);
    }

    #[must_use]
    pub fn item(&self, item_id: &str) -> Option<&InventoryItem> {
        self.inventory.iter().find(|item| item.id == item_id)
    }

    pub fn item_mut(&mut self, item_id: &str) -> Option<&mut InventoryItem> {
        self.inventory.iter_mut().find(|item| item.id == item_id)
    }
}
