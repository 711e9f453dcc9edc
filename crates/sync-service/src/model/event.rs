//! Game events.
//!
//! Wire shape:
//!
//! ```json
//! {
//!   "eventId": "...", "timestamp": 1700000000000, "emitterId": "user-7",
//!   "sessionId": "...", "type": "DIALOGUE_CHOICE",
//!   "payload": { "nodeId": "N1", "choiceId": "C1" }
//! }
//! ```
//!
//! `type` and `payload` form a closed tagged enum ([`EventKind`]) that the
//! reducer matches exhaustively. Older clients spell the emitter field
//! `emmitterId`; both spellings are accepted on input.

use crate::model::state::{Activity, InvestigationState, Seat};
use common::types::{EventId, SessionId};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Emitter id stamped on engine output (`STATE_UPDATE`, `GAME_OVER`).
pub const ENGINE_EMITTER: &str = "engine";

/// Emitter id for system-injected events without a human emitter.
pub const SYSTEM_EMITTER: &str = "system";

/// Role resolved by the auth collaborator before an event reaches the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Patient,
    Doctor,
    /// Session lifecycle collaborator, registry and admin tooling.
    System,
}

impl Role {
    /// Participant seat for human roles.
    #[must_use]
    pub const fn seat(self) -> Option<Seat> {
        match self {
            Role::Patient => Some(Seat::Patient),
            Role::Doctor => Some(Seat::Doctor),
            Role::System => None,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Role::Patient => "PATIENT",
            Role::Doctor => "DOCTOR",
            Role::System => "SYSTEM",
        }
    }

    /// Parse the role header value set by the auth gateway.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "PATIENT" => Some(Role::Patient),
            "DOCTOR" => Some(Role::Doctor),
            "SYSTEM" | "ADMIN" => Some(Role::System),
            _ => None,
        }
    }
}

impl From<Seat> for Role {
    fn from(seat: Seat) -> Self {
        match seat {
            Seat::Patient => Role::Patient,
            Seat::Doctor => Role::Doctor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameEvent {
    pub event_id: EventId,
    /// Emitter clock, ms since epoch. Only used for `acquiredAt`.
    pub timestamp: i64,
    #[serde(alias = "emmitterId")]
    pub emitter_id: String,
    pub session_id: SessionId,
    #[serde(flatten)]
    pub kind: EventKind,
}

impl GameEvent {
    /// New event with a fresh id and the current wall-clock time.
    #[must_use]
    pub fn new(session_id: SessionId, emitter_id: impl Into<String>, kind: EventKind) -> Self {
        Self {
            event_id: EventId::new(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            emitter_id: emitter_id.into(),
            session_id,
            kind,
        }
    }

    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    // System
    SessionInit(SessionInitPayload),
    PlayerJoined(PlayerJoinedPayload),
    ConnectionLost(ConnectionLostPayload),
    SessionTerminated(SessionTerminatedPayload),

    // Participant
    ItemInteraction(ItemInteractionPayload),
    InterventionTriggered(InterventionPayload),
    DialogueChoice(DialogueChoicePayload),
    ActivityChanged(ActivityChangedPayload),
    SurrenderRequested(SurrenderPayload),

    // Engine output
    StateUpdate(StateUpdatePayload),
    GameOver(GameOverPayload),
}

impl EventKind {
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            EventKind::SessionInit(_) => "SESSION_INIT",
            EventKind::PlayerJoined(_) => "PLAYER_JOINED",
            EventKind::ConnectionLost(_) => "CONNECTION_LOST",
            EventKind::SessionTerminated(_) => "SESSION_TERMINATED",
            EventKind::ItemInteraction(_) => "ITEM_INTERACTION",
            EventKind::InterventionTriggered(_) => "INTERVENTION_TRIGGERED",
            EventKind::DialogueChoice(_) => "DIALOGUE_CHOICE",
            EventKind::ActivityChanged(_) => "ACTIVITY_CHANGED",
            EventKind::SurrenderRequested(_) => "SURRENDER_REQUESTED",
            EventKind::StateUpdate(_) => "STATE_UPDATE",
            EventKind::GameOver(_) => "GAME_OVER",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInitPayload {
    pub scenario_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerJoinedPayload {
    pub seat: Seat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionLostPayload {
    pub seat: Seat,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTerminatedPayload {
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemAction {
    Inspect,
    PickUp,
    Combine,
}

impl ItemAction {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ItemAction::Inspect => "INSPECT",
            ItemAction::PickUp => "PICK_UP",
            ItemAction::Combine => "COMBINE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemInteractionPayload {
    pub item_id: String,
    pub action: ItemAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetMetric {
    Stress,
    Trust,
    Compliance,
}

impl TargetMetric {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            TargetMetric::Stress => "STRESS",
            TargetMetric::Trust => "TRUST",
            TargetMetric::Compliance => "COMPLIANCE",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InterventionPayload {
    pub technique_id: String,
    /// 1 to 10.
    pub intensity: u8,
    pub target_metric: TargetMetric,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogueChoicePayload {
    pub node_id: String,
    pub choice_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityChangedPayload {
    pub activity: Activity,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SurrenderPayload {
    #[serde(default)]
    pub reason: String,
}

/// Clamped metric change of one transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsDiff {
    pub stress_delta: f64,
    pub trust_delta: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateUpdatePayload {
    pub previous_sequence_id: u64,
    pub new_sequence_id: u64,
    pub state: Arc<InvestigationState>,
    pub diff: MetricsDiff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameOverReason {
    StressOverload,
    TrustCollapse,
    ComplianceCollapse,
    Surrender,
    AdminTerminated,
    ScenarioComplete,
    ScenarioFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalMetrics {
    pub trust: f64,
    pub stress: f64,
    pub compliance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameOverPayload {
    pub outcome: Outcome,
    pub reason: GameOverReason,
    pub final_metrics: FinalMetrics,
}

/// An inbound event together with the role the auth collaborator resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorizedEvent {
    pub event: GameEvent,
    pub role: Role,
}

impl AuthorizedEvent {
    #[must_use]
    pub fn new(event: GameEvent, role: Role) -> Self {
        Self { event, role }
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.event.session_id
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dialogue_choice_wire_shape() {
        let session_id = SessionId::new();
        let event = GameEvent::new(
            session_id,
            "patient-1",
            EventKind::DialogueChoice(DialogueChoicePayload {
                node_id: "N1".to_string(),
                choice_id: "C1".to_string(),
            }),
        );

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "DIALOGUE_CHOICE");
        assert_eq!(value["emitterId"], "patient-1");
        assert_eq!(value["sessionId"], session_id.to_string());
        assert_eq!(value["payload"]["nodeId"], "N1");
        assert_eq!(value["payload"]["choiceId"], "C1");
    }

    #[test]
    fn test_legacy_emitter_spelling_accepted() {
        let session_id = SessionId::new();
        let event_id = EventId::new();
        let value = json!({
            "eventId": event_id,
            "timestamp": 1_700_000_000_000_i64,
            "emmitterId": "doctor-1",
            "sessionId": session_id,
            "type": "INTERVENTION_TRIGGERED",
            "payload": { "techniqueId": "CONFRONTATION", "intensity": 9, "targetMetric": "STRESS" }
        });

        let event: GameEvent = serde_json::from_value(value).unwrap();
        assert_eq!(event.emitter_id, "doctor-1");
        assert_eq!(event.event_id, event_id);
        assert_eq!(
            event.kind,
            EventKind::InterventionTriggered(InterventionPayload {
                technique_id: "CONFRONTATION".to_string(),
                intensity: 9,
                target_metric: TargetMetric::Stress,
            })
        );
    }

    #[test]
    fn test_unknown_event_type_rejected() {
        let value = json!({
            "eventId": EventId::new(),
            "timestamp": 0,
            "emitterId": "patient-1",
            "sessionId": SessionId::new(),
            "type": "NOTE_ADDED",
            "payload": {}
        });

        assert!(serde_json::from_value::<GameEvent>(value).is_err());
    }

    #[test]
    fn test_fractional_intensity_rejected() {
        let value = json!({
            "eventId": EventId::new(),
            "timestamp": 0,
            "emitterId": "doctor-1",
            "sessionId": SessionId::new(),
            "type": "INTERVENTION_TRIGGERED",
            "payload": { "techniqueId": "CONFRONTATION", "intensity": 4.5, "targetMetric": "STRESS" }
        });

        assert!(serde_json::from_value::<GameEvent>(value).is_err());
    }

    #[test]
    fn test_item_interaction_target_optional() {
        let value = json!({
            "eventId": EventId::new(),
            "timestamp": 0,
            "emitterId": "patient-1",
            "sessionId": SessionId::new(),
            "type": "ITEM_INTERACTION",
            "payload": { "itemId": "item_teddy_bear", "action": "PICK_UP" }
        });

        let event: GameEvent = serde_json::from_value(value).unwrap();
        assert!(matches!(
            event.kind,
            EventKind::ItemInteraction(ItemInteractionPayload {
                action: ItemAction::PickUp,
                target_id: None,
                ..
            })
        ));
    }

    #[test]
    fn test_role_parsing() {
        assert_eq!(Role::parse("doctor"), Some(Role::Doctor));
        assert_eq!(Role::parse(" PATIENT "), Some(Role::Patient));
        assert_eq!(Role::parse("ADMIN"), Some(Role::System));
        assert_eq!(Role::parse("nurse"), None);
        assert_eq!(Role::Doctor.seat(), Some(Seat::Doctor));
        assert_eq!(Role::System.seat(), None);
    }
}
