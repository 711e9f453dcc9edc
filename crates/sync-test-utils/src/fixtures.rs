//! Scenario fixtures and event builders.

use std::sync::Arc;
use sync_service::engine::ScenarioLibrary;

/// User id of the participant in the patient seat.
pub const PATIENT: &str = "patient-1";

/// User id of the participant in the doctor seat.
pub const DOCTOR: &str = "doctor-1";

/// Scenario used by most tests.
pub const SCENARIO: &str = "first-session";

/// The scenario library shipped with the service.
pub fn scenario_library() -> Arc<ScenarioLibrary> {
    let library = ScenarioLibrary::from_json(include_str!(
        "../../sync-service/fixtures/scenarios.json"
    ))
    .expect("fixture scenario library is valid");
    Arc::new(library)
}

/// Builders for authorized events, emitted by the fixture users.
pub mod events {
    use super::{DOCTOR, PATIENT, SCENARIO};
    use common::types::SessionId;
    use sync_service::model::event::{
        ActivityChangedPayload, AuthorizedEvent, DialogueChoicePayload, EventKind, GameEvent,
        InterventionPayload, ItemAction, ItemInteractionPayload, Role, SessionInitPayload,
        SessionTerminatedPayload, SurrenderPayload, TargetMetric, SYSTEM_EMITTER,
    };
    use sync_service::model::state::Activity;

    fn authorized(
        session_id: SessionId,
        emitter: &str,
        role: Role,
        kind: EventKind,
    ) -> AuthorizedEvent {
        AuthorizedEvent::new(GameEvent::new(session_id, emitter, kind), role)
    }

    /// `SESSION_INIT` for the default scenario.
    pub fn init(session_id: SessionId) -> AuthorizedEvent {
        init_scenario(session_id, SCENARIO)
    }

    pub fn init_scenario(session_id: SessionId, scenario_id: &str) -> AuthorizedEvent {
        authorized(
            session_id,
            SYSTEM_EMITTER,
            Role::System,
            EventKind::SessionInit(SessionInitPayload {
                scenario_id: scenario_id.to_string(),
            }),
        )
    }

    pub fn choice(session_id: SessionId, node_id: &str, choice_id: &str) -> AuthorizedEvent {
        authorized(
            session_id,
            PATIENT,
            Role::Patient,
            EventKind::DialogueChoice(DialogueChoicePayload {
                node_id: node_id.to_string(),
                choice_id: choice_id.to_string(),
            }),
        )
    }

    pub fn intervention(
        session_id: SessionId,
        technique_id: &str,
        intensity: u8,
        target_metric: TargetMetric,
    ) -> AuthorizedEvent {
        authorized(
            session_id,
            DOCTOR,
            Role::Doctor,
            EventKind::InterventionTriggered(InterventionPayload {
                technique_id: technique_id.to_string(),
                intensity,
                target_metric,
            }),
        )
    }

    pub fn item(
        session_id: SessionId,
        item_id: &str,
        action: ItemAction,
        target_id: Option<&str>,
    ) -> AuthorizedEvent {
        authorized(
            session_id,
            PATIENT,
            Role::Patient,
            EventKind::ItemInteraction(ItemInteractionPayload {
                item_id: item_id.to_string(),
                action,
                target_id: target_id.map(str::to_string),
            }),
        )
    }

    /// `ACTIVITY_CHANGED` from the doctor.
    pub fn doctor_activity(session_id: SessionId, activity: Activity) -> AuthorizedEvent {
        authorized(
            session_id,
            DOCTOR,
            Role::Doctor,
            EventKind::ActivityChanged(ActivityChangedPayload { activity }),
        )
    }

    pub fn surrender(session_id: SessionId, reason: &str) -> AuthorizedEvent {
        authorized(
            session_id,
            PATIENT,
            Role::Patient,
            EventKind::SurrenderRequested(SurrenderPayload {
                reason: reason.to_string(),
            }),
        )
    }

    pub fn terminate(session_id: SessionId, reason: &str) -> AuthorizedEvent {
        authorized(
            session_id,
            SYSTEM_EMITTER,
            Role::System,
            EventKind::SessionTerminated(SessionTerminatedPayload {
                reason: reason.to_string(),
            }),
        )
    }
}
