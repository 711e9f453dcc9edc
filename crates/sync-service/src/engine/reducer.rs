//! State reducer.
//!
//! Pure `(state, event) -> Result<Reduction, RejectionReason>`. Validation
//! runs in a fixed order:
//!
//! 1. the event targets this session
//! 2. the session is not terminal
//! 3. the event is legal for the current status and the emitter's role
//! 4. referenced nodes, choices, items and techniques exist
//!
//! A rejection never touches the input state. On success the returned state
//! carries the old sequence id; the sequencer stamps it. The terminal check
//! runs after every successful reduction and synthesizes `GAME_OVER`.

use crate::engine::metrics::{initial_metrics, reduce_metrics};
use crate::engine::scenario::{Scenario, UnlockCondition};
use crate::errors::RejectionReason;
use crate::model::event::{
    AuthorizedEvent, DialogueChoicePayload, EventKind, FinalMetrics, GameOverPayload,
    GameOverReason, ItemAction, ItemInteractionPayload, MetricsDiff, Outcome, Role,
};
use crate::model::state::{
    Activity, ConnectionStatus, InventoryItem, InvestigationState, ItemStatus, Metrics,
    ParticipantState, Participants, Seat, SessionStatus,
};
use std::collections::BTreeMap;

/// Result of one accepted event, before stamping.
#[derive(Debug, Clone, PartialEq)]
pub struct Reduction {
    pub state: InvestigationState,
    pub diff: MetricsDiff,
    /// Set when this reduction ended the session.
    pub game_over: Option<GameOverPayload>,
}

/// Build the genesis state from a `SESSION_INIT` event.
///
/// # Errors
///
/// Rejects anything other than a system-emitted `SESSION_INIT` for this
/// scenario.
pub fn initialize(
    scenario: &Scenario,
    input: &AuthorizedEvent,
) -> Result<InvestigationState, RejectionReason> {
    let EventKind::SessionInit(payload) = &input.event.kind else {
        return Err(RejectionReason::Malformed(format!(
            "session must start with SESSION_INIT, got {}",
            input.event.type_name()
        )));
    };
    if input.role != Role::System {
        return Err(RejectionReason::WrongRole {
            event_type: "SESSION_INIT",
            role: input.role.as_str(),
        });
    }
    if payload.scenario_id != scenario.id() {
        return Err(RejectionReason::UnknownScenario(payload.scenario_id.clone()));
    }

    let inventory = scenario
        .items()
        .map(|definition| InventoryItem {
            id: definition.id.clone(),
            kind: definition.kind,
            status: if definition.unlock.is_some() {
                ItemStatus::Locked
            } else {
                ItemStatus::Visible
            },
            acquired_at: None,
            unlocked_by: None,
        })
        .collect();

    let mut state = InvestigationState {
        session_id: input.event.session_id,
        sequence_id: 0,
        last_update_timestamp: 0,
        status: SessionStatus::Waiting,
        metrics: initial_metrics(scenario.initial_metrics(), scenario.mood_thresholds()),
        action_node_id: scenario.start_node().to_string(),
        narrative_flags: BTreeMap::new(),
        inventory,
        participants: Participants {
            patient: ParticipantState::empty(),
            doctor: ParticipantState::empty(),
        },
    };
    unlock_items(scenario, &mut state);
    Ok(state)
}

/// Apply one event to `state`.
///
/// # Errors
///
/// Returns the first failed validation step as a `RejectionReason`.
pub fn reduce(
    scenario: &Scenario,
    state: &InvestigationState,
    input: &AuthorizedEvent,
) -> Result<Reduction, RejectionReason> {
    let event = &input.event;
    if event.session_id != state.session_id {
        return Err(RejectionReason::SessionMismatch);
    }
    if state.is_terminal() {
        return Err(RejectionReason::SessionTerminal);
    }
    check_permitted(state.status, &event.kind, input.role)?;

    let mut next = state.clone();
    let mut ended_by: Option<(Outcome, GameOverReason)> = None;

    match &event.kind {
        EventKind::PlayerJoined(payload) => {
            join(&mut next, payload.seat, input.role, &event.emitter_id)?;
        }
        EventKind::ConnectionLost(payload) => connection_lost(&mut next, payload.seat)?,
        EventKind::ActivityChanged(payload) => {
            let seat = seat_for(input.role, "ACTIVITY_CHANGED")?;
            change_activity(&mut next, seat, payload.activity)?;
        }
        EventKind::DialogueChoice(payload) => choose(scenario, &mut next, payload)?,
        EventKind::ItemInteraction(payload) => {
            interact(scenario, &mut next, payload, event.timestamp)?;
        }
        EventKind::SurrenderRequested(_) => {
            ended_by = Some((Outcome::Failure, GameOverReason::Surrender));
        }
        EventKind::SessionTerminated(_) => {
            ended_by = Some((Outcome::Failure, GameOverReason::AdminTerminated));
        }
        // Validated and applied entirely by the metrics reducer.
        EventKind::InterventionTriggered(_) => {}
        EventKind::SessionInit(_) => return Err(RejectionReason::AlreadyInitialized),
        EventKind::StateUpdate(_) | EventKind::GameOver(_) => {
            return Err(RejectionReason::EngineOriginated)
        }
    }

    let metrics = reduce_metrics(scenario, &state.metrics, &event.kind)?;
    next.metrics = metrics.metrics;
    unlock_items(scenario, &mut next);

    let ended_by = ended_by.or_else(|| terminal_check(scenario, &next, metrics.raw_stress));
    let game_over = ended_by.map(|(outcome, reason)| {
        next.status = match outcome {
            Outcome::Success => SessionStatus::Completed,
            Outcome::Failure => SessionStatus::Terminated,
        };
        GameOverPayload {
            outcome,
            reason,
            final_metrics: final_metrics(&next.metrics),
        }
    });

    Ok(Reduction {
        state: next,
        diff: metrics.diff,
        game_over,
    })
}

fn check_permitted(
    status: SessionStatus,
    kind: &EventKind,
    role: Role,
) -> Result<(), RejectionReason> {
    let roles: &[Role] = match kind {
        EventKind::SessionInit(_) => return Err(RejectionReason::AlreadyInitialized),
        EventKind::StateUpdate(_) | EventKind::GameOver(_) => {
            return Err(RejectionReason::EngineOriginated)
        }
        EventKind::PlayerJoined(_) | EventKind::ActivityChanged(_) => {
            &[Role::Patient, Role::Doctor]
        }
        EventKind::ConnectionLost(_) | EventKind::SessionTerminated(_) => &[Role::System],
        EventKind::InterventionTriggered(_) => &[Role::Doctor],
        EventKind::ItemInteraction(_)
        | EventKind::DialogueChoice(_)
        | EventKind::SurrenderRequested(_) => &[Role::Patient],
    };
    if !roles.contains(&role) {
        return Err(RejectionReason::WrongRole {
            event_type: kind.type_name(),
            role: role.as_str(),
        });
    }

    let legal = match kind {
        EventKind::PlayerJoined(_) | EventKind::ConnectionLost(_) => matches!(
            status,
            SessionStatus::Waiting | SessionStatus::Active | SessionStatus::Paused
        ),
        EventKind::ActivityChanged(_) => {
            matches!(status, SessionStatus::Active | SessionStatus::Paused)
        }
        EventKind::InterventionTriggered(_)
        | EventKind::ItemInteraction(_)
        | EventKind::DialogueChoice(_) => status == SessionStatus::Active,
        EventKind::SurrenderRequested(_) | EventKind::SessionTerminated(_) => {
            !status.is_terminal()
        }
        EventKind::SessionInit(_) | EventKind::StateUpdate(_) | EventKind::GameOver(_) => false,
    };
    if !legal {
        return Err(RejectionReason::IllegalForStatus {
            event_type: kind.type_name(),
            status: status.as_str(),
        });
    }
    Ok(())
}

fn seat_for(role: Role, event_type: &'static str) -> Result<Seat, RejectionReason> {
    role.seat().ok_or(RejectionReason::WrongRole {
        event_type,
        role: role.as_str(),
    })
}

fn join(
    state: &mut InvestigationState,
    seat: Seat,
    role: Role,
    user_id: &str,
) -> Result<(), RejectionReason> {
    if role.seat() != Some(seat) {
        return Err(RejectionReason::WrongRole {
            event_type: "PLAYER_JOINED",
            role: role.as_str(),
        });
    }
    if let Some(held) = state.participants.seat_of(user_id) {
        if held != seat {
            return Err(RejectionReason::SeatTaken);
        }
    }

    let slot = state.participants.get_mut(seat);
    match slot.user_id.as_deref() {
        Some(holder) if holder != user_id => return Err(RejectionReason::SeatTaken),
        _ => {}
    }
    if slot.is_online() {
        return Err(RejectionReason::AlreadyOnline);
    }
    slot.user_id = Some(user_id.to_string());
    slot.connection_status = ConnectionStatus::Online;
    slot.current_activity = Activity::Idle;

    if state.participants.both_online() {
        state.status = SessionStatus::Active;
    }
    Ok(())
}

fn connection_lost(state: &mut InvestigationState, seat: Seat) -> Result<(), RejectionReason> {
    let waiting = state.status == SessionStatus::Waiting;
    let slot = state.participants.get_mut(seat);
    if !slot.is_online() {
        return Err(RejectionReason::NotOnline);
    }
    slot.connection_status = if waiting {
        ConnectionStatus::Offline
    } else {
        ConnectionStatus::Reconnecting
    };
    slot.current_activity = Activity::Idle;

    if state.status == SessionStatus::Active {
        state.status = SessionStatus::Paused;
    }
    Ok(())
}

fn change_activity(
    state: &mut InvestigationState,
    seat: Seat,
    activity: Activity,
) -> Result<(), RejectionReason> {
    let slot = state.participants.get_mut(seat);
    if !slot.is_online() {
        return Err(RejectionReason::NotOnline);
    }
    if slot.current_activity == activity {
        return Err(RejectionReason::ActivityUnchanged);
    }
    slot.current_activity = activity;
    Ok(())
}

fn choose(
    scenario: &Scenario,
    state: &mut InvestigationState,
    payload: &DialogueChoicePayload,
) -> Result<(), RejectionReason> {
    if payload.node_id != state.action_node_id {
        return Err(RejectionReason::StaleNode {
            submitted: payload.node_id.clone(),
            current: state.action_node_id.clone(),
        });
    }
    let node = scenario
        .node(&payload.node_id)
        .ok_or_else(|| RejectionReason::UnknownNode(payload.node_id.clone()))?;
    let choice = node
        .choice(&payload.choice_id)
        .ok_or_else(|| RejectionReason::UnknownChoice(payload.choice_id.clone()))?;
    if !choice.requires_flags.iter().all(|flag| state.has_flag(flag)) {
        return Err(RejectionReason::ChoiceUnavailable(choice.id.clone()));
    }

    state.action_node_id.clone_from(&choice.next_node);
    for flag in &choice.sets_flags {
        state.set_flag(flag);
    }
    Ok(())
}

fn interact(
    scenario: &Scenario,
    state: &mut InvestigationState,
    payload: &ItemInteractionPayload,
    timestamp: i64,
) -> Result<(), RejectionReason> {
    let unknown = || RejectionReason::UnknownItem(payload.item_id.clone());
    let definition = scenario.item(&payload.item_id).ok_or_else(unknown)?;
    let from = state.item(&payload.item_id).ok_or_else(unknown)?.status;
    let illegal = |item_id: &str, from: ItemStatus| RejectionReason::IllegalItemTransition {
        item_id: item_id.to_string(),
        from: from.as_str(),
        action: payload.action.as_str(),
    };

    let to = match (payload.action, from) {
        (ItemAction::Inspect, ItemStatus::Visible) => ItemStatus::Visible,
        (ItemAction::Inspect, ItemStatus::Held) => ItemStatus::Analyzed,
        (ItemAction::PickUp, ItemStatus::Visible) => ItemStatus::Held,
        (ItemAction::Combine, ItemStatus::Held) => {
            let target_id = payload
                .target_id
                .as_deref()
                .ok_or(RejectionReason::MissingCombineTarget)?;
            if target_id == payload.item_id {
                return Err(illegal(target_id, from));
            }
            let target = state
                .item(target_id)
                .ok_or_else(|| RejectionReason::UnknownItem(target_id.to_string()))?;
            if target.status == ItemStatus::Locked {
                return Err(illegal(target_id, target.status));
            }
            ItemStatus::Used
        }
        (_, from) => return Err(illegal(&payload.item_id, from)),
    };

    if let Some(item) = state.item_mut(&payload.item_id) {
        item.status = to;
        if payload.action == ItemAction::PickUp {
            item.acquired_at = Some(timestamp);
        }
    }
    if let Some(rule) = definition.rule(payload.action) {
        for flag in &rule.sets_flags {
            state.set_flag(flag);
        }
    }
    Ok(())
}

/// Reveal locked items whose unlock condition now holds.
fn unlock_items(scenario: &Scenario, state: &mut InvestigationState) {
    let unlocked: Vec<(String, String)> = scenario
        .items()
        .filter_map(|definition| {
            let condition = definition.unlock.as_ref()?;
            let item = state.item(&definition.id)?;
            let holds = match condition {
                UnlockCondition::NodeReached { node_id } => state.action_node_id == *node_id,
                UnlockCondition::FlagSet { flag } => state.has_flag(flag),
            };
            (item.status == ItemStatus::Locked && holds)
                .then(|| (definition.id.clone(), condition.label().to_string()))
        })
        .collect();

    for (item_id, label) in unlocked {
        if let Some(item) = state.item_mut(&item_id) {
            item.status = ItemStatus::Visible;
            item.unlocked_by = Some(label);
        }
    }
}

fn terminal_check(
    scenario: &Scenario,
    state: &InvestigationState,
    raw_stress: f64,
) -> Option<(Outcome, GameOverReason)> {
    let thresholds = scenario.terminal_thresholds();
    if raw_stress > 1.0 {
        return Some((Outcome::Failure, GameOverReason::StressOverload));
    }
    if thresholds
        .trust_floor
        .is_some_and(|floor| state.metrics.trust < floor)
    {
        return Some((Outcome::Failure, GameOverReason::TrustCollapse));
    }
    if thresholds
        .compliance_floor
        .is_some_and(|floor| state.metrics.compliance < floor)
    {
        return Some((Outcome::Failure, GameOverReason::ComplianceCollapse));
    }
    match scenario.node(&state.action_node_id)?.outcome? {
        Outcome::Success => Some((Outcome::Success, GameOverReason::ScenarioComplete)),
        Outcome::Failure => Some((Outcome::Failure, GameOverReason::ScenarioFailure)),
    }
}

fn final_metrics(metrics: &Metrics) -> FinalMetrics {
    FinalMetrics {
        trust: metrics.trust,
        stress: metrics.stress,
        compliance: metrics.compliance,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::model::event::TargetMetric;
    use crate::test_support::{self as support, DOCTOR, PATIENT};
    use common::types::SessionId;

    fn apply(scenario: &Scenario, state: &InvestigationState, event: &AuthorizedEvent) -> InvestigationState {
        reduce(scenario, state, event).unwrap().state
    }

    #[test]
    fn test_initialize_builds_waiting_state() {
        let scenario = support::first_session();
        let session_id = SessionId::new();

        let state = initialize(&scenario, &support::init(session_id)).unwrap();

        assert_eq!(state.sequence_id, 0);
        assert_eq!(state.status, SessionStatus::Waiting);
        assert_eq!(state.action_node_id, "N1");
        assert_eq!(state.metrics.stress, 0.95);
        assert_eq!(state.item("item_teddy_bear").unwrap().status, ItemStatus::Visible);
        assert_eq!(state.item("item_diary").unwrap().status, ItemStatus::Locked);
        assert!(state.participants.patient.user_id.is_none());
    }

    #[test]
    fn test_initialize_requires_system_role() {
        let scenario = support::first_session();
        let mut init = support::init(SessionId::new());
        init.role = Role::Patient;

        assert!(matches!(
            initialize(&scenario, &init),
            Err(RejectionReason::WrongRole { .. })
        ));
    }

    #[test]
    fn test_both_joins_activate_session() {
        let scenario = support::first_session();
        let session_id = SessionId::new();
        let state = initialize(&scenario, &support::init(session_id)).unwrap();

        let state = apply(&scenario, &state, &support::join(session_id, Seat::Patient));
        assert_eq!(state.status, SessionStatus::Waiting);

        let state = apply(&scenario, &state, &support::join(session_id, Seat::Doctor));
        assert_eq!(state.status, SessionStatus::Active);
        assert_eq!(state.participants.patient.user_id.as_deref(), Some(PATIENT));
        assert_eq!(state.participants.doctor.user_id.as_deref(), Some(DOCTOR));
    }

    #[test]
    fn test_dialogue_choice_moves_node_and_sets_flags() {
        let (scenario, state) = support::active_state();
        let session_id = state.session_id;

        let reduction = reduce(&scenario, &state, &support::choice(session_id, "N1", "C1")).unwrap();

        assert_eq!(reduction.state.action_node_id, "N2");
        assert!(reduction.state.has_flag("OPENED_UP"));
        assert_eq!(reduction.state.sequence_id, state.sequence_id);
        assert!(reduction.game_over.is_none());
        // Reaching N2 reveals the diary.
        let diary = reduction.state.item("item_diary").unwrap();
        assert_eq!(diary.status, ItemStatus::Visible);
        assert_eq!(diary.unlocked_by.as_deref(), Some("N2"));
    }

    #[test]
    fn test_stress_overload_ends_session() {
        let (scenario, state) = support::active_state();
        let session_id = state.session_id;

        let reduction = reduce(
            &scenario,
            &state,
            &support::intervention(session_id, "CONFRONTATION", 9, TargetMetric::Stress),
        )
        .unwrap();

        let game_over = reduction.game_over.unwrap();
        assert_eq!(game_over.outcome, Outcome::Failure);
        assert_eq!(game_over.reason, GameOverReason::StressOverload);
        assert_eq!(reduction.state.status, SessionStatus::Terminated);
        assert_eq!(reduction.state.metrics.stress, 1.0);
    }

    #[test]
    fn test_terminal_state_absorbs_everything() {
        let (scenario, state) = support::active_state();
        let session_id = state.session_id;
        let ended = apply(
            &scenario,
            &state,
            &support::surrender(session_id),
        );
        assert_eq!(ended.status, SessionStatus::Terminated);

        for event in [
            support::choice(session_id, "N1", "C1"),
            support::intervention(session_id, "BREATHING_EXERCISE", 1, TargetMetric::Stress),
            support::terminate(session_id),
            support::lost(session_id, Seat::Doctor),
        ] {
            assert_eq!(
                reduce(&scenario, &ended, &event).unwrap_err(),
                RejectionReason::SessionTerminal
            );
        }
    }

    #[test]
    fn test_session_mismatch_checked_first() {
        let (scenario, state) = support::active_state();
        let other = support::choice(SessionId::new(), "N1", "C1");
        assert_eq!(
            reduce(&scenario, &state, &other).unwrap_err(),
            RejectionReason::SessionMismatch
        );
    }

    #[test]
    fn test_role_restrictions() {
        let (scenario, state) = support::active_state();
        let session_id = state.session_id;

        let mut by_patient =
            support::intervention(session_id, "CONFRONTATION", 2, TargetMetric::Stress);
        by_patient.role = Role::Patient;
        assert!(matches!(
            reduce(&scenario, &state, &by_patient).unwrap_err(),
            RejectionReason::WrongRole {
                event_type: "INTERVENTION_TRIGGERED",
                role: "PATIENT"
            }
        ));

        let mut by_doctor = support::choice(session_id, "N1", "C1");
        by_doctor.role = Role::Doctor;
        assert!(matches!(
            reduce(&scenario, &state, &by_doctor).unwrap_err(),
            RejectionReason::WrongRole { .. }
        ));

        let mut lost_by_patient = support::lost(session_id, Seat::Doctor);
        lost_by_patient.role = Role::Patient;
        assert!(matches!(
            reduce(&scenario, &state, &lost_by_patient).unwrap_err(),
            RejectionReason::WrongRole { .. }
        ));
    }

    #[test]
    fn test_game_actions_rejected_while_waiting() {
        let scenario = support::first_session();
        let session_id = SessionId::new();
        let state = initialize(&scenario, &support::init(session_id)).unwrap();

        assert_eq!(
            reduce(&scenario, &state, &support::choice(session_id, "N1", "C1")).unwrap_err(),
            RejectionReason::IllegalForStatus {
                event_type: "DIALOGUE_CHOICE",
                status: "WAITING"
            }
        );
    }

    #[test]
    fn test_engine_events_and_reinit_rejected() {
        let (scenario, state) = support::active_state();
        let session_id = state.session_id;

        assert_eq!(
            reduce(&scenario, &state, &support::init(session_id)).unwrap_err(),
            RejectionReason::AlreadyInitialized
        );
        assert_eq!(
            reduce(&scenario, &state, &support::forged_game_over(session_id)).unwrap_err(),
            RejectionReason::EngineOriginated
        );
    }

    #[test]
    fn test_stale_node_and_unknown_choice() {
        let (scenario, state) = support::active_state();
        let session_id = state.session_id;

        assert!(matches!(
            reduce(&scenario, &state, &support::choice(session_id, "N2", "C3")).unwrap_err(),
            RejectionReason::StaleNode { .. }
        ));
        assert_eq!(
            reduce(&scenario, &state, &support::choice(session_id, "N1", "C9")).unwrap_err(),
            RejectionReason::UnknownChoice("C9".to_string())
        );
    }

    #[test]
    fn test_choice_requires_flags() {
        let (scenario, state) = support::active_state();
        let session_id = state.session_id;
        let at_n2 = apply(&scenario, &state, &support::choice(session_id, "N1", "C1"));

        assert_eq!(
            reduce(&scenario, &at_n2, &support::choice(session_id, "N2", "C3")).unwrap_err(),
            RejectionReason::ChoiceUnavailable("C3".to_string())
        );

        let with_diary = apply(
            &scenario,
            &at_n2,
            &support::item(session_id, "item_diary", ItemAction::PickUp, None),
        );
        assert!(with_diary.has_flag("FOUND_DIARY"));
        assert_eq!(
            with_diary.item("item_key").unwrap().unlocked_by.as_deref(),
            Some("FOUND_DIARY")
        );

        let reduction =
            reduce(&scenario, &with_diary, &support::choice(session_id, "N2", "C3")).unwrap();
        assert_eq!(reduction.state.status, SessionStatus::Completed);
        let game_over = reduction.game_over.unwrap();
        assert_eq!(game_over.outcome, Outcome::Success);
        assert_eq!(game_over.reason, GameOverReason::ScenarioComplete);
    }

    #[test]
    fn test_item_lifecycle() {
        let (scenario, state) = support::active_state();
        let session_id = state.session_id;
        let bear = "item_teddy_bear";

        let inspected = apply(
            &scenario,
            &state,
            &support::item(session_id, bear, ItemAction::Inspect, None),
        );
        assert_eq!(inspected.item(bear).unwrap().status, ItemStatus::Visible);
        assert!(inspected.metrics.stress < state.metrics.stress);

        let pickup = support::item(session_id, bear, ItemAction::PickUp, None);
        let held = apply(&scenario, &inspected, &pickup);
        let item = held.item(bear).unwrap();
        assert_eq!(item.status, ItemStatus::Held);
        assert_eq!(item.acquired_at, Some(pickup.event.timestamp));

        // Forward-only: cannot pick up twice.
        assert!(matches!(
            reduce(&scenario, &held, &pickup).unwrap_err(),
            RejectionReason::IllegalItemTransition { from: "HELD", .. }
        ));

        let analyzed = apply(
            &scenario,
            &held,
            &support::item(session_id, bear, ItemAction::Inspect, None),
        );
        assert_eq!(analyzed.item(bear).unwrap().status, ItemStatus::Analyzed);
    }

    #[test]
    fn test_locked_items_cannot_be_touched() {
        let (scenario, state) = support::active_state();
        let session_id = state.session_id;

        assert!(matches!(
            reduce(
                &scenario,
                &state,
                &support::item(session_id, "item_diary", ItemAction::PickUp, None)
            )
            .unwrap_err(),
            RejectionReason::IllegalItemTransition { from: "LOCKED", .. }
        ));
        assert_eq!(
            reduce(
                &scenario,
                &state,
                &support::item(session_id, "item_unicorn", ItemAction::Inspect, None)
            )
            .unwrap_err(),
            RejectionReason::UnknownItem("item_unicorn".to_string())
        );
    }

    #[test]
    fn test_combine_requires_held_item_and_visible_target() {
        let (scenario, state) = support::active_state();
        let session_id = state.session_id;
        let at_n2 = apply(&scenario, &state, &support::choice(session_id, "N1", "C1"));
        let with_diary = apply(
            &scenario,
            &at_n2,
            &support::item(session_id, "item_diary", ItemAction::PickUp, None),
        );
        let with_key = apply(
            &scenario,
            &with_diary,
            &support::item(session_id, "item_key", ItemAction::PickUp, None),
        );

        assert_eq!(
            reduce(
                &scenario,
                &with_key,
                &support::item(session_id, "item_key", ItemAction::Combine, None)
            )
            .unwrap_err(),
            RejectionReason::MissingCombineTarget
        );
        assert!(reduce(
            &scenario,
            &with_key,
            &support::item(
                session_id,
                "item_key",
                ItemAction::Combine,
                Some("memory_of_home")
            )
        )
        .is_err());

        let combined = apply(
            &scenario,
            &with_key,
            &support::item(session_id, "item_key", ItemAction::Combine, Some("item_diary")),
        );
        assert_eq!(combined.item("item_key").unwrap().status, ItemStatus::Used);
        assert_eq!(combined.item("item_diary").unwrap().status, ItemStatus::Held);
        assert!(combined.has_flag("BOX_OPENED"));
        assert!((combined.metrics.compliance - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_connection_lost_pauses_and_rejoin_resumes() {
        let (scenario, state) = support::active_state();
        let session_id = state.session_id;

        let paused = apply(&scenario, &state, &support::lost(session_id, Seat::Patient));
        assert_eq!(paused.status, SessionStatus::Paused);
        assert_eq!(
            paused.participants.patient.connection_status,
            ConnectionStatus::Reconnecting
        );

        assert_eq!(
            reduce(&scenario, &paused, &support::lost(session_id, Seat::Patient)).unwrap_err(),
            RejectionReason::NotOnline
        );
        assert!(matches!(
            reduce(&scenario, &paused, &support::choice(session_id, "N1", "C1")).unwrap_err(),
            RejectionReason::IllegalForStatus { status: "PAUSED", .. }
        ));

        let resumed = apply(&scenario, &paused, &support::join(session_id, Seat::Patient));
        assert_eq!(resumed.status, SessionStatus::Active);
    }

    #[test]
    fn test_seat_cannot_be_taken_by_another_user() {
        let (scenario, state) = support::active_state();
        let session_id = state.session_id;
        let paused = apply(&scenario, &state, &support::lost(session_id, Seat::Patient));

        let mut intruder = support::join(session_id, Seat::Patient);
        intruder.event.emitter_id = "someone-else".to_string();
        assert_eq!(
            reduce(&scenario, &paused, &intruder).unwrap_err(),
            RejectionReason::SeatTaken
        );

        assert_eq!(
            reduce(&scenario, &state, &support::join(session_id, Seat::Doctor)).unwrap_err(),
            RejectionReason::AlreadyOnline
        );
    }

    #[test]
    fn test_activity_changes() {
        let (scenario, state) = support::active_state();
        let session_id = state.session_id;

        let typing = apply(
            &scenario,
            &state,
            &support::activity(session_id, Seat::Doctor, Activity::Typing),
        );
        assert_eq!(typing.participants.doctor.current_activity, Activity::Typing);

        assert_eq!(
            reduce(
                &scenario,
                &typing,
                &support::activity(session_id, Seat::Doctor, Activity::Typing)
            )
            .unwrap_err(),
            RejectionReason::ActivityUnchanged
        );
    }

    #[test]
    fn test_admin_termination_reason() {
        let (scenario, state) = support::active_state();
        let reduction = reduce(&scenario, &state, &support::terminate(state.session_id)).unwrap();

        assert_eq!(reduction.state.status, SessionStatus::Terminated);
        assert_eq!(
            reduction.game_over.unwrap().reason,
            GameOverReason::AdminTerminated
        );
    }

    #[test]
    fn test_trust_floor_ends_session() {
        let library = crate::engine::scenario::fixture_library();
        let scenario = library.get("calm-intake").unwrap();
        let session_id = SessionId::new();
        let mut init = support::init(session_id);
        init.event.kind = EventKind::SessionInit(crate::model::event::SessionInitPayload {
            scenario_id: "calm-intake".to_string(),
        });
        let mut state = initialize(&scenario, &init).unwrap();
        state = apply(&scenario, &state, &support::join(session_id, Seat::Patient));
        state = apply(&scenario, &state, &support::join(session_id, Seat::Doctor));

        // Trust 0.6 - 0.1 * 6 = 0.0, below the 0.1 floor.
        let reduction = reduce(
            &scenario,
            &state,
            &support::intervention(session_id, "CONFRONTATION", 6, TargetMetric::Trust),
        )
        .unwrap();

        assert_eq!(
            reduction.game_over.unwrap().reason,
            GameOverReason::TrustCollapse
        );
    }

    #[test]
    fn test_rejection_leaves_input_untouched() {
        let (scenario, state) = support::active_state();
        let before = state.clone();

        let _ = reduce(
            &scenario,
            &state,
            &support::intervention(state.session_id, "CONFRONTATION", 42, TargetMetric::Stress),
        );

        assert_eq!(state, before);
    }
}
