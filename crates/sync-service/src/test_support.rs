//! Event builders and frame sinks shared by the unit tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::engine::reducer::{initialize, reduce};
use crate::engine::scenario::{fixture_library, Scenario};
use crate::errors::SyncError;
use crate::model::event::{
    ActivityChangedPayload, AuthorizedEvent, ConnectionLostPayload, DialogueChoicePayload,
    EventKind, FinalMetrics, GameEvent, GameOverPayload, GameOverReason, InterventionPayload,
    ItemAction, ItemInteractionPayload, Outcome, PlayerJoinedPayload, Role, SessionInitPayload,
    SessionTerminatedPayload, SurrenderPayload, TargetMetric, SYSTEM_EMITTER,
};
use crate::model::frames::ServerFrame;
use crate::model::state::{Activity, InvestigationState, Seat};
use crate::transport::FrameSink;
use async_trait::async_trait;
use common::types::SessionId;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};

pub(crate) const PATIENT: &str = "patient-1";
pub(crate) const DOCTOR: &str = "doctor-1";
pub(crate) const SCENARIO: &str = "first-session";

pub(crate) fn first_session() -> Arc<Scenario> {
    fixture_library().get(SCENARIO).unwrap()
}

fn user_for(seat: Seat) -> &'static str {
    match seat {
        Seat::Patient => PATIENT,
        Seat::Doctor => DOCTOR,
    }
}

fn event(session_id: SessionId, emitter: &str, role: Role, kind: EventKind) -> AuthorizedEvent {
    AuthorizedEvent::new(GameEvent::new(session_id, emitter, kind), role)
}

pub(crate) fn init(session_id: SessionId) -> AuthorizedEvent {
    event(
        session_id,
        SYSTEM_EMITTER,
        Role::System,
        EventKind::SessionInit(SessionInitPayload {
            scenario_id: SCENARIO.to_string(),
        }),
    )
}

pub(crate) fn join(session_id: SessionId, seat: Seat) -> AuthorizedEvent {
    event(
        session_id,
        user_for(seat),
        seat.into(),
        EventKind::PlayerJoined(PlayerJoinedPayload { seat }),
    )
}

pub(crate) fn lost(session_id: SessionId, seat: Seat) -> AuthorizedEvent {
    event(
        session_id,
        SYSTEM_EMITTER,
        Role::System,
        EventKind::ConnectionLost(ConnectionLostPayload { seat }),
    )
}

pub(crate) fn choice(session_id: SessionId, node: &str, choice: &str) -> AuthorizedEvent {
    event(
        session_id,
        PATIENT,
        Role::Patient,
        EventKind::DialogueChoice(DialogueChoicePayload {
            node_id: node.to_string(),
            choice_id: choice.to_string(),
        }),
    )
}

pub(crate) fn intervention(
    session_id: SessionId,
    technique: &str,
    intensity: u8,
    metric: TargetMetric,
) -> AuthorizedEvent {
    event(
        session_id,
        DOCTOR,
        Role::Doctor,
        EventKind::InterventionTriggered(InterventionPayload {
            technique_id: technique.to_string(),
            intensity,
            target_metric: metric,
        }),
    )
}

pub(crate) fn item(
    session_id: SessionId,
    item_id: &str,
    action: ItemAction,
    target: Option<&str>,
) -> AuthorizedEvent {
    event(
        session_id,
        PATIENT,
        Role::Patient,
        EventKind::ItemInteraction(ItemInteractionPayload {
            item_id: item_id.to_string(),
            action,
            target_id: target.map(str::to_string),
        }),
    )
}

pub(crate) fn activity(session_id: SessionId, seat: Seat, activity: Activity) -> AuthorizedEvent {
    event(
        session_id,
        user_for(seat),
        seat.into(),
        EventKind::ActivityChanged(ActivityChangedPayload { activity }),
    )
}

pub(crate) fn surrender(session_id: SessionId) -> AuthorizedEvent {
    event(
        session_id,
        PATIENT,
        Role::Patient,
        EventKind::SurrenderRequested(SurrenderPayload {
            reason: "too much".to_string(),
        }),
    )
}

pub(crate) fn terminate(session_id: SessionId) -> AuthorizedEvent {
    event(
        session_id,
        SYSTEM_EMITTER,
        Role::System,
        EventKind::SessionTerminated(SessionTerminatedPayload {
            reason: "moderation".to_string(),
        }),
    )
}

pub(crate) fn forged_game_over(session_id: SessionId) -> AuthorizedEvent {
    event(
        session_id,
        PATIENT,
        Role::Patient,
        EventKind::GameOver(GameOverPayload {
            outcome: Outcome::Success,
            reason: GameOverReason::ScenarioComplete,
            final_metrics: FinalMetrics {
                trust: 1.0,
                stress: 0.0,
                compliance: 1.0,
            },
        }),
    )
}

/// Fresh `first-session` state with both participants joined.
pub(crate) fn active_state() -> (Arc<Scenario>, InvestigationState) {
    let scenario = first_session();
    let session_id = SessionId::new();
    let state = initialize(&scenario, &init(session_id)).unwrap();
    let state = reduce(&scenario, &state, &join(session_id, Seat::Patient))
        .unwrap()
        .state;
    let state = reduce(&scenario, &state, &join(session_id, Seat::Doctor))
        .unwrap()
        .state;
    (scenario, state)
}

/// Forwards written frames to a channel. Closing the sink ends the stream.
pub(crate) struct RecordingSink {
    frames: Option<mpsc::UnboundedSender<ServerFrame>>,
    gate: Option<oneshot::Receiver<()>>,
}

impl RecordingSink {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<ServerFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = Self {
            frames: Some(tx),
            gate: None,
        };
        (sink, rx)
    }

    /// The first write blocks until the returned gate is sent to or dropped.
    pub(crate) fn gated() -> (
        Self,
        mpsc::UnboundedReceiver<ServerFrame>,
        oneshot::Sender<()>,
    ) {
        let (mut sink, rx) = Self::new();
        let (gate_tx, gate_rx) = oneshot::channel();
        sink.gate = Some(gate_rx);
        (sink, rx, gate_tx)
    }
}

#[async_trait]
impl FrameSink for RecordingSink {
    async fn send(&mut self, frame: ServerFrame) -> Result<(), SyncError> {
        if let Some(gate) = self.gate.take() {
            let _ = gate.await;
        }
        // A test that dropped its receiver does not care about the frames.
        if let Some(frames) = &self.frames {
            let _ = frames.send(frame);
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.frames = None;
    }
}

/// Every write fails, like a socket reset by the peer.
pub(crate) struct FailingSink;

#[async_trait]
impl FrameSink for FailingSink {
    async fn send(&mut self, _frame: ServerFrame) -> Result<(), SyncError> {
        Err(SyncError::Transport("connection reset".to_string()))
    }
}
