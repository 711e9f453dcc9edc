//! Sequencer.
//!
//! Stamps reduced states with `sequenceId = previous + 1`, a timestamp and
//! the participants' acknowledged positions, and keeps the most recent
//! transitions in a bounded ring buffer for reconnection catch-up.
//!
//! Retention: with capacity `C` the buffer holds sequences
//! `latest - C + 1 ..= latest`. A client that last saw `N` can be replayed
//! only if `N` itself is still retained; anything older gets a resync.

use crate::engine::reducer::Reduction;
use crate::errors::SyncError;
use crate::model::event::{
    AuthorizedEvent, EventKind, GameEvent, GameOverPayload, MetricsDiff, Role, StateUpdatePayload,
    ENGINE_EMITTER,
};
use crate::model::state::{InvestigationState, Seat};
use common::types::SessionId;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;

/// Acknowledged sequence per seat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AckPair {
    pub patient: u64,
    pub doctor: u64,
}

impl AckPair {
    #[must_use]
    pub fn get(&self, seat: Seat) -> u64 {
        match seat {
            Seat::Patient => self.patient,
            Seat::Doctor => self.doctor,
        }
    }

    pub fn set(&mut self, seat: Seat, sequence_id: u64) {
        match seat {
            Seat::Patient => self.patient = sequence_id,
            Seat::Doctor => self.doctor = sequence_id,
        }
    }
}

/// Everything the sequencer writes into a state. Replay re-applies the
/// stored stamp so reproduced states compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    pub sequence_id: u64,
    pub timestamp: i64,
    pub acks: AckPair,
}

impl Stamp {
    /// Read the stamp back out of a stamped state.
    #[must_use]
    pub fn of(state: &InvestigationState) -> Self {
        Self {
            sequence_id: state.sequence_id,
            timestamp: state.last_update_timestamp,
            acks: AckPair {
                patient: state.participants.patient.last_ack_sequence_id,
                doctor: state.participants.doctor.last_ack_sequence_id,
            },
        }
    }

    pub fn apply(&self, state: &mut InvestigationState) {
        state.sequence_id = self.sequence_id;
        state.last_update_timestamp = self.timestamp;
        state.participants.patient.last_ack_sequence_id = self.acks.patient;
        state.participants.doctor.last_ack_sequence_id = self.acks.doctor;
    }
}

/// Durable record of one accepted transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredTransition {
    pub session_id: SessionId,
    pub sequence_id: u64,
    pub event: GameEvent,
    pub role: Role,
    pub state: Arc<InvestigationState>,
    pub diff: MetricsDiff,
}

/// One accepted transition and the engine output it produced.
#[derive(Debug, Clone)]
pub struct Transition {
    pub input: AuthorizedEvent,
    pub state: Arc<InvestigationState>,
    pub diff: MetricsDiff,
    /// `STATE_UPDATE` shared by every recipient.
    pub update: Arc<GameEvent>,
    /// `GAME_OVER` when this transition ended the session.
    pub game_over: Option<Arc<GameEvent>>,
}

impl Transition {
    fn new(
        input: AuthorizedEvent,
        previous_sequence_id: u64,
        state: Arc<InvestigationState>,
        diff: MetricsDiff,
        game_over: Option<GameOverPayload>,
    ) -> Self {
        let session_id = state.session_id;
        let update = GameEvent::new(
            session_id,
            ENGINE_EMITTER,
            EventKind::StateUpdate(StateUpdatePayload {
                previous_sequence_id,
                new_sequence_id: state.sequence_id,
                state: Arc::clone(&state),
                diff,
            }),
        );
        let game_over = game_over.map(|payload| {
            Arc::new(GameEvent::new(
                session_id,
                ENGINE_EMITTER,
                EventKind::GameOver(payload),
            ))
        });
        Self {
            input,
            state,
            diff,
            update: Arc::new(update),
            game_over,
        }
    }

    #[must_use]
    pub fn sequence_id(&self) -> u64 {
        self.state.sequence_id
    }

    #[must_use]
    pub fn to_stored(&self) -> StoredTransition {
        StoredTransition {
            session_id: self.state.session_id,
            sequence_id: self.state.sequence_id,
            event: self.input.event.clone(),
            role: self.input.role,
            state: Arc::clone(&self.state),
            diff: self.diff,
        }
    }
}

/// What a reconnecting client needs to get current.
#[derive(Debug, Clone)]
pub enum CatchUp {
    UpToDate,
    /// Transitions after the client's position, oldest first.
    Replay(Vec<Transition>),
    /// Gap not covered by retained history.
    Resync { latest_sequence_id: u64 },
}

#[derive(Debug)]
pub struct Sequencer {
    current: Arc<InvestigationState>,
    history: VecDeque<Transition>,
    capacity: usize,
}

impl Sequencer {
    /// Stamp the genesis state as sequence 0.
    #[must_use]
    pub fn genesis(
        mut state: InvestigationState,
        input: AuthorizedEvent,
        capacity: usize,
        now_ms: i64,
    ) -> (Self, Transition) {
        let capacity = capacity.max(1);
        Stamp {
            sequence_id: 0,
            timestamp: now_ms,
            acks: AckPair::default(),
        }
        .apply(&mut state);

        let state = Arc::new(state);
        let transition = Transition::new(input, 0, Arc::clone(&state), MetricsDiff::default(), None);
        let mut history = VecDeque::with_capacity(capacity);
        history.push_back(transition.clone());

        (
            Self {
                current: state,
                history,
                capacity,
            },
            transition,
        )
    }

    /// Stamp a reduction as the next sequence and retain it.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::Internal` if the sequence space is exhausted.
    pub fn commit(
        &mut self,
        input: AuthorizedEvent,
        reduction: Reduction,
        acks: AckPair,
        now_ms: i64,
    ) -> Result<Transition, SyncError> {
        let previous = self.current.sequence_id;
        let sequence_id = previous
            .checked_add(1)
            .ok_or_else(|| SyncError::Internal("sequence space exhausted".to_string()))?;

        let mut state = reduction.state;
        Stamp {
            sequence_id,
            // Wall clocks can step backwards; stamps never do.
            timestamp: now_ms.max(self.current.last_update_timestamp),
            acks,
        }
        .apply(&mut state);

        let state = Arc::new(state);
        let transition = Transition::new(
            input,
            previous,
            Arc::clone(&state),
            reduction.diff,
            reduction.game_over,
        );

        if self.history.len() >= self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(transition.clone());
        self.current = state;
        Ok(transition)
    }

    #[must_use]
    pub fn current(&self) -> &Arc<InvestigationState> {
        &self.current
    }

    #[must_use]
    pub fn latest_sequence_id(&self) -> u64 {
        self.current.sequence_id
    }

    /// Oldest sequence still in the ring buffer.
    #[must_use]
    pub fn oldest_retained(&self) -> u64 {
        self.history
            .front()
            .map_or(self.current.sequence_id, Transition::sequence_id)
    }

    /// The transition that produced the current state.
    #[must_use]
    pub fn latest_transition(&self) -> Option<&Transition> {
        self.history.back()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Plan catch-up for a client whose last applied sequence is `last_known`.
    #[must_use]
    pub fn catch_up(&self, last_known: u64) -> CatchUp {
        let latest = self.latest_sequence_id();
        if last_known == latest {
            return CatchUp::UpToDate;
        }
        if last_known > latest || last_known < self.oldest_retained() {
            return CatchUp::Resync {
                latest_sequence_id: latest,
            };
        }
        CatchUp::Replay(
            self.history
                .iter()
                .filter(|transition| transition.sequence_id() > last_known)
                .cloned()
                .collect(),
        )
    }
}
