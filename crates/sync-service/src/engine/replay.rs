//! Deterministic replay of stored transitions.
//!
//! Replaying a session's durable log from sequence 0 must reproduce every
//! stored state exactly: the genesis is rebuilt from `SESSION_INIT`, each
//! later event is re-reduced, and the stored stamp is re-applied before the
//! comparison.

use crate::engine::reducer::{initialize, reduce};
use crate::engine::scenario::{Scenario, ScenarioLibrary};
use crate::engine::sequencer::{Stamp, StoredTransition};
use crate::errors::SyncError;
use crate::model::event::{AuthorizedEvent, EventKind};
use crate::model::state::InvestigationState;

/// Replay `transitions` (ordered, starting at sequence 0) and return the
/// final state.
///
/// # Errors
///
/// - `SyncError::ReplayDivergence` if a reduction is rejected or produces a
///   state that differs from the stored one
/// - `SyncError::DurableLog` if the log is empty, does not start at 0 or
///   skips a sequence
pub fn replay(
    scenario: &Scenario,
    transitions: &[StoredTransition],
) -> Result<InvestigationState, SyncError> {
    let mut entries = transitions.iter();
    let genesis = entries
        .next()
        .ok_or_else(|| SyncError::DurableLog("history is empty".to_string()))?;
    if genesis.sequence_id != 0 {
        return Err(SyncError::DurableLog(format!(
            "history starts at sequence {}",
            genesis.sequence_id
        )));
    }

    let mut state = initialize(scenario, &input_of(genesis))
        .map_err(|_| SyncError::ReplayDivergence { sequence_id: 0 })?;
    Stamp::of(&genesis.state).apply(&mut state);
    verify(&state, genesis)?;

    for stored in entries {
        let expected = state.sequence_id.saturating_add(1);
        if stored.sequence_id != expected {
            return Err(SyncError::DurableLog(format!(
                "expected sequence {expected}, found {}",
                stored.sequence_id
            )));
        }

        let mut next = reduce(scenario, &state, &input_of(stored))
            .map_err(|_| SyncError::ReplayDivergence {
                sequence_id: stored.sequence_id,
            })?
            .state;
        Stamp::of(&stored.state).apply(&mut next);
        verify(&next, stored)?;
        state = next;
    }

    Ok(state)
}

/// Replay a full session history, resolving the scenario named by its
/// `SESSION_INIT`.
///
/// # Errors
///
/// As [`replay`], plus `SyncError::DurableLog` when the genesis is not a
/// `SESSION_INIT` for a scenario in `library`.
pub fn replay_history(
    library: &ScenarioLibrary,
    transitions: &[StoredTransition],
) -> Result<InvestigationState, SyncError> {
    let scenario_id = match transitions.first().map(|genesis| &genesis.event.kind) {
        Some(EventKind::SessionInit(payload)) => &payload.scenario_id,
        Some(_) => {
            return Err(SyncError::DurableLog(
                "history does not start with SESSION_INIT".to_string(),
            ))
        }
        None => return Err(SyncError::DurableLog("history is empty".to_string())),
    };
    let scenario = library
        .get(scenario_id)
        .ok_or_else(|| SyncError::DurableLog(format!("unknown scenario {scenario_id}")))?;
    replay(&scenario, transitions)
}

fn input_of(stored: &StoredTransition) -> AuthorizedEvent {
    AuthorizedEvent::new(stored.event.clone(), stored.role)
}

fn verify(state: &InvestigationState, stored: &StoredTransition) -> Result<(), SyncError> {
    if *state == *stored.state {
        Ok(())
    } else {
        Err(SyncError::ReplayDivergence {
            sequence_id: stored.sequence_id,
        })
    }
}
