//! Per-session connection registry.
//!
//! Owned by one session actor, so the registry's maps are partitioned by
//! session with no cross-session locking. Holds up to one connection per
//! seat and each seat's acknowledged sequence.

use crate::engine::sequencer::AckPair;
use crate::model::frames::ServerFrame;
use crate::model::state::Seat;
use crate::observability::metrics::record_outbound_dropped;

use super::connection::{ConnectionHandle, DeliveryError};
use super::metrics::ActorMetrics;

use common::types::{ConnectionId, SessionId};
use std::sync::Arc;
use tracing::{debug, warn};

/// A connection the registry gave up on while delivering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DroppedConnection {
    pub connection_id: ConnectionId,
    pub seat: Seat,
    pub reason: DeliveryError,
}

#[derive(Debug)]
pub struct ConnectionRegistry {
    session_id: SessionId,
    patient: Option<ConnectionHandle>,
    doctor: Option<ConnectionHandle>,
    acks: AckPair,
    metrics: Arc<ActorMetrics>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new(session_id: SessionId, metrics: Arc<ActorMetrics>) -> Self {
        Self {
            session_id,
            patient: None,
            doctor: None,
            acks: AckPair::default(),
            metrics,
        }
    }

    fn slot(&self, seat: Seat) -> Option<&ConnectionHandle> {
        match seat {
            Seat::Patient => self.patient.as_ref(),
            Seat::Doctor => self.doctor.as_ref(),
        }
    }

    fn slot_mut(&mut self, seat: Seat) -> &mut Option<ConnectionHandle> {
        match seat {
            Seat::Patient => &mut self.patient,
            Seat::Doctor => &mut self.doctor,
        }
    }

    fn connections(&self) -> impl Iterator<Item = &ConnectionHandle> {
        self.patient.iter().chain(self.doctor.iter())
    }

    /// Install `handle` for its seat. A connection already holding the seat
    /// is closed and returned.
    pub fn attach(&mut self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let seat = handle.seat();
        let replaced = self.slot_mut(seat).replace(handle);
        match &replaced {
            Some(old) => {
                debug!(
                    target: "sync.actor.session",
                    session_id = %self.session_id,
                    connection_id = %old.connection_id(),
                    seat = seat.as_str(),
                    "Connection replaced by a newer one for the same seat"
                );
                old.close();
            }
            None => self.metrics.connection_attached(),
        }
        replaced
    }

    /// Remove a connection. Unknown or already replaced ids are a no-op.
    pub fn detach(&mut self, connection_id: ConnectionId) -> Option<Seat> {
        let seat = self.seat_of(connection_id)?;
        if let Some(handle) = self.slot_mut(seat).take() {
            handle.close();
            self.metrics.connection_detached();
        }
        Some(seat)
    }

    #[must_use]
    pub fn seat_of(&self, connection_id: ConnectionId) -> Option<Seat> {
        self.connections()
            .find(|handle| handle.connection_id() == connection_id)
            .map(ConnectionHandle::seat)
    }

    #[must_use]
    pub fn is_attached(&self, seat: Seat) -> bool {
        self.slot(seat).is_some()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.connections().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn acks(&self) -> AckPair {
        self.acks
    }

    /// Record an ack from `seat`. Stale, duplicate and future acks are
    /// ignored. Returns whether the seat's position advanced.
    pub fn ack(&mut self, seat: Seat, sequence_id: u64, latest_sequence_id: u64) -> bool {
        if sequence_id > latest_sequence_id || sequence_id <= self.acks.get(seat) {
            return false;
        }
        self.acks.set(seat, sequence_id);
        true
    }

    /// Deliver `frames` in order to every attached connection.
    ///
    /// Delivery is independent per connection. A connection whose queue is
    /// full or closed is detached and returned; the caller reports it as
    /// lost.
    pub fn broadcast(&mut self, frames: &[ServerFrame]) -> Vec<DroppedConnection> {
        let mut dropped = Vec::new();
        for seat in [Seat::Patient, Seat::Doctor] {
            if let Some(failure) = self.deliver_all(seat, frames) {
                dropped.push(failure);
            }
        }
        dropped
    }

    /// Deliver `frames` to one connection only.
    pub fn send_to(
        &mut self,
        connection_id: ConnectionId,
        frames: &[ServerFrame],
    ) -> Option<DroppedConnection> {
        let seat = self.seat_of(connection_id)?;
        self.deliver_all(seat, frames)
    }

    fn deliver_all(&mut self, seat: Seat, frames: &[ServerFrame]) -> Option<DroppedConnection> {
        let handle = self.slot(seat)?;
        let failure = frames
            .iter()
            .find_map(|frame| handle.try_deliver(frame.clone()).err())?;
        let connection_id = handle.connection_id();

        if failure == DeliveryError::Full {
            record_outbound_dropped();
        }
        warn!(
            target: "sync.actor.session",
            session_id = %self.session_id,
            connection_id = %connection_id,
            seat = seat.as_str(),
            reason = ?failure,
            "Dropping connection that cannot take more frames"
        );
        self.detach(connection_id);
        Some(DroppedConnection {
            connection_id,
            seat,
            reason: failure,
        })
    }

    /// Close every connection, flushing what is already queued.
    pub fn close_all(&mut self) {
        for seat in [Seat::Patient, Seat::Doctor] {
            if let Some(handle) = self.slot_mut(seat).take() {
                handle.close();
                self.metrics.connection_detached();
            }
        }
    }
}
