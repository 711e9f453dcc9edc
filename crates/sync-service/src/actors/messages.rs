//! Message types for actor communication.
//!
//! Actors talk through `tokio::sync::mpsc` mailboxes; request-reply uses a
//! `tokio::sync::oneshot` `respond_to` channel.

use crate::actors::session::SessionActorHandle;
use crate::engine::sequencer::AckPair;
use crate::errors::SyncError;
use crate::model::event::{AuthorizedEvent, GameEvent, Role};
use crate::model::frames::ServerFrame;
use crate::model::state::{InvestigationState, Seat};
use crate::transport::FrameSink;
use common::types::{ConnectionId, EventId, SessionId};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Messages sent to `SessionManagerActor`.
#[derive(Debug)]
pub enum ManagerMessage {
    /// Create a session from its `SESSION_INIT`.
    CreateSession {
        init: AuthorizedEvent,
        respond_to: oneshot::Sender<Result<Accepted, SyncError>>,
    },

    /// Look up the actor for a live session.
    GetSession {
        session_id: SessionId,
        respond_to: oneshot::Sender<Result<SessionActorHandle, SyncError>>,
    },

    /// Sent by a session actor once it reaches `CLOSED`.
    SessionClosed { session_id: SessionId },

    GetStatus {
        respond_to: oneshot::Sender<ManagerStatus>,
    },

    /// Stop accepting sessions, let live ones wind down, flush durable
    /// writers.
    Shutdown {
        deadline: Duration,
        respond_to: oneshot::Sender<Result<(), SyncError>>,
    },
}

/// Messages sent to `SessionActor`. All of a session's input is serialized
/// through this one mailbox.
#[derive(Debug)]
pub enum SessionMessage {
    /// An authenticated event from a participant or the system.
    Submit {
        input: AuthorizedEvent,
        respond_to: oneshot::Sender<Result<Accepted, SyncError>>,
    },

    /// Attach a participant connection (fresh join or reconnect).
    Attach {
        request: AttachRequest,
        respond_to: oneshot::Sender<Result<AttachOutcome, SyncError>>,
    },

    /// The client has applied everything up to `sequence_id`.
    Ack {
        connection_id: ConnectionId,
        sequence_id: u64,
    },

    /// Send the full current state to one connection.
    RequestSnapshot { connection_id: ConnectionId },

    /// Answer one connection's own submission. A connection that cannot
    /// take the reply is detached like a slow broadcast consumer.
    Reply {
        connection_id: ConnectionId,
        frame: ServerFrame,
    },

    /// The transport lost the connection, or its outbound sink failed.
    ConnectionClosed { connection_id: ConnectionId },

    GetState {
        respond_to: oneshot::Sender<SessionView>,
    },
}

/// Outbound mailbox entries for `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    Send { frame: ServerFrame },
    /// Flush what is queued, close the sink and stop.
    Close,
}

// ----------------------------------------------------------------------------
// Supporting Types
// ----------------------------------------------------------------------------

/// Reply to an accepted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accepted {
    pub event_id: EventId,
    pub sequence_id: u64,
}

impl Accepted {
    /// Frame sent back to the submitting connection.
    #[must_use]
    pub fn frame(&self) -> ServerFrame {
        ServerFrame::Accepted {
            event_id: self.event_id,
            sequence_id: self.sequence_id,
        }
    }
}

/// A participant connection asking to join or rejoin a session.
pub struct AttachRequest {
    /// Authenticated user id; becomes the `emitterId` of its events.
    pub user_id: String,
    pub role: Role,
    /// Last sequence the client applied. `None` requests a full snapshot.
    pub resume_from: Option<u64>,
    /// Outbound half of the transport connection.
    pub sink: Box<dyn FrameSink>,
}

impl fmt::Debug for AttachRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttachRequest")
            .field("user_id", &self.user_id)
            .field("role", &self.role)
            .field("resume_from", &self.resume_from)
            .finish_non_exhaustive()
    }
}

/// Result of a successful attach.
#[derive(Debug, Clone)]
pub struct AttachOutcome {
    pub connection_id: ConnectionId,
    pub seat: Seat,
}

/// Session actor lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    /// Genesis not yet persisted.
    Initializing,
    Running,
    /// Terminal transition broadcast; waiting for final acks.
    Draining,
    Closed,
}

/// Point-in-time view of a live session.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub session_id: SessionId,
    pub phase: SessionPhase,
    pub state: Arc<InvestigationState>,
    /// Latest acknowledged sequence per seat. Folded into the state's
    /// `lastAckSequenceId` fields at the next transition.
    pub acks: AckPair,
    pub connection_count: usize,
    pub oldest_retained_sequence_id: u64,
    /// The durable log is failing and the writer is retrying.
    pub durability_degraded: bool,
    /// Transitions were shed; the durable history stops short of `state`.
    pub history_truncated: bool,
}

/// Current manager status.
#[derive(Debug, Clone, Copy)]
pub struct ManagerStatus {
    pub session_count: usize,
    pub connection_count: usize,
    pub is_draining: bool,
    pub mailbox_depth: usize,
}

/// A session's full history, read back from the durable log and verified
/// by replay.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionHistory {
    pub session_id: SessionId,
    pub events: Vec<GameEvent>,
    pub final_state: InvestigationState,
}
