//! `ConnectionActor` - per-participant outbound delivery.
//!
//! Each `ConnectionActor`:
//! - Owns the outbound [`FrameSink`] of exactly one participant connection
//! - Drains a bounded queue filled by its session actor with `try_send`, so
//!   a slow socket never blocks the session or the other participant
//! - Reports a failed sink to its session as a closed connection
//!
//! # Lifecycle
//!
//! 1. Spawned by the session actor when a participant attaches
//! 2. Runs until closed by the session, its sink fails, or cancellation
//! 3. `Close` flushes queued frames first; cancellation does not

use crate::errors::SyncError;
use crate::model::frames::ServerFrame;
use crate::model::state::Seat;
use crate::transport::FrameSink;

use super::messages::{ConnectionMessage, SessionMessage};
use super::metrics::{ActorType, MailboxMonitor};

use common::types::{ConnectionId, SessionId};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryError {
    /// Outbound queue at capacity: the client is not keeping up.
    Full,
    /// The actor has stopped.
    Closed,
}

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: ConnectionId,
    seat: Seat,
}

impl ConnectionHandle {
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    #[must_use]
    pub fn seat(&self) -> Seat {
        self.seat
    }

    /// Queue a frame without waiting.
    ///
    /// # Errors
    ///
    /// `DeliveryError::Full` when the queue is at capacity,
    /// `DeliveryError::Closed` when the actor has stopped.
    pub fn try_deliver(&self, frame: ServerFrame) -> Result<(), DeliveryError> {
        self.sender
            .try_send(ConnectionMessage::Send { frame })
            .map_err(|e| match e {
                TrySendError::Full(_) => DeliveryError::Full,
                TrySendError::Closed(_) => DeliveryError::Closed,
            })
    }

    /// Flush queued frames and close. Falls back to cancellation when the
    /// queue has no room for the close marker.
    pub fn close(&self) {
        if self.sender.try_send(ConnectionMessage::Close).is_err() {
            self.cancel_token.cancel();
        }
    }

    /// Stop immediately, abandoning queued frames.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    connection_id: ConnectionId,
    session_id: SessionId,
    seat: Seat,
    receiver: mpsc::Receiver<ConnectionMessage>,
    sink: Box<dyn FrameSink>,
    /// Weak so a lingering connection never keeps a closed session's
    /// mailbox open.
    session: mpsc::WeakSender<SessionMessage>,
    /// Child of the session's token.
    cancel_token: CancellationToken,
    mailbox: MailboxMonitor,
}

impl ConnectionActor {
    /// Spawn a connection actor with an outbound queue of `capacity` frames.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        session_id: SessionId,
        seat: Seat,
        sink: Box<dyn FrameSink>,
        capacity: usize,
        session: mpsc::WeakSender<SessionMessage>,
        cancel_token: CancellationToken,
    ) -> (ConnectionHandle, JoinHandle<()>) {
        let connection_id = ConnectionId::new();
        let (sender, receiver) = mpsc::channel(capacity.max(1));

        let actor = Self {
            connection_id,
            session_id,
            seat,
            receiver,
            sink,
            session,
            cancel_token: cancel_token.clone(),
            mailbox: MailboxMonitor::new(ActorType::Connection, connection_id.to_string()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionHandle {
            sender,
            cancel_token,
            connection_id,
            seat,
        };

        (handle, task_handle)
    }

    #[instrument(
        skip_all,
        name = "sync.actor.connection",
        fields(
            connection_id = %self.connection_id,
            session_id = %self.session_id,
            seat = self.seat.as_str()
        )
    )]
    async fn run(mut self) {
        debug!(
            target: "sync.actor.connection",
            connection_id = %self.connection_id,
            session_id = %self.session_id,
            "ConnectionActor started"
        );

        let mut sink_failed = false;
        loop {
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "sync.actor.connection",
                        connection_id = %self.connection_id,
                        "ConnectionActor received cancellation signal"
                    );
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(ConnectionMessage::Send { frame }) => {
                            self.mailbox.record_dequeue(self.receiver.len());
                            if let Err(e) = self.sink.send(frame).await {
                                warn!(
                                    target: "sync.actor.connection",
                                    connection_id = %self.connection_id,
                                    error = %e,
                                    "Outbound write failed, closing connection"
                                );
                                sink_failed = true;
                                break;
                            }
                        }
                        Some(ConnectionMessage::Close) | None => break,
                    }
                }
            }
        }

        self.sink.close().await;
        if sink_failed {
            report_closed(self.session.clone(), self.connection_id).await;
        }

        info!(
            target: "sync.actor.connection",
            connection_id = %self.connection_id,
            session_id = %self.session_id,
            frames_sent = self.mailbox.messages_processed(),
            "ConnectionActor stopped"
        );
    }

}

/// Tell the session a connection's sink failed. Owns its inputs so the
/// await never borrows the actor.
async fn report_closed(session: mpsc::WeakSender<SessionMessage>, connection_id: ConnectionId) {
    let Some(session) = session.upgrade() else {
        return;
    };
    let message = SessionMessage::ConnectionClosed { connection_id };
    if session.send(message).await.is_err() {
        debug!(
            target: "sync.actor.connection",
            connection_id = %connection_id,
            "Session already stopped"
        );
    }
}

/// Map a `DeliveryError` for callers that surface it as a `SyncError`.
impl From<DeliveryError> for SyncError {
    fn from(e: DeliveryError) -> Self {
        match e {
            DeliveryError::Full => SyncError::Transport("outbound queue full".to_string()),
            DeliveryError::Closed => SyncError::Transport("connection closed".to_string()),
        }
    }
}
