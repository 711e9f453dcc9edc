//! Per-session background writer for the durable log.
//!
//! The session actor hands each transition to [`DurableWriterHandle::append`]
//! and moves on. The writer appends in sequence order, retrying failures with
//! exponential backoff. While appends fail the writer counts as degraded in
//! [`HealthState`]; events are never rejected because of it.
//!
//! The backlog is bounded. When it fills, the session's history is
//! truncated: that transition and every later one are shed, so the log
//! stays a gap-free prefix that still replays.
//!
//! Dropping every handle lets the writer flush its backlog and exit.
//! Cancelling its token abandons the backlog (service shutdown).

use crate::durable::{DurableLog, StoredTransition};
use crate::observability::health::HealthState;
use crate::observability::metrics::{record_durable_append_failure, record_durable_shed};
use common::backoff::Backoff;
use common::types::SessionId;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone)]
pub struct DurableWriterHandle {
    session_id: SessionId,
    sender: mpsc::Sender<StoredTransition>,
    degraded: Arc<AtomicBool>,
    truncated: Arc<AtomicBool>,
}

impl DurableWriterHandle {
    /// Queue a transition for appending. Never blocks.
    ///
    /// Once the backlog has overflowed, nothing more is queued for this
    /// session.
    pub fn append(&self, transition: StoredTransition) {
        let sequence_id = transition.sequence_id;
        if self.truncated.load(Ordering::SeqCst) {
            record_durable_shed();
            return;
        }
        match self.sender.try_send(transition) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.truncated.store(true, Ordering::SeqCst);
                record_durable_shed();
                error!(
                    target: "sync.durable.writer",
                    session_id = %self.session_id,
                    sequence_id,
                    backlog = self.sender.max_capacity(),
                    "Durable backlog full, history truncated"
                );
            }
            Err(TrySendError::Closed(_)) => {
                warn!(
                    target: "sync.durable.writer",
                    session_id = %self.session_id,
                    sequence_id,
                    "Durable writer stopped, transition not persisted"
                );
            }
        }
    }

    /// True while the most recent append attempt failed.
    #[must_use]
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::SeqCst)
    }

    /// True once transitions have been shed; the stored history ends
    /// before the live state.
    #[must_use]
    pub fn is_truncated(&self) -> bool {
        self.truncated.load(Ordering::SeqCst)
    }
}

pub struct DurableWriter {
    session_id: SessionId,
    log: Arc<dyn DurableLog>,
    receiver: mpsc::Receiver<StoredTransition>,
    health: Arc<HealthState>,
    degraded: Arc<AtomicBool>,
    backoff: Backoff,
    cancel_token: CancellationToken,
}

impl DurableWriter {
    /// Spawn a writer for one session holding at most `backlog_capacity`
    /// unwritten transitions.
    pub fn spawn(
        session_id: SessionId,
        log: Arc<dyn DurableLog>,
        health: Arc<HealthState>,
        backoff: Backoff,
        backlog_capacity: usize,
        cancel_token: CancellationToken,
    ) -> (DurableWriterHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(backlog_capacity.max(1));
        let degraded = Arc::new(AtomicBool::new(false));

        let writer = Self {
            session_id,
            log,
            receiver,
            health,
            degraded: Arc::clone(&degraded),
            backoff,
            cancel_token,
        };
        let task = tokio::spawn(writer.run());

        (
            DurableWriterHandle {
                session_id,
                sender,
                degraded,
                truncated: Arc::new(AtomicBool::new(false)),
            },
            task,
        )
    }

    #[instrument(skip_all, name = "sync.durable.writer", fields(session_id = %self.session_id))]
    async fn run(mut self) {
        debug!(
            target: "sync.durable.writer",
            session_id = %self.session_id,
            "Durable writer started"
        );

        loop {
            let transition = tokio::select! {
                () = self.cancel_token.cancelled() => break,
                next = self.receiver.recv() => match next {
                    Some(transition) => transition,
                    None => break,
                },
            };
            if !self.write(&transition).await {
                break;
            }
        }

        if self.degraded.swap(false, Ordering::SeqCst) {
            self.health.durability_recovered();
        }
        let abandoned = self.receiver.len();
        if abandoned > 0 {
            warn!(
                target: "sync.durable.writer",
                session_id = %self.session_id,
                abandoned,
                "Durable writer cancelled with unflushed transitions"
            );
        }
        debug!(
            target: "sync.durable.writer",
            session_id = %self.session_id,
            "Durable writer stopped"
        );
    }

    /// Append with retry. Returns false if cancelled first.
    async fn write(&mut self, transition: &StoredTransition) -> bool {
        loop {
            match self.log.append(transition).await {
                Ok(()) => {
                    if self.degraded.swap(false, Ordering::SeqCst) {
                        self.health.durability_recovered();
                        info!(
                            target: "sync.durable.writer",
                            session_id = %self.session_id,
                            sequence_id = transition.sequence_id,
                            attempts = self.backoff.attempts(),
                            "Durable log recovered"
                        );
                    }
                    self.backoff.reset();
                    return true;
                }
                Err(e) => {
                    record_durable_append_failure();
                    if !self.degraded.swap(true, Ordering::SeqCst) {
                        self.health.durability_degraded();
                    }
                    let delay = self.backoff.next_delay();
                    warn!(
                        target: "sync.durable.writer",
                        session_id = %self.session_id,
                        sequence_id = transition.sequence_id,
                        error = %e,
                        retry_in_ms = delay.as_millis(),
                        "Durable append failed, retrying"
                    );
                    tokio::select! {
                        () = self.cancel_token.cancelled() => return false,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}
