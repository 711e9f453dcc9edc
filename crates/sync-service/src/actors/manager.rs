//! `SessionManagerActor` - singleton supervisor for session actors.
//!
//! The `SessionManagerActor` is the top-level actor of the service:
//!
//! - Singleton per service instance
//! - Creates a `SessionActor` (and its durable writer) on `SESSION_INIT`
//! - Routes later events to the owning session by id
//! - Removes a session once it reports `CLOSED`; its id is never reused
//! - Monitors child actor health (panic detection via `JoinHandle`)
//!
//! # Graceful Shutdown
//!
//! On shutdown the manager:
//! 1. Sets `accepting_new = false`
//! 2. Cancels every session actor
//! 3. Waits for session tasks, then for their writers to flush, within the
//!    deadline
//! 4. Cancels writers still retrying at the deadline

use crate::config::SessionSettings;
use crate::durable::{DurableLog, DurableWriter};
use crate::engine::replay::replay_history;
use crate::engine::scenario::ScenarioLibrary;
use crate::errors::{RejectionReason, SyncError};
use crate::model::event::{
    AuthorizedEvent, EventKind, GameEvent, Role, SessionTerminatedPayload, SYSTEM_EMITTER,
};
use crate::observability::HealthState;

use super::messages::{Accepted, ManagerMessage, ManagerStatus, SessionHistory, SessionView};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::session::{Genesis, SessionActor, SessionActorHandle};

use common::backoff::Backoff;
use common::types::SessionId;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Default channel buffer size for the manager mailbox.
const MANAGER_CHANNEL_BUFFER: usize = 1000;

/// Shutdown deadline when the manager is cancelled rather than asked to
/// shut down.
const DEFAULT_SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

/// How long a removed session's task may take to finish.
const SESSION_CLEANUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Closed session ids remembered for duplicate-init detection.
const RETIRED_SESSION_CAPACITY: usize = 10_000;

/// Dependencies shared by every session the manager creates.
#[derive(Clone)]
pub struct ManagerContext {
    pub scenarios: Arc<ScenarioLibrary>,
    pub log: Arc<dyn DurableLog>,
    pub health: Arc<HealthState>,
    pub settings: SessionSettings,
    pub max_sessions: usize,
    pub metrics: Arc<ActorMetrics>,
}

/// Handle to the `SessionManagerActor`.
///
/// This is the public interface of the engine: the transport and the
/// internal API both go through it.
#[derive(Clone)]
pub struct SessionManagerHandle {
    sender: mpsc::Sender<ManagerMessage>,
    cancel_token: CancellationToken,
    log: Arc<dyn DurableLog>,
    scenarios: Arc<ScenarioLibrary>,
}

impl SessionManagerHandle {
    /// Spawn the manager and return a handle to it.
    #[must_use]
    pub fn new(service_id: String, context: ManagerContext) -> Self {
        let (sender, receiver) = mpsc::channel(MANAGER_CHANNEL_BUFFER);
        let cancel_token = CancellationToken::new();
        let log = Arc::clone(&context.log);
        let scenarios = Arc::clone(&context.scenarios);

        let actor = SessionManagerActor::new(
            service_id,
            receiver,
            sender.downgrade(),
            cancel_token.clone(),
            context,
        );
        tokio::spawn(actor.run());

        Self {
            sender,
            cancel_token,
            log,
            scenarios,
        }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ManagerMessage,
    ) -> Result<T, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|e| SyncError::Internal(format!("channel send failed: {e}")))?;
        rx.await
            .map_err(|e| SyncError::Internal(format!("response receive failed: {e}")))
    }

    /// Submit an authenticated event.
    ///
    /// `SESSION_INIT` creates the session; anything else is routed to the
    /// live session with the event's id.
    ///
    /// # Errors
    ///
    /// - `SyncError::SessionNotFound` for a non-init event of an unknown or
    ///   closed session
    /// - `SyncError::DuplicateInit` for a second `SESSION_INIT`
    /// - `SyncError::ValidationRejected` when the reducer refuses the event
    pub async fn submit(&self, input: AuthorizedEvent) -> Result<Accepted, SyncError> {
        if matches!(input.event.kind, EventKind::SessionInit(_)) {
            return self
                .request(|respond_to| ManagerMessage::CreateSession {
                    init: input,
                    respond_to,
                })
                .await?;
        }
        self.session(input.session_id()).await?.submit(input).await
    }

    /// Handle of a live session.
    pub async fn session(&self, session_id: SessionId) -> Result<SessionActorHandle, SyncError> {
        self.request(|respond_to| ManagerMessage::GetSession {
            session_id,
            respond_to,
        })
        .await?
    }

    /// Force-terminate a session through its normal pipeline.
    pub async fn terminate(
        &self,
        session_id: SessionId,
        reason: impl Into<String>,
    ) -> Result<Accepted, SyncError> {
        let event = GameEvent::new(
            session_id,
            SYSTEM_EMITTER,
            EventKind::SessionTerminated(SessionTerminatedPayload {
                reason: reason.into(),
            }),
        );
        self.submit(AuthorizedEvent::new(event, Role::System)).await
    }

    pub async fn session_state(&self, session_id: SessionId) -> Result<SessionView, SyncError> {
        self.session(session_id).await?.get_state().await
    }

    /// Full history of a session from the durable log, verified by replay.
    ///
    /// Works for live and closed sessions alike.
    ///
    /// # Errors
    ///
    /// - `SyncError::SessionNotFound` if the log has nothing for the id
    /// - `SyncError::ReplayDivergence` if the log does not reproduce its
    ///   stored states
    pub async fn session_history(&self, session_id: SessionId) -> Result<SessionHistory, SyncError> {
        let transitions = self.log.load_history(session_id, 0).await?;
        if transitions.is_empty() {
            return Err(SyncError::SessionNotFound(session_id));
        }
        let final_state = replay_history(&self.scenarios, &transitions)?;
        Ok(SessionHistory {
            session_id,
            events: transitions.into_iter().map(|stored| stored.event).collect(),
            final_state,
        })
    }

    pub async fn get_status(&self) -> Result<ManagerStatus, SyncError> {
        self.request(|respond_to| ManagerMessage::GetStatus { respond_to })
            .await
    }

    /// Stop accepting sessions and wind the live ones down within
    /// `deadline`.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), SyncError> {
        self.request(|respond_to| ManagerMessage::Shutdown {
            deadline,
            respond_to,
        })
        .await?
    }

    /// Cancel the actor (for immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// Internal state for a managed session.
struct ManagedSession {
    handle: SessionActorHandle,
    task_handle: JoinHandle<()>,
    writer_task: JoinHandle<()>,
}

/// The `SessionManagerActor` implementation.
pub struct SessionManagerActor {
    service_id: String,
    receiver: mpsc::Receiver<ManagerMessage>,
    /// Handed to session actors so they can report `CLOSED`.
    mailbox_sender: mpsc::WeakSender<ManagerMessage>,
    /// Cancellation token (root).
    cancel_token: CancellationToken,
    /// Parent of the durable writers; independent of the root token so
    /// writers can flush after sessions are cancelled.
    writer_token: CancellationToken,
    sessions: HashMap<SessionId, ManagedSession>,
    retired: HashSet<SessionId>,
    retired_order: VecDeque<SessionId>,
    accepting_new: bool,
    context: ManagerContext,
    mailbox: MailboxMonitor,
}

impl SessionManagerActor {
    fn new(
        service_id: String,
        receiver: mpsc::Receiver<ManagerMessage>,
        mailbox_sender: mpsc::WeakSender<ManagerMessage>,
        cancel_token: CancellationToken,
        context: ManagerContext,
    ) -> Self {
        let mailbox = MailboxMonitor::new(ActorType::Manager, &service_id);

        Self {
            service_id,
            receiver,
            mailbox_sender,
            cancel_token,
            writer_token: CancellationToken::new(),
            sessions: HashMap::new(),
            retired: HashSet::new(),
            retired_order: VecDeque::new(),
            accepting_new: true,
            context,
            mailbox,
        }
    }

    #[instrument(skip_all, name = "sync.actor.manager", fields(service_id = %self.service_id))]
    async fn run(mut self) {
        info!(
            target: "sync.actor.manager",
            service_id = %self.service_id,
            "SessionManagerActor started"
        );

        loop {
            self.check_session_health().await;

            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "sync.actor.manager",
                        service_id = %self.service_id,
                        "SessionManagerActor received cancellation signal"
                    );
                    self.graceful_shutdown(DEFAULT_SHUTDOWN_DEADLINE).await;
                    break;
                }

                msg = self.receiver.recv() => {
                    match msg {
                        Some(ManagerMessage::Shutdown { deadline, respond_to }) => {
                            self.graceful_shutdown(deadline).await;
                            self.cancel_token.cancel();
                            let _ = respond_to.send(Ok(()));
                            break;
                        }
                        Some(message) => {
                            self.mailbox.record_dequeue(self.receiver.len());
                            self.handle_message(message).await;
                            self.context.metrics.record_message_processed();
                        }
                        None => {
                            info!(
                                target: "sync.actor.manager",
                                service_id = %self.service_id,
                                "SessionManagerActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "sync.actor.manager",
            service_id = %self.service_id,
            sessions_remaining = self.sessions.len(),
            messages_processed = self.mailbox.messages_processed(),
            "SessionManagerActor stopped"
        );
    }

    async fn handle_message(&mut self, message: ManagerMessage) {
        match message {
            ManagerMessage::CreateSession { init, respond_to } => {
                let result = self.create_session(init).await;
                let _ = respond_to.send(result);
            }

            ManagerMessage::GetSession {
                session_id,
                respond_to,
            } => {
                let result = self
                    .sessions
                    .get(&session_id)
                    .map(|managed| managed.handle.clone())
                    .ok_or(SyncError::SessionNotFound(session_id));
                let _ = respond_to.send(result);
            }

            ManagerMessage::SessionClosed { session_id } => self.remove_session(session_id),

            ManagerMessage::GetStatus { respond_to } => {
                let _ = respond_to.send(self.get_status());
            }

            // Handled in the run loop, which stops after it.
            ManagerMessage::Shutdown { respond_to, .. } => {
                let _ = respond_to.send(Err(SyncError::Draining));
            }
        }
    }

    async fn create_session(&mut self, init: AuthorizedEvent) -> Result<Accepted, SyncError> {
        if !self.accepting_new {
            return Err(SyncError::Draining);
        }

        let session_id = init.session_id();
        if self.sessions.contains_key(&session_id) || self.retired.contains(&session_id) {
            return Err(SyncError::DuplicateInit(session_id));
        }
        if self.sessions.len() >= self.context.max_sessions {
            warn!(
                target: "sync.actor.manager",
                service_id = %self.service_id,
                max_sessions = self.context.max_sessions,
                "Rejecting session, at capacity"
            );
            return Err(SyncError::CapacityExceeded);
        }

        let EventKind::SessionInit(payload) = &init.event.kind else {
            return Err(SyncError::rejected(
                init.event.event_id,
                RejectionReason::Malformed("expected SESSION_INIT".to_string()),
            ));
        };
        let scenario = self.context.scenarios.get(&payload.scenario_id).ok_or_else(|| {
            SyncError::rejected(
                init.event.event_id,
                RejectionReason::UnknownScenario(payload.scenario_id.clone()),
            )
        })?;

        let genesis = Genesis::prepare(scenario, init, self.context.settings.history_capacity)?;

        // The retired set is bounded and per process. The log is neither.
        if self.context.log.has_history(session_id).await? {
            self.retire(session_id);
            return Err(SyncError::DuplicateInit(session_id));
        }
        let accepted = genesis.accepted();

        let (writer, writer_task) = DurableWriter::spawn(
            session_id,
            Arc::clone(&self.context.log),
            Arc::clone(&self.context.health),
            Backoff::default(),
            self.context.settings.durable_backlog_capacity,
            self.writer_token.child_token(),
        );
        let (handle, task_handle) = SessionActor::spawn(
            genesis,
            self.context.settings,
            writer,
            self.mailbox_sender.clone(),
            self.cancel_token.child_token(),
            Arc::clone(&self.context.metrics),
        );

        self.sessions.insert(
            session_id,
            ManagedSession {
                handle,
                task_handle,
                writer_task,
            },
        );
        self.context.metrics.session_created();

        info!(
            target: "sync.actor.manager",
            service_id = %self.service_id,
            session_id = %session_id,
            total_sessions = self.sessions.len(),
            "Session actor created"
        );

        Ok(accepted)
    }

    /// Remove a closed session without blocking the message loop.
    fn remove_session(&mut self, session_id: SessionId) {
        let Some(managed) = self.sessions.remove(&session_id) else {
            return;
        };
        self.retire(session_id);
        self.context.metrics.session_removed();

        let service_id = self.service_id.clone();
        tokio::spawn(async move {
            match tokio::time::timeout(SESSION_CLEANUP_TIMEOUT, managed.task_handle).await {
                Ok(Ok(())) => {
                    debug!(
                        target: "sync.actor.manager",
                        service_id = %service_id,
                        session_id = %session_id,
                        "Session actor task completed cleanly"
                    );
                }
                Ok(Err(e)) => {
                    warn!(
                        target: "sync.actor.manager",
                        service_id = %service_id,
                        session_id = %session_id,
                        error = ?e,
                        "Session actor task panicked during removal"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "sync.actor.manager",
                        service_id = %service_id,
                        session_id = %session_id,
                        "Session actor task cleanup timed out"
                    );
                }
            }
        });

        info!(
            target: "sync.actor.manager",
            service_id = %self.service_id,
            session_id = %session_id,
            total_sessions = self.sessions.len(),
            "Session actor removed"
        );
    }

    fn retire(&mut self, session_id: SessionId) {
        if self.retired.insert(session_id) {
            self.retired_order.push_back(session_id);
        }
        while self.retired_order.len() > RETIRED_SESSION_CAPACITY {
            if let Some(oldest) = self.retired_order.pop_front() {
                self.retired.remove(&oldest);
            }
        }
    }

    fn get_status(&self) -> ManagerStatus {
        ManagerStatus {
            session_count: self.sessions.len(),
            connection_count: self.context.metrics.connection_count(),
            is_draining: !self.accepting_new,
            mailbox_depth: self.mailbox.current_depth(),
        }
    }

    async fn graceful_shutdown(&mut self, deadline: Duration) {
        info!(
            target: "sync.actor.manager",
            service_id = %self.service_id,
            session_count = self.sessions.len(),
            deadline_secs = deadline.as_secs(),
            "Performing graceful shutdown"
        );

        self.accepting_new = false;
        let deadline = Instant::now() + deadline;

        for managed in self.sessions.values() {
            managed.handle.cancel();
        }

        let mut writers = Vec::with_capacity(self.sessions.len());
        for (session_id, managed) in self.sessions.drain() {
            match tokio::time::timeout_at(deadline, managed.task_handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(
                        target: "sync.actor.manager",
                        service_id = %self.service_id,
                        session_id = %session_id,
                        error = ?e,
                        "Session actor task panicked during shutdown"
                    );
                }
                Err(_) => {
                    warn!(
                        target: "sync.actor.manager",
                        service_id = %self.service_id,
                        session_id = %session_id,
                        "Session actor shutdown timed out"
                    );
                }
            }
            self.context.metrics.session_removed();
            writers.push((session_id, managed.writer_task));
        }

        // Session actors dropped their writer handles; writers flush and exit.
        for (session_id, writer_task) in writers {
            if tokio::time::timeout_at(deadline, writer_task).await.is_err() {
                warn!(
                    target: "sync.actor.manager",
                    service_id = %self.service_id,
                    session_id = %session_id,
                    "Durable writer did not flush before the deadline"
                );
                break;
            }
        }
        self.writer_token.cancel();

        info!(
            target: "sync.actor.manager",
            service_id = %self.service_id,
            "Graceful shutdown complete"
        );
    }

    /// Reap session tasks that ended without reporting `CLOSED`.
    async fn check_session_health(&mut self) {
        let finished: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, managed)| managed.task_handle.is_finished())
            .map(|(session_id, _)| *session_id)
            .collect();

        for session_id in finished {
            let Some(managed) = self.sessions.remove(&session_id) else {
                continue;
            };
            self.retire(session_id);
            self.context.metrics.session_removed();

            match managed.task_handle.await {
                Ok(()) => {
                    debug!(
                        target: "sync.actor.manager",
                        service_id = %self.service_id,
                        session_id = %session_id,
                        "Session actor exited cleanly"
                    );
                }
                Err(join_error) if join_error.is_panic() => {
                    error!(
                        target: "sync.actor.manager",
                        service_id = %self.service_id,
                        session_id = %session_id,
                        error = ?join_error,
                        "Session actor panicked"
                    );
                    self.context.metrics.record_panic(ActorType::Session);
                }
                Err(_) => {}
            }
        }
    }
}
