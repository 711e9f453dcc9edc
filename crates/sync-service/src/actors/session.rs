//! `SessionActor` - the single writer for one investigation session.
//!
//! Every input for a session (participant events, attaches, acks,
//! disconnects, injected system events) goes through one ordered mailbox and
//! is handled to completion before the next, so reductions never interleave.
//!
//! # Phases
//!
//! `INITIALIZING -> RUNNING -> DRAINING -> CLOSED`
//!
//! - The genesis transition is persisted on start.
//! - A transition that ends the session (`GAME_OVER`) moves to `DRAINING`:
//!   the final frames are already queued, and the actor waits for every
//!   joined participant to ack the final sequence or for the drain timeout.
//! - A running session with nobody attached for the idle timeout is
//!   terminated through the normal pipeline.
//! - On `CLOSED` the actor closes its connections, tells the manager, and
//!   drops its durable writer handle so the writer flushes and exits.
//!
//! Rejected events never advance `sequenceId` and never stop the actor.

use crate::config::SessionSettings;
use crate::durable::DurableWriterHandle;
use crate::engine::reducer::{initialize, reduce};
use crate::engine::scenario::Scenario;
use crate::engine::sequencer::{CatchUp, Sequencer, Transition};
use crate::errors::{RejectionReason, SyncError};
use crate::model::event::{
    AuthorizedEvent, ConnectionLostPayload, EventKind, GameEvent, PlayerJoinedPayload, Role,
    SessionTerminatedPayload, SYSTEM_EMITTER,
};
use crate::model::frames::ServerFrame;
use crate::model::state::{InvestigationState, Seat};
use crate::observability::metrics::{record_event, record_event_latency, record_resync};

use super::connection::ConnectionActor;
use super::messages::{
    Accepted, AttachOutcome, AttachRequest, ManagerMessage, SessionMessage, SessionPhase,
    SessionView,
};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::registry::ConnectionRegistry;

use common::types::{ConnectionId, SessionId};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Default channel buffer size for the session mailbox.
const SESSION_CHANNEL_BUFFER: usize = 500;

/// Reason recorded on the termination injected for idle sessions.
const IDLE_TERMINATION_REASON: &str = "idle timeout";

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// A validated `SESSION_INIT`, ready to be handed to a new actor.
#[derive(Debug)]
pub struct Genesis {
    scenario: Arc<Scenario>,
    sequencer: Sequencer,
    transition: Transition,
}

impl Genesis {
    /// Build sequence 0 from `init`.
    ///
    /// # Errors
    ///
    /// `SyncError::ValidationRejected` if `init` is not a system-emitted
    /// `SESSION_INIT` for `scenario`.
    pub fn prepare(
        scenario: Arc<Scenario>,
        init: AuthorizedEvent,
        history_capacity: usize,
    ) -> Result<Self, SyncError> {
        let event_id = init.event.event_id;
        let state = initialize(&scenario, &init)
            .map_err(|reason| SyncError::rejected(event_id, reason))?;
        let (sequencer, transition) =
            Sequencer::genesis(state, init, history_capacity, now_ms());
        Ok(Self {
            scenario,
            sequencer,
            transition,
        })
    }

    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.transition.state.session_id
    }

    #[must_use]
    pub fn accepted(&self) -> Accepted {
        Accepted {
            event_id: self.transition.input.event.event_id,
            sequence_id: self.transition.sequence_id(),
        }
    }
}

/// Handle to a `SessionActor`.
#[derive(Clone, Debug)]
pub struct SessionActorHandle {
    session_id: SessionId,
    sender: mpsc::Sender<SessionMessage>,
    cancel_token: CancellationToken,
}

impl SessionActorHandle {
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// A closed actor looks the same as a session that never existed.
    fn gone(&self) -> SyncError {
        SyncError::SessionNotFound(self.session_id)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SessionMessage,
    ) -> Result<T, SyncError> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| self.gone())?;
        rx.await.map_err(|_| self.gone())
    }

    async fn notify(&self, message: SessionMessage) -> Result<(), SyncError> {
        self.sender.send(message).await.map_err(|_| self.gone())
    }

    /// Submit an authenticated event and wait for its outcome.
    pub async fn submit(&self, input: AuthorizedEvent) -> Result<Accepted, SyncError> {
        self.request(|respond_to| SessionMessage::Submit { input, respond_to })
            .await?
    }

    /// Attach a participant connection.
    pub async fn attach(&self, request: AttachRequest) -> Result<AttachOutcome, SyncError> {
        self.request(|respond_to| SessionMessage::Attach {
            request,
            respond_to,
        })
        .await?
    }

    pub async fn ack(&self, connection_id: ConnectionId, sequence_id: u64) -> Result<(), SyncError> {
        self.notify(SessionMessage::Ack {
            connection_id,
            sequence_id,
        })
        .await
    }

    pub async fn request_snapshot(&self, connection_id: ConnectionId) -> Result<(), SyncError> {
        self.notify(SessionMessage::RequestSnapshot { connection_id })
            .await
    }

    /// Queue `frame` for one connection only, such as the `ACCEPTED` or
    /// `ERROR` answer to its own submission.
    pub async fn reply(
        &self,
        connection_id: ConnectionId,
        frame: ServerFrame,
    ) -> Result<(), SyncError> {
        self.notify(SessionMessage::Reply {
            connection_id,
            frame,
        })
        .await
    }

    pub async fn connection_closed(&self, connection_id: ConnectionId) -> Result<(), SyncError> {
        self.notify(SessionMessage::ConnectionClosed { connection_id })
            .await
    }

    pub async fn get_state(&self) -> Result<SessionView, SyncError> {
        self.request(|respond_to| SessionMessage::GetState { respond_to })
            .await
    }

    /// Cancel the actor (service shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `SessionActor` implementation.
pub struct SessionActor {
    session_id: SessionId,
    scenario: Arc<Scenario>,
    settings: SessionSettings,
    sequencer: Sequencer,
    /// Persisted when the actor starts.
    genesis: Option<Transition>,
    registry: ConnectionRegistry,
    writer: DurableWriterHandle,
    receiver: mpsc::Receiver<SessionMessage>,
    /// Handed to connection actors so they can report a failed sink.
    mailbox_sender: mpsc::WeakSender<SessionMessage>,
    manager: mpsc::WeakSender<ManagerMessage>,
    cancel_token: CancellationToken,
    metrics: Arc<ActorMetrics>,
    mailbox: MailboxMonitor,
    phase: SessionPhase,
    drain_deadline: Option<Instant>,
    /// Set while running with no connection attached.
    idle_since: Option<Instant>,
    /// System events raised while handling a message, applied before the
    /// next message.
    follow_ups: VecDeque<AuthorizedEvent>,
}

impl SessionActor {
    /// Spawn the actor for a prepared session.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        genesis: Genesis,
        settings: SessionSettings,
        writer: DurableWriterHandle,
        manager: mpsc::WeakSender<ManagerMessage>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (SessionActorHandle, JoinHandle<()>) {
        let session_id = genesis.session_id();
        let (sender, receiver) = mpsc::channel(SESSION_CHANNEL_BUFFER);

        let actor = Self {
            session_id,
            scenario: genesis.scenario,
            settings,
            sequencer: genesis.sequencer,
            genesis: Some(genesis.transition),
            registry: ConnectionRegistry::new(session_id, Arc::clone(&metrics)),
            writer,
            receiver,
            mailbox_sender: sender.downgrade(),
            manager,
            cancel_token: cancel_token.clone(),
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Session, session_id.to_string()),
            phase: SessionPhase::Initializing,
            drain_deadline: None,
            idle_since: None,
            follow_ups: VecDeque::new(),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = SessionActorHandle {
            session_id,
            sender,
            cancel_token,
        };

        (handle, task_handle)
    }

    #[instrument(skip_all, name = "sync.actor.session", fields(session_id = %self.session_id))]
    async fn run(mut self) {
        info!(
            target: "sync.actor.session",
            session_id = %self.session_id,
            scenario_id = %self.scenario.id(),
            "SessionActor started"
        );

        self.start();

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "sync.actor.session",
                        session_id = %self.session_id,
                        "SessionActor received cancellation signal"
                    );
                    break;
                }

                () = sleep_until(deadline) => self.on_deadline(),

                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_dequeue(self.receiver.len());
                            self.handle_message(message);
                            self.metrics.record_message_processed();
                        }
                        None => break,
                    }
                }
            }

            self.run_follow_ups();
            if self.phase == SessionPhase::Closed {
                break;
            }
        }

        self.registry.close_all();
        if self.phase == SessionPhase::Closed {
            self.notify_manager();
        }

        info!(
            target: "sync.actor.session",
            session_id = %self.session_id,
            phase = ?self.phase,
            sequence_id = self.sequencer.latest_sequence_id(),
            messages_processed = self.mailbox.messages_processed(),
            "SessionActor stopped"
        );
    }

    /// Persist the genesis transition and start accepting events.
    fn start(&mut self) {
        if let Some(genesis) = self.genesis.take() {
            self.writer.append(genesis.to_stored());
        }
        self.phase = SessionPhase::Running;
        self.idle_since = Some(Instant::now());
    }

    fn handle_message(&mut self, message: SessionMessage) {
        match message {
            SessionMessage::Submit { input, respond_to } => {
                let result = self.apply(input);
                let _ = respond_to.send(result);
            }

            SessionMessage::Attach {
                request,
                respond_to,
            } => {
                let result = self.attach(request);
                let _ = respond_to.send(result);
            }

            SessionMessage::Ack {
                connection_id,
                sequence_id,
            } => self.ack(connection_id, sequence_id),

            SessionMessage::RequestSnapshot { connection_id } => {
                self.send_snapshot(connection_id);
            }

            SessionMessage::Reply {
                connection_id,
                frame,
            } => self.send_to(connection_id, &[frame]),

            SessionMessage::ConnectionClosed { connection_id } => {
                if let Some(seat) = self.registry.detach(connection_id) {
                    debug!(
                        target: "sync.actor.session",
                        session_id = %self.session_id,
                        connection_id = %connection_id,
                        seat = seat.as_str(),
                        "Connection closed"
                    );
                    self.on_connection_lost(seat);
                }
            }

            SessionMessage::GetState { respond_to } => {
                let _ = respond_to.send(self.view());
            }
        }
    }

    /// Reduce, sequence, persist and broadcast one event.
    fn apply(&mut self, input: AuthorizedEvent) -> Result<Accepted, SyncError> {
        let started = Instant::now();
        let event_id = input.event.event_id;
        let event_type = input.event.type_name();

        let reduction = match reduce(&self.scenario, self.sequencer.current(), &input) {
            Ok(reduction) => reduction,
            Err(reason) => {
                record_event("rejected");
                debug!(
                    target: "sync.actor.session",
                    session_id = %self.session_id,
                    event_id = %event_id,
                    event_type,
                    reason = %reason,
                    "Event rejected"
                );
                return Err(SyncError::rejected(event_id, reason));
            }
        };

        let transition =
            self.sequencer
                .commit(input, reduction, self.registry.acks(), now_ms())?;
        self.writer.append(transition.to_stored());

        let mut frames = vec![ServerFrame::Event {
            event: Arc::clone(&transition.update),
        }];
        if let Some(game_over) = &transition.game_over {
            frames.push(ServerFrame::Event {
                event: Arc::clone(game_over),
            });
        }
        for dropped in self.registry.broadcast(&frames) {
            self.on_connection_lost(dropped.seat);
        }

        record_event("accepted");
        record_event_latency(event_type, started.elapsed());
        debug!(
            target: "sync.actor.session",
            session_id = %self.session_id,
            event_id = %event_id,
            event_type,
            sequence_id = transition.sequence_id(),
            status = transition.state.status.as_str(),
            "Event accepted"
        );

        if transition.game_over.is_some() {
            self.begin_drain();
        }

        Ok(Accepted {
            event_id,
            sequence_id: transition.sequence_id(),
        })
    }

    fn run_follow_ups(&mut self) {
        while let Some(input) = self.follow_ups.pop_front() {
            if let Err(e) = self.apply(input) {
                debug!(
                    target: "sync.actor.session",
                    session_id = %self.session_id,
                    error = %e,
                    "System event not applied"
                );
            }
        }
    }

    fn attach(&mut self, request: AttachRequest) -> Result<AttachOutcome, SyncError> {
        let AttachRequest {
            user_id,
            role,
            resume_from,
            sink,
        } = request;

        let seat = role.seat().ok_or(SyncError::ValidationRejected {
            event_id: None,
            reason: RejectionReason::WrongRole {
                event_type: "PLAYER_JOINED",
                role: role.as_str(),
            },
        })?;

        let state = Arc::clone(self.sequencer.current());
        let slot = state.participants.get(seat);
        if slot.user_id.as_deref().is_some_and(|holder| holder != user_id) {
            return Err(SyncError::Conflict(
                "seat is held by another participant".to_string(),
            ));
        }
        if state
            .participants
            .seat_of(&user_id)
            .is_some_and(|held| held != seat)
        {
            return Err(SyncError::Conflict(
                "participant already holds the other seat".to_string(),
            ));
        }
        if state.is_terminal() && slot.user_id.is_none() {
            return Err(SyncError::ValidationRejected {
                event_id: None,
                reason: RejectionReason::SessionTerminal,
            });
        }

        let (handle, _task) = ConnectionActor::spawn(
            self.session_id,
            seat,
            sink,
            self.settings.outbound_queue_capacity,
            self.mailbox_sender.clone(),
            self.cancel_token.child_token(),
        );
        for frame in self.catch_up_frames(resume_from, &state) {
            if let Err(e) = handle.try_deliver(frame) {
                handle.cancel();
                return Err(e.into());
            }
        }

        let connection_id = handle.connection_id();
        if let Some(known) = resume_from {
            self.registry
                .ack(seat, known, self.sequencer.latest_sequence_id());
        }
        self.registry.attach(handle);
        self.idle_since = None;

        info!(
            target: "sync.actor.session",
            session_id = %self.session_id,
            connection_id = %connection_id,
            seat = seat.as_str(),
            resume_from = ?resume_from,
            "Participant attached"
        );

        if !state.is_terminal() && !slot.is_online() {
            let join = AuthorizedEvent::new(
                GameEvent::new(
                    self.session_id,
                    user_id,
                    EventKind::PlayerJoined(PlayerJoinedPayload { seat }),
                ),
                role,
            );
            if let Err(e) = self.apply(join) {
                self.registry.detach(connection_id);
                return Err(e);
            }
        }

        Ok(AttachOutcome {
            connection_id,
            seat,
        })
    }

    /// Frames that bring a (re)attaching client up to date.
    ///
    /// A replay longer than the outbound queue could never be delivered in
    /// one go, so it becomes a resync like any other uncovered gap.
    fn catch_up_frames(
        &self,
        resume_from: Option<u64>,
        state: &Arc<InvestigationState>,
    ) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        let mut game_over_sent = false;

        match resume_from.map(|known| self.sequencer.catch_up(known)) {
            None => frames.push(ServerFrame::Snapshot {
                state: Arc::clone(state),
            }),
            Some(CatchUp::UpToDate) => {}
            Some(CatchUp::Replay(transitions))
                if replay_frame_count(&transitions) <= self.settings.outbound_queue_capacity =>
            {
                for transition in transitions {
                    frames.push(ServerFrame::Event {
                        event: transition.update,
                    });
                    if let Some(game_over) = transition.game_over {
                        frames.push(ServerFrame::Event { event: game_over });
                        game_over_sent = true;
                    }
                }
            }
            Some(CatchUp::Replay(_) | CatchUp::Resync { .. }) => {
                record_resync();
                frames.push(ServerFrame::Resync {
                    latest_sequence_id: self.sequencer.latest_sequence_id(),
                });
            }
        }

        // GAME_OVER always reaches a participant who comes back.
        if state.is_terminal() && !game_over_sent {
            if let Some(game_over) = self.final_game_over() {
                frames.push(game_over);
            }
        }
        frames
    }

    fn final_game_over(&self) -> Option<ServerFrame> {
        self.sequencer
            .latest_transition()
            .and_then(|transition| transition.game_over.clone())
            .map(|event| ServerFrame::Event { event })
    }

    fn ack(&mut self, connection_id: ConnectionId, sequence_id: u64) {
        let Some(seat) = self.registry.seat_of(connection_id) else {
            return;
        };
        if self
            .registry
            .ack(seat, sequence_id, self.sequencer.latest_sequence_id())
        {
            self.check_drained();
        }
    }

    fn send_snapshot(&mut self, connection_id: ConnectionId) {
        let state = Arc::clone(self.sequencer.current());
        let mut frames = vec![ServerFrame::Snapshot {
            state: Arc::clone(&state),
        }];
        if state.is_terminal() {
            frames.extend(self.final_game_over());
        }
        self.send_to(connection_id, &frames);
    }

    fn send_to(&mut self, connection_id: ConnectionId, frames: &[ServerFrame]) {
        if let Some(dropped) = self.registry.send_to(connection_id, frames) {
            self.on_connection_lost(dropped.seat);
        }
    }

    /// A seat's connection went away: mark it lost in state unless a newer
    /// connection already holds the seat.
    fn on_connection_lost(&mut self, seat: Seat) {
        let state = self.sequencer.current();
        if !state.is_terminal()
            && state.participants.get(seat).is_online()
            && !self.registry.is_attached(seat)
        {
            self.follow_ups.push_back(AuthorizedEvent::new(
                GameEvent::new(
                    self.session_id,
                    SYSTEM_EMITTER,
                    EventKind::ConnectionLost(ConnectionLostPayload { seat }),
                ),
                Role::System,
            ));
        }
        if self.registry.is_empty() && self.phase == SessionPhase::Running {
            self.idle_since = Some(Instant::now());
        }
    }

    fn begin_drain(&mut self) {
        self.phase = SessionPhase::Draining;
        self.drain_deadline = Some(Instant::now() + self.settings.drain_timeout);
        info!(
            target: "sync.actor.session",
            session_id = %self.session_id,
            status = self.sequencer.current().status.as_str(),
            sequence_id = self.sequencer.latest_sequence_id(),
            "Session ended, draining"
        );
        self.check_drained();
    }

    /// Close once every joined participant has acked the final sequence.
    fn check_drained(&mut self) {
        if self.phase != SessionPhase::Draining {
            return;
        }
        let state = self.sequencer.current();
        let latest = state.sequence_id;
        let acks = self.registry.acks();
        let all_acked = [Seat::Patient, Seat::Doctor]
            .into_iter()
            .filter(|seat| state.participants.get(*seat).user_id.is_some())
            .all(|seat| acks.get(seat) >= latest);
        if all_acked {
            self.close("final sequence acknowledged");
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        match self.phase {
            SessionPhase::Draining => self.drain_deadline,
            SessionPhase::Running => self
                .idle_since
                .map(|since| since + self.settings.idle_timeout),
            SessionPhase::Initializing | SessionPhase::Closed => None,
        }
    }

    fn on_deadline(&mut self) {
        match self.phase {
            SessionPhase::Draining => {
                warn!(
                    target: "sync.actor.session",
                    session_id = %self.session_id,
                    acks = ?self.registry.acks(),
                    "Drain timed out before every participant acknowledged"
                );
                self.close("drain timeout");
            }
            SessionPhase::Running => {
                info!(
                    target: "sync.actor.session",
                    session_id = %self.session_id,
                    idle_timeout_secs = self.settings.idle_timeout.as_secs(),
                    "Session idle with no connections, terminating"
                );
                let terminate = AuthorizedEvent::new(
                    GameEvent::new(
                        self.session_id,
                        SYSTEM_EMITTER,
                        EventKind::SessionTerminated(SessionTerminatedPayload {
                            reason: IDLE_TERMINATION_REASON.to_string(),
                        }),
                    ),
                    Role::System,
                );
                if let Err(e) = self.apply(terminate) {
                    warn!(
                        target: "sync.actor.session",
                        session_id = %self.session_id,
                        error = %e,
                        "Idle termination rejected, closing"
                    );
                    self.close("idle timeout");
                }
            }
            SessionPhase::Initializing | SessionPhase::Closed => {}
        }
    }

    fn close(&mut self, reason: &'static str) {
        self.phase = SessionPhase::Closed;
        info!(
            target: "sync.actor.session",
            session_id = %self.session_id,
            reason,
            "Session closed"
        );
    }

    fn notify_manager(&self) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        // The manager also reaps finished tasks, so a full mailbox is fine.
        if manager
            .try_send(ManagerMessage::SessionClosed {
                session_id: self.session_id,
            })
            .is_err()
        {
            debug!(
                target: "sync.actor.session",
                session_id = %self.session_id,
                "Manager mailbox unavailable for close notification"
            );
        }
    }

    fn view(&self) -> SessionView {
        SessionView {
            session_id: self.session_id,
            phase: self.phase,
            state: Arc::clone(self.sequencer.current()),
            acks: self.registry.acks(),
            connection_count: self.registry.len(),
            oldest_retained_sequence_id: self.sequencer.oldest_retained(),
            durability_degraded: self.writer.is_degraded(),
            history_truncated: self.writer.is_truncated(),
        }
    }
}

fn replay_frame_count(transitions: &[Transition]) -> usize {
    transitions
        .iter()
        .map(|transition| 1 + usize::from(transition.game_over.is_some()))
        .sum()
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::durable::{DurableLog, DurableWriter, InMemoryDurableLog};
    use crate::model::event::TargetMetric;
    use crate::model::state::SessionStatus;
    use crate::observability::HealthState;
    use crate::test_support::{self as support, RecordingSink, DOCTOR, PATIENT};
    use common::backoff::Backoff;
    use std::time::Duration;

    struct Harness {
        session_id: SessionId,
        handle: SessionActorHandle,
        task: JoinHandle<()>,
        log: Arc<InMemoryDurableLog>,
        manager_rx: mpsc::Receiver<ManagerMessage>,
        _manager_tx: mpsc::Sender<ManagerMessage>,
    }

    fn spawn_session(settings: SessionSettings) -> Harness {
        let session_id = SessionId::new();
        let genesis = Genesis::prepare(
            support::first_session(),
            support::init(session_id),
            settings.history_capacity,
        )
        .unwrap();
        let log = Arc::new(InMemoryDurableLog::new());
        let (writer, _writer_task) = DurableWriter::spawn(
            session_id,
            Arc::clone(&log) as Arc<dyn DurableLog>,
            Arc::new(HealthState::new()),
            Backoff::default(),
            settings.durable_backlog_capacity,
            CancellationToken::new(),
        );
        let (manager_tx, manager_rx) = mpsc::channel(8);
        let (handle, task) = SessionActor::spawn(
            genesis,
            settings,
            writer,
            manager_tx.downgrade(),
            CancellationToken::new(),
            ActorMetrics::new(),
        );
        Harness {
            session_id,
            handle,
            task,
            log,
            manager_rx,
            _manager_tx: manager_tx,
        }
    }

    async fn attach(
        handle: &SessionActorHandle,
        user_id: &str,
        role: Role,
        resume_from: Option<u64>,
    ) -> (AttachOutcome, mpsc::UnboundedReceiver<ServerFrame>) {
        let (sink, frames) = RecordingSink::new();
        let outcome = handle
            .attach(AttachRequest {
                user_id: user_id.to_string(),
                role,
                resume_from,
                sink: Box::new(sink),
            })
            .await
            .unwrap();
        (outcome, frames)
    }

    /// Collect frames until `count` have arrived.
    async fn take(frames: &mut mpsc::UnboundedReceiver<ServerFrame>, count: usize) -> Vec<ServerFrame> {
        let mut out = Vec::with_capacity(count);
        while out.len() < count {
            out.push(frames.recv().await.unwrap());
        }
        out
    }

    fn sequences(frames: &[ServerFrame]) -> Vec<u64> {
        frames
            .iter()
            .filter_map(ServerFrame::state_update_sequence)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_scenario_runs_to_stress_overload() {
        let h = spawn_session(SessionSettings::default());
        let (_patient, mut patient_frames) = attach(&h.handle, PATIENT, Role::Patient, None).await;
        let (_doctor, mut doctor_frames) = attach(&h.handle, DOCTOR, Role::Doctor, None).await;

        let view = h.handle.get_state().await.unwrap();
        assert_eq!(view.state.sequence_id, 2);
        assert_eq!(view.state.status, SessionStatus::Active);

        let accepted = h
            .handle
            .submit(support::choice(h.session_id, "N1", "C1"))
            .await
            .unwrap();
        assert_eq!(accepted.sequence_id, 3);

        let accepted = h
            .handle
            .submit(support::intervention(
                h.session_id,
                "CONFRONTATION",
                9,
                TargetMetric::Stress,
            ))
            .await
            .unwrap();
        assert_eq!(accepted.sequence_id, 4);

        let view = h.handle.get_state().await.unwrap();
        assert_eq!(view.state.status, SessionStatus::Terminated);
        assert_eq!(view.phase, SessionPhase::Draining);

        let rejected = h
            .handle
            .submit(support::choice(h.session_id, "N2", "C4"))
            .await;
        assert!(matches!(
            rejected,
            Err(SyncError::ValidationRejected {
                reason: RejectionReason::SessionTerminal,
                ..
            })
        ));

        // Snapshot, then updates 1..=4, then GAME_OVER.
        let patient = take(&mut patient_frames, 6).await;
        assert!(matches!(patient.first(), Some(ServerFrame::Snapshot { .. })));
        assert_eq!(sequences(&patient), vec![1, 2, 3, 4]);
        assert!(patient.last().unwrap().is_game_over());

        let doctor = take(&mut doctor_frames, 5).await;
        assert_eq!(sequences(&doctor), vec![2, 3, 4]);
        assert!(doctor.last().unwrap().is_game_over());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_event_does_not_advance_sequence() {
        let h = spawn_session(SessionSettings::default());
        attach(&h.handle, PATIENT, Role::Patient, None).await;
        attach(&h.handle, DOCTOR, Role::Doctor, None).await;

        let result = h
            .handle
            .submit(support::choice(h.session_id, "N3", "C5"))
            .await;

        assert!(matches!(
            result,
            Err(SyncError::ValidationRejected {
                reason: RejectionReason::StaleNode { .. },
                ..
            })
        ));
        assert_eq!(h.handle.get_state().await.unwrap().state.sequence_id, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_pauses_and_reconnect_replays_gap() {
        let h = spawn_session(SessionSettings::default());
        let (patient, _) = attach(&h.handle, PATIENT, Role::Patient, None).await;
        let (_doctor, _) = attach(&h.handle, DOCTOR, Role::Doctor, None).await;

        h.handle
            .connection_closed(patient.connection_id)
            .await
            .unwrap();
        let view = h.handle.get_state().await.unwrap();
        assert_eq!(view.state.status, SessionStatus::Paused);
        assert_eq!(view.state.sequence_id, 3);
        assert_eq!(view.connection_count, 1);

        let (_again, mut frames) = attach(&h.handle, PATIENT, Role::Patient, Some(2)).await;

        // CONNECTION_LOST replayed, then the new PLAYER_JOINED.
        let replayed = take(&mut frames, 2).await;
        assert_eq!(sequences(&replayed), vec![3, 4]);
        let view = h.handle.get_state().await.unwrap();
        assert_eq!(view.state.status, SessionStatus::Active);
        assert_eq!(view.acks.patient, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_outside_history_gets_resync() {
        let h = spawn_session(SessionSettings {
            history_capacity: 2,
            ..SessionSettings::default()
        });
        let (patient, _) = attach(&h.handle, PATIENT, Role::Patient, None).await;
        attach(&h.handle, DOCTOR, Role::Doctor, None).await;
        h.handle
            .submit(support::choice(h.session_id, "N1", "C1"))
            .await
            .unwrap();
        h.handle
            .connection_closed(patient.connection_id)
            .await
            .unwrap();

        let (_again, mut frames) = attach(&h.handle, PATIENT, Role::Patient, Some(0)).await;

        let received = take(&mut frames, 2).await;
        assert_eq!(
            received.first(),
            Some(&ServerFrame::Resync {
                latest_sequence_id: 4
            })
        );
        assert_eq!(sequences(&received), vec![5]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_snapshot_request_sends_current_state() {
        let h = spawn_session(SessionSettings::default());
        let (patient, mut frames) = attach(&h.handle, PATIENT, Role::Patient, None).await;
        take(&mut frames, 2).await;

        h.handle
            .request_snapshot(patient.connection_id)
            .await
            .unwrap();

        match frames.recv().await {
            Some(ServerFrame::Snapshot { state }) => assert_eq!(state.sequence_id, 1),
            other => unreachable!("expected snapshot, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_to_full_queue_detaches_connection() {
        let h = spawn_session(SessionSettings {
            outbound_queue_capacity: 2,
            ..SessionSettings::default()
        });
        attach(&h.handle, DOCTOR, Role::Doctor, None).await;

        // The patient's socket never finishes its first write.
        let (sink, _frames, _gate) = RecordingSink::gated();
        let patient = h
            .handle
            .attach(AttachRequest {
                user_id: PATIENT.to_string(),
                role: Role::Patient,
                resume_from: None,
                sink: Box::new(sink),
            })
            .await
            .unwrap();
        assert_eq!(h.handle.get_state().await.unwrap().connection_count, 2);

        let rejection = SyncError::ValidationRejected {
            event_id: None,
            reason: RejectionReason::Malformed("not json".to_string()),
        };
        for _ in 0..4 {
            h.handle
                .reply(patient.connection_id, ServerFrame::error(&rejection))
                .await
                .unwrap();
        }

        let view = h.handle.get_state().await.unwrap();
        assert_eq!(view.connection_count, 1, "Slow patient detached");
        assert_eq!(view.state.status, SessionStatus::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn test_seat_held_by_other_user_is_conflict() {
        let h = spawn_session(SessionSettings::default());
        attach(&h.handle, PATIENT, Role::Patient, None).await;

        let (sink, _) = RecordingSink::new();
        let result = h
            .handle
            .attach(AttachRequest {
                user_id: "intruder".to_string(),
                role: Role::Patient,
                resume_from: None,
                sink: Box::new(sink),
            })
            .await;

        assert!(matches!(result, Err(SyncError::Conflict(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_closes_once_both_acknowledge() {
        let mut h = spawn_session(SessionSettings::default());
        let (patient, _) = attach(&h.handle, PATIENT, Role::Patient, None).await;
        let (doctor, _) = attach(&h.handle, DOCTOR, Role::Doctor, None).await;
        h.handle
            .submit(support::surrender(h.session_id))
            .await
            .unwrap();

        h.handle.ack(patient.connection_id, 3).await.unwrap();
        assert_eq!(
            h.handle.get_state().await.unwrap().phase,
            SessionPhase::Draining
        );
        h.handle.ack(doctor.connection_id, 3).await.unwrap();

        h.task.await.unwrap();
        assert!(matches!(
            h.manager_rx.recv().await,
            Some(ManagerMessage::SessionClosed { session_id }) if session_id == h.session_id
        ));
        assert!(matches!(
            h.handle.get_state().await,
            Err(SyncError::SessionNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_times_out_without_acks() {
        let settings = SessionSettings::default();
        let h = spawn_session(settings);
        attach(&h.handle, PATIENT, Role::Patient, None).await;
        h.handle
            .submit(support::surrender(h.session_id))
            .await
            .unwrap();

        tokio::time::sleep(settings.drain_timeout - Duration::from_millis(1)).await;
        assert!(!h.task.is_finished());

        let result = tokio::time::timeout(Duration::from_secs(1), h.task).await;
        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_session_is_terminated_and_persisted() {
        let settings = SessionSettings {
            idle_timeout: Duration::from_secs(30),
            ..SessionSettings::default()
        };
        let h = spawn_session(settings);

        // Nobody ever joined, so nothing is left to drain.
        tokio::time::timeout(Duration::from_secs(31), h.task)
            .await
            .unwrap()
            .unwrap();
        drop(h.handle);

        // Let the writer flush after the actor dropped its handle.
        tokio::time::sleep(Duration::from_millis(10)).await;
        let history = h.log.load_history(h.session_id, 0).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(
            history.last().unwrap().state.status,
            SessionStatus::Terminated
        );
    }
}
