//! WebSocket transport and internal session API.
//!
//! # Participant connections
//!
//! `GET /sessions/:session_id/ws?resumeFromSequenceId=N`
//!
//! The auth gateway in front of the service resolves the participant and
//! forwards it in trusted headers (`x-user-id`, `x-user-role`). Without
//! `resumeFromSequenceId` the client gets a full snapshot first.
//!
//! Each socket is split: the write half sits behind a [`FrameSink`] driven
//! by the connection's `ConnectionActor`; the read half is served here and
//! turns client frames into session actor calls. Replies to a client's own
//! events go through the same outbound queue as broadcasts, so they are
//! never reordered ahead of the `STATE_UPDATE` they acknowledge.
//!
//! # Internal API
//!
//! - `POST /internal/sessions` - create a session (`SESSION_INIT`)
//! - `GET /internal/sessions/:session_id` - live state
//! - `POST /internal/sessions/:session_id/terminate` - force termination
//! - `GET /internal/sessions/:session_id/history` - replay-verified history

use crate::actors::{AttachOutcome, AttachRequest, SessionActorHandle, SessionManagerHandle};
use crate::errors::{RejectionReason, SyncError};
use crate::model::event::{
    AuthorizedEvent, EventKind, GameEvent, Role, SessionInitPayload, SYSTEM_EMITTER,
};
use crate::model::frames::{ClientFrame, ServerFrame};
use crate::transport::FrameSink;

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use common::types::SessionId;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Header carrying the authenticated participant role.
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Frames buffered between a connection actor and its socket writer.
const SOCKET_WRITE_BUFFER: usize = 16;

/// Participant identity resolved by the auth gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
}

impl Identity {
    /// Read the trusted identity headers. Only participant roles may open a
    /// session connection.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let user_id = headers
            .get(USER_ID_HEADER)?
            .to_str()
            .ok()
            .map(str::trim)
            .filter(|id| !id.is_empty())?;
        let role = headers
            .get(USER_ROLE_HEADER)?
            .to_str()
            .ok()
            .and_then(Role::parse)
            .filter(|role| role.seat().is_some())?;
        Some(Self {
            user_id: user_id.to_string(),
            role,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachQuery {
    pub resume_from_sequence_id: Option<u64>,
}

/// Router for participant WebSocket connections.
pub fn ws_router(manager: SessionManagerHandle) -> Router {
    Router::new()
        .route("/sessions/:session_id/ws", get(ws_handler))
        .with_state(manager)
}

/// Router for the internal session API. Not exposed to participants.
pub fn internal_router(manager: SessionManagerHandle) -> Router {
    Router::new()
        .route("/internal/sessions", post(create_session))
        .route("/internal/sessions/:session_id", get(session_state))
        .route(
            "/internal/sessions/:session_id/terminate",
            post(terminate_session),
        )
        .route("/internal/sessions/:session_id/history", get(session_history))
        .with_state(manager)
}

async fn ws_handler(
    State(manager): State<SessionManagerHandle>,
    Path(session_id): Path<SessionId>,
    Query(query): Query<AttachQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(identity) = Identity::from_headers(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let session = match manager.session(session_id).await {
        Ok(session) => session,
        Err(e) => return e.into_response(),
    };

    ws.on_upgrade(move |socket| {
        serve_connection(socket, session, identity, query.resume_from_sequence_id)
    })
}

/// Outbound half of a participant WebSocket.
struct WsFrameSink {
    sender: mpsc::Sender<Message>,
}

#[async_trait]
impl FrameSink for WsFrameSink {
    async fn send(&mut self, frame: ServerFrame) -> Result<(), SyncError> {
        let text = serde_json::to_string(&frame)
            .map_err(|e| SyncError::Internal(format!("frame serialization failed: {e}")))?;
        self.sender
            .send(Message::Text(text))
            .await
            .map_err(|_| SyncError::Transport("socket writer stopped".to_string()))
    }

    async fn close(&mut self) {
        let _ = self.sender.send(Message::Close(None)).await;
    }
}

async fn write_loop(
    mut ws_sender: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Message>,
) {
    while let Some(message) = outbound.recv().await {
        let closing = matches!(message, Message::Close(_));
        if ws_sender.send(message).await.is_err() || closing {
            break;
        }
    }
    let _ = ws_sender.close().await;
}

async fn serve_connection(
    socket: WebSocket,
    session: SessionActorHandle,
    identity: Identity,
    resume_from: Option<u64>,
) {
    let session_id = session.session_id();
    let (ws_sender, ws_receiver) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::channel(SOCKET_WRITE_BUFFER);
    let writer = tokio::spawn(write_loop(ws_sender, outbound_rx));

    let request = AttachRequest {
        user_id: identity.user_id.clone(),
        role: identity.role,
        resume_from,
        sink: Box::new(WsFrameSink {
            sender: outbound_tx.clone(),
        }),
    };
    let outcome = match session.attach(request).await {
        Ok(outcome) => outcome,
        Err(e) => {
            info!(
                target: "sync.transport.ws",
                session_id = %session_id,
                role = identity.role.as_str(),
                error = %e,
                "Attach refused"
            );
            if let Ok(text) = serde_json::to_string(&ServerFrame::error(&e)) {
                let _ = outbound_tx.send(Message::Text(text)).await;
            }
            let _ = outbound_tx.send(Message::Close(None)).await;
            drop(outbound_tx);
            let _ = writer.await;
            return;
        }
    };
    drop(outbound_tx);

    info!(
        target: "sync.transport.ws",
        session_id = %session_id,
        connection_id = %outcome.connection_id,
        seat = outcome.seat.as_str(),
        "Participant connected"
    );

    read_loop(ws_receiver, &session, &identity, &outcome).await;

    if session.connection_closed(outcome.connection_id).await.is_err() {
        debug!(
            target: "sync.transport.ws",
            session_id = %session_id,
            "Session already closed"
        );
    }
    info!(
        target: "sync.transport.ws",
        session_id = %session_id,
        connection_id = %outcome.connection_id,
        "Participant disconnected"
    );
}

async fn read_loop(
    mut ws_receiver: SplitStream<WebSocket>,
    session: &SessionActorHandle,
    identity: &Identity,
    outcome: &AttachOutcome,
) {
    while let Some(message) = ws_receiver.next().await {
        let text = match message {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(_) => continue,
        };

        let keep_open = match serde_json::from_str::<ClientFrame>(&text) {
            Ok(frame) => handle_frame(frame, session, identity, outcome).await,
            Err(e) => {
                let err = SyncError::ValidationRejected {
                    event_id: None,
                    reason: RejectionReason::Malformed(e.to_string()),
                };
                session
                    .reply(outcome.connection_id, ServerFrame::error(&err))
                    .await
                    .is_ok()
            }
        };
        if !keep_open {
            break;
        }
    }
}

/// Returns false once the session is gone.
async fn handle_frame(
    frame: ClientFrame,
    session: &SessionActorHandle,
    identity: &Identity,
    outcome: &AttachOutcome,
) -> bool {
    let result = match frame {
        ClientFrame::Event { event } => {
            if event.emitter_id != identity.user_id {
                let err = SyncError::rejected(
                    event.event_id,
                    RejectionReason::Malformed(
                        "emitterId does not match the authenticated user".to_string(),
                    ),
                );
                return session
                    .reply(outcome.connection_id, ServerFrame::error(&err))
                    .await
                    .is_ok();
            }
            let response = match session
                .submit(AuthorizedEvent::new(event, identity.role))
                .await
            {
                Ok(accepted) => accepted.frame(),
                Err(e) => ServerFrame::error(&e),
            };
            session.reply(outcome.connection_id, response).await
        }
        ClientFrame::Ack { sequence_id } => session.ack(outcome.connection_id, sequence_id).await,
        ClientFrame::RequestSnapshot => session.request_snapshot(outcome.connection_id).await,
    };
    result.is_ok()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateSessionRequest {
    /// Caller-chosen id; a fresh one is issued when absent.
    session_id: Option<SessionId>,
    scenario_id: String,
}

#[derive(Debug, Default, Deserialize)]
struct TerminateRequest {
    #[serde(default)]
    reason: Option<String>,
}

async fn create_session(
    State(manager): State<SessionManagerHandle>,
    Json(request): Json<CreateSessionRequest>,
) -> Result<Response, SyncError> {
    let session_id = request.session_id.unwrap_or_default();
    let init = GameEvent::new(
        session_id,
        SYSTEM_EMITTER,
        EventKind::SessionInit(SessionInitPayload {
            scenario_id: request.scenario_id,
        }),
    );
    let accepted = manager
        .submit(AuthorizedEvent::new(init, Role::System))
        .await?;

    info!(
        target: "sync.transport.http",
        session_id = %session_id,
        "Session created through internal API"
    );
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "sessionId": session_id,
            "sequenceId": accepted.sequence_id,
        })),
    )
        .into_response())
}

async fn session_state(
    State(manager): State<SessionManagerHandle>,
    Path(session_id): Path<SessionId>,
) -> Result<Response, SyncError> {
    let view = manager.session_state(session_id).await?;
    let durability = if view.durability_degraded {
        "degraded"
    } else {
        "ok"
    };
    Ok(Json(json!({
        "sessionId": view.session_id,
        "phase": view.phase,
        "connectionCount": view.connection_count,
        "oldestRetainedSequenceId": view.oldest_retained_sequence_id,
        "durability": durability,
        "historyTruncated": view.history_truncated,
        "state": view.state,
    }))
    .into_response())
}

async fn terminate_session(
    State(manager): State<SessionManagerHandle>,
    Path(session_id): Path<SessionId>,
    request: Option<Json<TerminateRequest>>,
) -> Result<Response, SyncError> {
    let reason = request
        .and_then(|Json(body)| body.reason)
        .unwrap_or_else(|| "terminated by administrator".to_string());
    let accepted = manager.terminate(session_id, reason).await?;
    warn!(
        target: "sync.transport.http",
        session_id = %session_id,
        sequence_id = accepted.sequence_id,
        "Session force-terminated"
    );
    Ok(Json(json!({ "sequenceId": accepted.sequence_id })).into_response())
}

async fn session_history(
    State(manager): State<SessionManagerHandle>,
    Path(session_id): Path<SessionId>,
) -> Result<Response, SyncError> {
    let history = manager.session_history(session_id).await?;
    Ok(Json(history).into_response())
}
