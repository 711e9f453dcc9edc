//! Session Sync Service error types.
//!
//! Error types map to numeric codes carried in client `ERROR` frames.
//! Internal details are logged server-side but not exposed to clients.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use common::types::{EventId, SessionId};
use serde::Serialize;
use thiserror::Error;

/// Client-facing error codes.
pub mod codes {
    /// Event failed validation; no state change.
    pub const VALIDATION_REJECTED: i32 = 1;
    /// Session (or seat) does not exist.
    pub const NOT_FOUND: i32 = 4;
    /// Duplicate init or seat already taken.
    pub const CONFLICT: i32 = 5;
    /// Anything the client cannot act on.
    pub const INTERNAL_ERROR: i32 = 6;
    /// Load shedding or shutdown in progress.
    pub const CAPACITY_EXCEEDED: i32 = 7;
    /// Client must discard local state and request a snapshot.
    pub const RESYNC_REQUIRED: i32 = 8;
}

/// Session Sync Service error type.
///
/// Maps to client error codes:
/// - `ValidationRejected`: `VALIDATION_REJECTED` (1)
/// - `SessionNotFound`: `NOT_FOUND` (4)
/// - `DuplicateInit`, `Conflict`: `CONFLICT` (5)
/// - `Draining`, `CapacityExceeded`: `CAPACITY_EXCEEDED` (7)
/// - `SequenceGapUnrecoverable`: `RESYNC_REQUIRED` (8)
/// - everything else: `INTERNAL_ERROR` (6)
#[derive(Debug, Error)]
pub enum SyncError {
    /// Malformed or illegal event. Reported to the sender only.
    #[error("Event rejected: {reason}")]
    ValidationRejected {
        /// Id of the rejected event, when it could be parsed.
        event_id: Option<EventId>,
        /// Why the reducer refused the event.
        reason: RejectionReason,
    },

    /// Unknown session id for a non-init event.
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// `SESSION_INIT` for a session id that is live or was already used.
    #[error("Session already initialized: {0}")]
    DuplicateInit(SessionId),

    /// Reconnect gap exceeds retained history.
    #[error("Sequence gap unrecoverable: client at {client_sequence_id}, latest {latest_sequence_id}")]
    SequenceGapUnrecoverable {
        client_sequence_id: u64,
        latest_sequence_id: u64,
    },

    /// Durable log appends are failing; live state keeps being served.
    #[error("Durable log degraded: {0}")]
    DurabilityDegraded(String),

    /// Durable log backend operation failed.
    #[error("Durable log error: {0}")]
    DurableLog(String),

    /// Stored transitions do not reproduce the stored states.
    #[error("Replay diverged at sequence {sequence_id}")]
    ReplayDivergence { sequence_id: u64 },

    /// Seat conflict (another user already holds the seat).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Outbound transport failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Service is shutting down.
    #[error("Service is draining")]
    Draining,

    /// Service is at its session limit.
    #[error("Service at capacity")]
    CapacityExceeded,

    /// Internal error (channel failures and other bugs).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Reasons the state reducer refuses an event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RejectionReason {
    #[error("event targets a different session")]
    SessionMismatch,

    #[error("session has already ended")]
    SessionTerminal,

    #[error("session already initialized")]
    AlreadyInitialized,

    #[error("{event_type} is not allowed while {status}")]
    IllegalForStatus {
        event_type: &'static str,
        status: &'static str,
    },

    #[error("{event_type} cannot be submitted by {role}")]
    WrongRole {
        event_type: &'static str,
        role: &'static str,
    },

    #[error("engine-originated events cannot be submitted")]
    EngineOriginated,

    #[error("seat is held by another participant")]
    SeatTaken,

    #[error("participant is already online")]
    AlreadyOnline,

    #[error("participant is not online")]
    NotOnline,

    #[error("activity unchanged")]
    ActivityUnchanged,

    #[error("unknown scenario: {0}")]
    UnknownScenario(String),

    #[error("choice refers to node {submitted}, current node is {current}")]
    StaleNode { submitted: String, current: String },

    #[error("unknown node: {0}")]
    UnknownNode(String),

    #[error("unknown choice: {0}")]
    UnknownChoice(String),

    #[error("choice {0} is not available yet")]
    ChoiceUnavailable(String),

    #[error("unknown item: {0}")]
    UnknownItem(String),

    #[error("item {item_id} cannot go from {from} via {action}")]
    IllegalItemTransition {
        item_id: String,
        from: &'static str,
        action: &'static str,
    },

    #[error("combine requires a target item")]
    MissingCombineTarget,

    #[error("unknown technique: {0}")]
    UnknownTechnique(String),

    #[error("technique {technique_id} does not affect {metric}")]
    UnsupportedMetric {
        technique_id: String,
        metric: &'static str,
    },

    #[error("intensity {0} outside 1..=10")]
    IntensityOutOfRange(u8),

    #[error("malformed event: {0}")]
    Malformed(String),
}

impl SyncError {
    /// Shorthand for a reducer rejection of a known event.
    #[must_use]
    pub fn rejected(event_id: EventId, reason: RejectionReason) -> Self {
        SyncError::ValidationRejected {
            event_id: Some(event_id),
            reason,
        }
    }

    /// Returns the client error code for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            SyncError::ValidationRejected { .. } => codes::VALIDATION_REJECTED,
            SyncError::SessionNotFound(_) => codes::NOT_FOUND,
            SyncError::DuplicateInit(_) | SyncError::Conflict(_) => codes::CONFLICT,
            SyncError::Draining | SyncError::CapacityExceeded => codes::CAPACITY_EXCEEDED,
            SyncError::SequenceGapUnrecoverable { .. } => codes::RESYNC_REQUIRED,
            SyncError::DurabilityDegraded(_)
            | SyncError::DurableLog(_)
            | SyncError::ReplayDivergence { .. }
            | SyncError::Transport(_)
            | SyncError::Config(_)
            | SyncError::Internal(_) => codes::INTERNAL_ERROR,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            SyncError::ValidationRejected { reason, .. } => reason.to_string(),
            SyncError::SessionNotFound(_) => "Session not found".to_string(),
            SyncError::DuplicateInit(_) => "Session already exists".to_string(),
            SyncError::Conflict(msg) => msg.clone(),
            SyncError::SequenceGapUnrecoverable { .. } => {
                "Local state is too old, request a snapshot".to_string()
            }
            SyncError::Draining => "Server is shutting down, please reconnect".to_string(),
            SyncError::CapacityExceeded => "Server is at capacity, please try again".to_string(),
            SyncError::DurabilityDegraded(_)
            | SyncError::DurableLog(_)
            | SyncError::ReplayDivergence { .. }
            | SyncError::Transport(_)
            | SyncError::Config(_)
            | SyncError::Internal(_) => "An internal error occurred".to_string(),
        }
    }

    /// Id of the event this error answers, if any.
    #[must_use]
    pub fn event_id(&self) -> Option<EventId> {
        match self {
            SyncError::ValidationRejected { event_id, .. } => *event_id,
            _ => None,
        }
    }

    /// HTTP status for the internal API.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            SyncError::ValidationRejected { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            SyncError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            SyncError::DuplicateInit(_) | SyncError::Conflict(_) => StatusCode::CONFLICT,
            SyncError::Draining | SyncError::CapacityExceeded => StatusCode::SERVICE_UNAVAILABLE,
            SyncError::SequenceGapUnrecoverable { .. } => StatusCode::GONE,
            SyncError::DurabilityDegraded(_)
            | SyncError::DurableLog(_)
            | SyncError::ReplayDivergence { .. }
            | SyncError::Transport(_)
            | SyncError::Config(_)
            | SyncError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Error response body for the internal HTTP API.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: i32,
    message: String,
}

impl IntoResponse for SyncError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(target: "sync.transport.http", error = %self, "Request failed");
        }
        let body = ErrorResponse {
            error: ErrorDetail {
                code: self.error_code(),
                message: self.client_message(),
            },
        };
        (status, Json(body)).into_response()
    }
}
