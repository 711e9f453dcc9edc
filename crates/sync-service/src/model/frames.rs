//! Transport frames exchanged with participant connections.
//!
//! Frames are JSON objects discriminated by `kind`:
//!
//! - server to client: `EVENT` (`STATE_UPDATE` / `GAME_OVER`), `ACCEPTED`,
//!   `ERROR`, `RESYNC`, `SNAPSHOT`
//! - client to server: `EVENT`, `ACK`, `REQUEST_SNAPSHOT`

use crate::errors::SyncError;
use crate::model::event::{EventKind, GameEvent};
use crate::model::state::InvestigationState;
use common::types::EventId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ServerFrame {
    /// Engine output shared by every recipient.
    Event { event: Arc<GameEvent> },
    /// Sent to the submitting connection once its event is sequenced.
    Accepted { event_id: EventId, sequence_id: u64 },
    /// Sent to the submitting connection only.
    Error {
        event_id: Option<EventId>,
        code: i32,
        message: String,
    },
    /// Discard local state and send `REQUEST_SNAPSHOT`.
    Resync { latest_sequence_id: u64 },
    /// Full current state.
    Snapshot { state: Arc<InvestigationState> },
}

impl ServerFrame {
    /// Error frame carrying the client-safe view of `err`.
    #[must_use]
    pub fn error(err: &SyncError) -> Self {
        ServerFrame::Error {
            event_id: err.event_id(),
            code: err.error_code(),
            message: err.client_message(),
        }
    }

    /// `newSequenceId` of a `STATE_UPDATE` frame.
    #[must_use]
    pub fn state_update_sequence(&self) -> Option<u64> {
        match self {
            ServerFrame::Event { event } => match &event.kind {
                EventKind::StateUpdate(update) => Some(update.new_sequence_id),
                _ => None,
            },
            _ => None,
        }
    }

    #[must_use]
    pub fn is_game_over(&self) -> bool {
        matches!(self, ServerFrame::Event { event } if matches!(event.kind, EventKind::GameOver(_)))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "kind",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ClientFrame {
    Event { event: GameEvent },
    Ack { sequence_id: u64 },
    RequestSnapshot,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::errors::RejectionReason;
    use serde_json::json;

    #[test]
    fn test_error_frame_from_rejection() {
        let event_id = EventId::new();
        let err = SyncError::rejected(event_id, RejectionReason::SessionTerminal);

        let value = serde_json::to_value(ServerFrame::error(&err)).unwrap();
        assert_eq!(value["kind"], "ERROR");
        assert_eq!(value["eventId"], event_id.to_string());
        assert_eq!(value["code"], 1);
        assert_eq!(value["message"], "session has already ended");
    }

    #[test]
    fn test_resync_frame_shape() {
        let value = serde_json::to_value(ServerFrame::Resync {
            latest_sequence_id: 912,
        })
        .unwrap();
        assert_eq!(value, json!({ "kind": "RESYNC", "latestSequenceId": 912 }));
    }

    #[test]
    fn test_client_frames_parse() {
        let ack: ClientFrame =
            serde_json::from_value(json!({ "kind": "ACK", "sequenceId": 4 })).unwrap();
        assert_eq!(ack, ClientFrame::Ack { sequence_id: 4 });

        let snapshot: ClientFrame =
            serde_json::from_value(json!({ "kind": "REQUEST_SNAPSHOT" })).unwrap();
        assert_eq!(snapshot, ClientFrame::RequestSnapshot);

        let bogus = serde_json::from_value::<ClientFrame>(json!({ "kind": "SHOUT" }));
        assert!(bogus.is_err());
    }

    #[test]
    fn test_client_event_frame_parses_nested_event() {
        let value = json!({
            "kind": "EVENT",
            "event": {
                "eventId": EventId::new(),
                "timestamp": 5,
                "emitterId": "patient-1",
                "sessionId": common::types::SessionId::new(),
                "type": "ACTIVITY_CHANGED",
                "payload": { "activity": "TYPING" }
            }
        });

        let frame: ClientFrame = serde_json::from_value(value).unwrap();
        assert!(matches!(
            frame,
            ClientFrame::Event { event } if event.type_name() == "ACTIVITY_CHANGED"
        ));
    }
}
