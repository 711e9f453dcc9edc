//! Wire data model shared by the engine, the actors and the transport.

pub mod event;
pub mod frames;
pub mod state;

pub use event::{AuthorizedEvent, EventKind, GameEvent, Role};
pub use frames::{ClientFrame, ServerFrame};
pub use state::{InvestigationState, Seat, SessionStatus};
