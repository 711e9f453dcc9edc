//! Actor model for the Session Sync Service.
//!
//! ```text
//! SessionManagerActor (singleton per instance)
//! └── supervises N SessionActors
//!     └── SessionActor (one per live session, single writer)
//!         ├── owns the sequencer and the ConnectionRegistry
//!         ├── feeds a DurableWriter (one per session)
//!         └── supervises 0-2 ConnectionActors
//!             └── ConnectionActor (one per participant connection)
//! ```
//!
//! Cancellation flows down through child `CancellationToken`s. Handles are
//! cheap to clone and talk to their actor through bounded `mpsc` mailboxes.

pub mod connection;
pub mod manager;
pub mod messages;
pub mod metrics;
pub mod registry;
pub mod session;

pub use connection::{ConnectionActor, ConnectionHandle, DeliveryError};
pub use manager::{ManagerContext, SessionManagerActor, SessionManagerHandle};
pub use messages::{
    Accepted, AttachOutcome, AttachRequest, ManagerStatus, SessionHistory, SessionPhase,
    SessionView,
};
pub use metrics::{ActorMetrics, ActorType, MailboxMonitor};
pub use registry::ConnectionRegistry;
pub use session::{Genesis, SessionActor, SessionActorHandle};
