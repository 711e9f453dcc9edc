//! Participant transport.
//!
//! The actors only see [`FrameSink`], the outbound half of a connection.
//! [`websocket`] adapts axum WebSockets to it and feeds inbound frames to
//! the session actors.

pub mod websocket;

use crate::errors::SyncError;
use crate::model::frames::ServerFrame;
use async_trait::async_trait;

pub use websocket::{internal_router, ws_router};

/// Outbound half of one participant connection.
///
/// Driven by exactly one `ConnectionActor`, so implementations need no
/// internal locking. Actor futures hold it across awaits, so it must be
/// `Sync` as well as `Send`.
#[async_trait]
pub trait FrameSink: Send + Sync + 'static {
    /// Write one frame.
    ///
    /// # Errors
    ///
    /// `SyncError::Transport` once the connection is unusable. The caller
    /// stops writing and reports the connection closed.
    async fn send(&mut self, frame: ServerFrame) -> Result<(), SyncError>;

    /// Close the connection after the last frame.
    async fn close(&mut self) {}
}
