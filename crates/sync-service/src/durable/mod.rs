//! Durable transition log.
//!
//! The engine hands every stamped transition to an external append-only log
//! and reads it back for session history and replay verification. Appends
//! are fire-and-forget from the session actor's point of view: the
//! per-session [`writer`] task retries failures with backoff and reports a
//! degraded-health signal instead of rejecting events.
//!
//! Implementations must make `append` idempotent per
//! `(session_id, sequence_id)` since the writer retries after ambiguous
//! failures.

pub mod memory;
pub mod redis;
pub mod writer;

use crate::errors::SyncError;
use async_trait::async_trait;
use common::types::SessionId;

pub use crate::engine::sequencer::StoredTransition;
pub use memory::InMemoryDurableLog;
pub use redis::RedisDurableLog;
pub use writer::{DurableWriter, DurableWriterHandle};

#[async_trait]
pub trait DurableLog: Send + Sync + 'static {
    /// Append one transition.
    async fn append(&self, transition: &StoredTransition) -> Result<(), SyncError>;

    /// Transitions of `session_id` with `sequence_id >= from_sequence_id`,
    /// in sequence order.
    async fn load_history(
        &self,
        session_id: SessionId,
        from_sequence_id: u64,
    ) -> Result<Vec<StoredTransition>, SyncError>;

    /// True if anything was ever appended for `session_id`.
    async fn has_history(&self, session_id: SessionId) -> Result<bool, SyncError>;
}
