//! Durable log mock with switchable append failures.
//!
//! # Example
//!
//! ```rust,ignore
//! use sync_test_utils::FlakyDurableLog;
//!
//! let log = FlakyDurableLog::new();
//! log.fail_appends(true);
//! // ... appends now return `SyncError::DurableLog`
//! log.fail_appends(false);
//! ```

use async_trait::async_trait;
use common::types::SessionId;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use sync_service::durable::{DurableLog, InMemoryDurableLog, StoredTransition};
use sync_service::errors::SyncError;

/// In-memory durable log whose appends fail while `fail_appends(true)`.
#[derive(Debug, Clone, Default)]
pub struct FlakyDurableLog {
    inner: Arc<InMemoryDurableLog>,
    failing: Arc<AtomicBool>,
    failed_attempts: Arc<AtomicUsize>,
}

impl FlakyDurableLog {
    /// Create a healthy, empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start or stop failing appends.
    pub fn fail_appends(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Appends rejected so far.
    pub fn failed_attempts(&self) -> usize {
        self.failed_attempts.load(Ordering::SeqCst)
    }

    /// Transitions persisted for `session_id`.
    pub async fn len(&self, session_id: SessionId) -> usize {
        self.inner.len(session_id).await
    }
}

#[async_trait]
impl DurableLog for FlakyDurableLog {
    async fn append(&self, transition: &StoredTransition) -> Result<(), SyncError> {
        if self.failing.load(Ordering::SeqCst) {
            self.failed_attempts.fetch_add(1, Ordering::SeqCst);
            return Err(SyncError::DurableLog("injected append failure".to_string()));
        }
        self.inner.append(transition).await
    }

    async fn load_history(
        &self,
        session_id: SessionId,
        from_sequence_id: u64,
    ) -> Result<Vec<StoredTransition>, SyncError> {
        self.inner.load_history(session_id, from_sequence_id).await
    }

    async fn has_history(&self, session_id: SessionId) -> Result<bool, SyncError> {
        self.inner.has_history(session_id).await
    }
}
