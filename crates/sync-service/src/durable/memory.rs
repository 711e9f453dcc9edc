//! In-process durable log for single-instance deployments and tests.

use crate::durable::{DurableLog, StoredTransition};
use crate::errors::SyncError;
use async_trait::async_trait;
use common::types::SessionId;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct InMemoryDurableLog {
    sessions: RwLock<HashMap<SessionId, BTreeMap<u64, StoredTransition>>>,
}

impl InMemoryDurableLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored transitions for a session.
    pub async fn len(&self, session_id: SessionId) -> usize {
        self.sessions
            .read()
            .await
            .get(&session_id)
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl DurableLog for InMemoryDurableLog {
    async fn append(&self, transition: &StoredTransition) -> Result<(), SyncError> {
        self.sessions
            .write()
            .await
            .entry(transition.session_id)
            .or_default()
            .insert(transition.sequence_id, transition.clone());
        Ok(())
    }

    async fn load_history(
        &self,
        session_id: SessionId,
        from_sequence_id: u64,
    ) -> Result<Vec<StoredTransition>, SyncError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(&session_id)
            .map(|entries| {
                entries
                    .range(from_sequence_id..)
                    .map(|(_, transition)| transition.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn has_history(&self, session_id: SessionId) -> Result<bool, SyncError> {
        Ok(self
            .sessions
            .read()
            .await
            .get(&session_id)
            .is_some_and(|entries| !entries.is_empty()))
    }
}
