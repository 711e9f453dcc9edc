//! Redis-backed durable log.
//!
//! # Key Patterns
//!
//! - `session:{id}:log` - sorted set of JSON `StoredTransition`s scored by
//!   sequence id
//!
//! Appends use `ZADD NX` so a retried append of the same transition is a
//! no-op.
//!
//! # Connection Pattern
//!
//! `MultiplexedConnection` is cheap to clone and safe to use concurrently;
//! each operation clones it instead of locking.

use crate::durable::{DurableLog, StoredTransition};
use crate::errors::SyncError;
use async_trait::async_trait;
use common::types::SessionId;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use tracing::{error, instrument, warn};

#[derive(Clone)]
pub struct RedisDurableLog {
    connection: MultiplexedConnection,
}

impl RedisDurableLog {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `SyncError::DurableLog` if the URL is invalid or the
    /// connection fails.
    pub async fn connect(redis_url: &str) -> Result<Self, SyncError> {
        let client = Client::open(redis_url).map_err(|e| {
            // The URL may carry credentials; never log it.
            error!(
                target: "sync.durable.redis",
                error = %e,
                "Failed to open Redis client"
            );
            SyncError::DurableLog(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(
                    target: "sync.durable.redis",
                    error = %e,
                    "Failed to connect to Redis"
                );
                SyncError::DurableLog(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self { connection })
    }

    fn log_key(session_id: SessionId) -> String {
        format!("session:{session_id}:log")
    }
}

#[async_trait]
impl DurableLog for RedisDurableLog {
    #[instrument(skip_all, fields(session_id = %transition.session_id, sequence_id = transition.sequence_id))]
    async fn append(&self, transition: &StoredTransition) -> Result<(), SyncError> {
        let mut conn = self.connection.clone();
        let key = Self::log_key(transition.session_id);
        let json = serde_json::to_string(transition)
            .map_err(|e| SyncError::Internal(format!("Failed to serialize transition: {e}")))?;

        let _added: i64 = redis::cmd("ZADD")
            .arg(&key)
            .arg("NX")
            .arg(transition.sequence_id)
            .arg(json)
            .query_async(&mut conn)
            .await
            .map_err(|e| {
                warn!(
                    target: "sync.durable.redis",
                    error = %e,
                    session_id = %transition.session_id,
                    sequence_id = transition.sequence_id,
                    "Failed to append transition"
                );
                SyncError::DurableLog(format!("Failed to append transition: {e}"))
            })?;

        Ok(())
    }

    #[instrument(skip_all, fields(session_id = %session_id, from = from_sequence_id))]
    async fn load_history(
        &self,
        session_id: SessionId,
        from_sequence_id: u64,
    ) -> Result<Vec<StoredTransition>, SyncError> {
        let mut conn = self.connection.clone();
        let key = Self::log_key(session_id);

        let raw: Vec<String> = conn
            .zrangebyscore(&key, from_sequence_id, "+inf")
            .await
            .map_err(|e| {
                warn!(
                    target: "sync.durable.redis",
                    error = %e,
                    session_id = %session_id,
                    "Failed to load history"
                );
                SyncError::DurableLog(format!("Failed to load history: {e}"))
            })?;

        raw.iter()
            .map(|json| {
                serde_json::from_str(json).map_err(|e| {
                    SyncError::DurableLog(format!("Corrupt transition in {key}: {e}"))
                })
            })
            .collect()
    }

    #[instrument(skip_all, fields(session_id = %session_id))]
    async fn has_history(&self, session_id: SessionId) -> Result<bool, SyncError> {
        let mut conn = self.connection.clone();
        conn.exists(Self::log_key(session_id)).await.map_err(|e| {
            warn!(
                target: "sync.durable.redis",
                error = %e,
                session_id = %session_id,
                "Failed to check for history"
            );
            SyncError::DurableLog(format!("Failed to check for history: {e}"))
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_log_key_format() {
        let session_id = SessionId::new();
        assert_eq!(
            RedisDurableLog::log_key(session_id),
            format!("session:{session_id}:log")
        );
    }

    #[tokio::test]
    async fn test_invalid_url_is_durable_log_error() {
        let result = RedisDurableLog::connect("not-a-redis-url").await;
        assert!(matches!(result, Err(SyncError::DurableLog(_))));
    }
}
