//! A running session manager wired to test doubles.
//!
//! # Example
//!
//! ```rust,ignore
//! let harness = TestManager::builder().history_capacity(4).build();
//! harness.manager.submit(events::init(session_id)).await.unwrap();
//! let mut patient = harness.join(session_id, PATIENT, Role::Patient, None).await;
//! ```

use crate::fixtures::scenario_library;
use crate::mock_log::FlakyDurableLog;
use crate::sink::RecordingSink;
use common::types::SessionId;
use std::sync::Arc;
use std::time::Duration;
use sync_service::actors::{
    ActorMetrics, AttachOutcome, AttachRequest, ManagerContext, SessionActorHandle,
    SessionManagerHandle,
};
use sync_service::config::SessionSettings;
use sync_service::durable::DurableLog;
use sync_service::errors::SyncError;
use sync_service::model::event::Role;
use sync_service::model::frames::ServerFrame;
use sync_service::observability::HealthState;
use tokio::sync::mpsc;

/// How long `TestClient::next_frame` waits before failing the test.
const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Session manager plus the doubles behind it.
pub struct TestManager {
    pub manager: SessionManagerHandle,
    pub log: FlakyDurableLog,
    pub health: Arc<HealthState>,
}

/// Builder for [`TestManager`].
#[derive(Debug, Clone)]
pub struct TestManagerBuilder {
    settings: SessionSettings,
    max_sessions: usize,
    log: FlakyDurableLog,
}

impl TestManagerBuilder {
    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.settings.history_capacity = capacity;
        self
    }

    pub fn outbound_queue_capacity(mut self, capacity: usize) -> Self {
        self.settings.outbound_queue_capacity = capacity;
        self
    }

    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.settings.drain_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.settings.idle_timeout = timeout;
        self
    }

    pub fn max_sessions(mut self, max_sessions: usize) -> Self {
        self.max_sessions = max_sessions;
        self
    }

    /// Share a durable log with an earlier manager.
    pub fn log(mut self, log: FlakyDurableLog) -> Self {
        self.log = log;
        self
    }

    /// Spawn the manager. Must be called inside a Tokio runtime.
    pub fn build(self) -> TestManager {
        let health = Arc::new(HealthState::new());
        let manager = SessionManagerHandle::new(
            "sync-test".to_string(),
            ManagerContext {
                scenarios: scenario_library(),
                log: Arc::new(self.log.clone()) as Arc<dyn DurableLog>,
                health: Arc::clone(&health),
                settings: self.settings,
                max_sessions: self.max_sessions,
                metrics: ActorMetrics::new(),
            },
        );
        TestManager {
            manager,
            log: self.log,
            health,
        }
    }
}

impl TestManager {
    pub fn builder() -> TestManagerBuilder {
        TestManagerBuilder {
            settings: SessionSettings::default(),
            max_sessions: 64,
            log: FlakyDurableLog::new(),
        }
    }

    /// Manager with default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Attach a participant, panicking on refusal.
    pub async fn join(
        &self,
        session_id: SessionId,
        user_id: &str,
        role: Role,
        resume_from: Option<u64>,
    ) -> TestClient {
        self.try_join(session_id, user_id, role, resume_from)
            .await
            .expect("attach accepted")
    }

    pub async fn try_join(
        &self,
        session_id: SessionId,
        user_id: &str,
        role: Role,
        resume_from: Option<u64>,
    ) -> Result<TestClient, SyncError> {
        let session = self.manager.session(session_id).await?;
        let (sink, frames) = RecordingSink::new();
        let outcome = session
            .attach(AttachRequest {
                user_id: user_id.to_string(),
                role,
                resume_from,
                sink: Box::new(sink),
            })
            .await?;
        Ok(TestClient {
            session,
            outcome,
            frames,
        })
    }
}

impl TestManager {
    /// Wait until the durable writer persisted `count` transitions.
    pub async fn wait_persisted(&self, session_id: SessionId, count: usize) {
        tokio::time::timeout(FRAME_TIMEOUT, async {
            while self.log.len(session_id).await < count {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("transitions persisted in time");
    }
}

impl Default for TestManager {
    fn default() -> Self {
        Self::new()
    }
}

/// One attached participant and the frames it received.
pub struct TestClient {
    pub session: SessionActorHandle,
    pub outcome: AttachOutcome,
    pub frames: mpsc::UnboundedReceiver<ServerFrame>,
}

impl TestClient {
    /// Next frame, failing the test if none arrives in time.
    pub async fn next_frame(&mut self) -> ServerFrame {
        tokio::time::timeout(FRAME_TIMEOUT, self.frames.recv())
            .await
            .expect("frame arrived in time")
            .expect("connection still open")
    }

    /// The next `count` frames.
    pub async fn take(&mut self, count: usize) -> Vec<ServerFrame> {
        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            frames.push(self.next_frame().await);
        }
        frames
    }

    /// Frames until the next `STATE_UPDATE` for `sequence_id`, inclusive.
    pub async fn until_sequence(&mut self, sequence_id: u64) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        loop {
            let frame = self.next_frame().await;
            let done = frame.state_update_sequence() == Some(sequence_id);
            frames.push(frame);
            if done {
                return frames;
            }
        }
    }

    /// Acknowledge everything up to `sequence_id`.
    pub async fn ack(&self, sequence_id: u64) {
        self.session
            .ack(self.outcome.connection_id, sequence_id)
            .await
            .expect("ack delivered");
    }

    /// Drop the connection as the transport would.
    pub async fn disconnect(&self) {
        self.session
            .connection_closed(self.outcome.connection_id)
            .await
            .expect("close delivered");
    }
}

/// `newSequenceId` of every `STATE_UPDATE` in `frames`.
pub fn sequences(frames: &[ServerFrame]) -> Vec<u64> {
    frames
        .iter()
        .filter_map(ServerFrame::state_update_sequence)
        .collect()
}
