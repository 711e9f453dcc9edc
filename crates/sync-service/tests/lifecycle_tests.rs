//! Drain and idle timeouts.

use common::types::SessionId;
use std::time::Duration;
use sync_service::model::event::{EventKind, Role};
use sync_test_utils::{events, TestManager, DOCTOR, PATIENT};

async fn wait_closed(harness: &TestManager, session_id: SessionId) {
    tokio::time::timeout(Duration::from_secs(600), async {
        while harness.manager.session(session_id).await.is_ok() {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    })
    .await
    .expect("session closed in time");
}

#[tokio::test(start_paused = true)]
async fn test_drain_times_out_when_participants_never_ack() {
    let harness = TestManager::builder()
        .drain_timeout(Duration::from_secs(2))
        .build();
    let session_id = SessionId::new();
    harness.manager.submit(events::init(session_id)).await.unwrap();
    let _patient = harness.join(session_id, PATIENT, Role::Patient, None).await;
    let _doctor = harness.join(session_id, DOCTOR, Role::Doctor, None).await;

    harness
        .manager
        .terminate(session_id, "moderation")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(harness.manager.session(session_id).await.is_ok());

    tokio::time::sleep(Duration::from_secs(2)).await;
    wait_closed(&harness, session_id).await;
    assert_eq!(harness.manager.get_status().await.unwrap().session_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_session_is_terminated_through_the_pipeline() {
    let harness = TestManager::builder()
        .idle_timeout(Duration::from_secs(60))
        .build();
    let session_id = SessionId::new();
    harness.manager.submit(events::init(session_id)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(61)).await;
    wait_closed(&harness, session_id).await;

    harness.wait_persisted(session_id, 2).await;
    let history = harness.manager.session_history(session_id).await.unwrap();
    assert!(matches!(
        history.events.last().map(|event| &event.kind),
        Some(EventKind::SessionTerminated(payload)) if payload.reason == "idle timeout"
    ));
    assert!(history.final_state.is_terminal());
}
