//! # Sync Test Utilities
//!
//! Shared test utilities for the Session Sync Service.
//!
//! This crate provides mock implementations and test fixtures for
//! exercising the actor system without real infrastructure:
//!
//! - `fixtures` - The shipped scenario library and event builders
//! - `mock_log` - Durable log whose appends can be made to fail
//! - `sink` - Frame sink that records every frame sent to a participant
//! - `harness` - A running `SessionManagerHandle` wired to the above
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sync_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let harness = TestManager::new();
//!     let session_id = SessionId::new();
//!     harness.manager.submit(events::init(session_id)).await.unwrap();
//!
//!     let mut patient = harness.join(session_id, PATIENT, Role::Patient, None).await;
//!     let snapshot = patient.next_frame().await;
//! }
//! ```

pub mod fixtures;
pub mod harness;
pub mod mock_log;
pub mod sink;

// Re-export commonly used items
pub use fixtures::{events, scenario_library, DOCTOR, PATIENT, SCENARIO};
pub use harness::{sequences, TestClient, TestManager, TestManagerBuilder};
pub use mock_log::FlakyDurableLog;
pub use sink::RecordingSink;
