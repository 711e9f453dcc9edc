//! Observability for the Session Sync Service.
//!
//! # Privacy by Default
//!
//! Instrumentation uses `#[instrument(skip_all)]` with explicit fields.
//! Ids, sequence numbers and event type names are logged; payload contents
//! such as surrender or termination reasons are not.

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::{init_metrics_recorder, record_actor_panic, set_actor_mailbox_depth};
