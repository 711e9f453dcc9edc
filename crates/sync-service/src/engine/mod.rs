//! Session state synchronization engine.
//!
//! Pure, synchronous building blocks used by the session actor:
//!
//! - [`scenario`]: read-only node graph, items, techniques and thresholds
//! - [`metrics`]: metrics reducer
//! - [`reducer`]: state reducer with the terminal check
//! - [`sequencer`]: sequence stamping and the catch-up ring buffer
//! - [`replay`]: deterministic replay of the durable log

pub mod metrics;
pub mod reducer;
pub mod replay;
pub mod scenario;
pub mod sequencer;

pub use reducer::{initialize, reduce, Reduction};
pub use scenario::{Scenario, ScenarioLibrary};
pub use sequencer::{AckPair, CatchUp, Sequencer, StoredTransition, Transition};
