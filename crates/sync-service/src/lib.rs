//! Session Sync Service Library
//!
//! Authoritative state synchronization for two-participant investigation
//! sessions:
//!
//! - Validates and reduces participant events against a scenario table
//! - Sequences every accepted transition and broadcasts it to both seats
//! - Replays missed transitions to reconnecting participants, or tells them
//!   to resync when the gap is no longer retained
//! - Appends transitions to a durable log that replays deterministically
//!
//! # Architecture
//!
//! ```text
//! SessionManagerActor (singleton per instance)
//! └── SessionActor (one per live session, single writer)
//!     ├── Sequencer + ConnectionRegistry
//!     ├── DurableWriter
//!     └── ConnectionActor (one per participant connection)
//! ```
//!
//! # Modules
//!
//! - [`model`] - wire data model (events, state, frames)
//! - [`engine`] - scenario table, reducers, sequencer, replay
//! - [`actors`] - manager, session and connection actors
//! - [`durable`] - durable log trait, backends and background writer
//! - [`transport`] - WebSocket adapter and internal API
//! - [`observability`] - health endpoints and Prometheus metrics
//! - [`config`] - service configuration from environment
//! - [`errors`] - error types with client error codes

pub mod actors;
pub mod config;
pub mod durable;
pub mod engine;
pub mod errors;
pub mod model;
pub mod observability;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_support;
