//! Common utilities and types shared across the session sync crates.

#![warn(clippy::pedantic)]

/// Module for identifier newtypes
pub mod types;

/// Module for the retry backoff policy used by background writers
pub mod backoff;
