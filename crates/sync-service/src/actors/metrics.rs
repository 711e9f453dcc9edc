//! Actor bookkeeping and mailbox monitoring.
//!
//! | Actor Type | Normal | Warning | Critical |
//! |------------|--------|---------|----------|
//! | Manager    | < 200  | 200-800 | > 800    |
//! | Session    | < 100  | 100-400 | > 400    |
//! | Connection | < 32   | 32-56   | > 56     |
//!
//! Session and manager depths are sampled from the receiver after each
//! dequeue. Connection queues are bounded by the outbound capacity, so the
//! registry drops a connection long before its monitor would go critical.

use crate::observability::metrics as prom;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Mailbox depth thresholds for the manager actor.
pub const MANAGER_MAILBOX_NORMAL: usize = 200;
pub const MANAGER_MAILBOX_WARNING: usize = 800;

/// Mailbox depth thresholds for session actors.
pub const SESSION_MAILBOX_NORMAL: usize = 100;
pub const SESSION_MAILBOX_WARNING: usize = 400;

/// Mailbox depth thresholds for connection actors.
pub const CONNECTION_MAILBOX_NORMAL: usize = 32;
pub const CONNECTION_MAILBOX_WARNING: usize = 56;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// `SessionManagerActor` (singleton).
    Manager,
    /// `SessionActor` (one per live session).
    Session,
    /// `ConnectionActor` (one per attached participant connection).
    Connection,
}

impl ActorType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Manager => "manager",
            ActorType::Session => "session",
            ActorType::Connection => "connection",
        }
    }

    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Manager => MANAGER_MAILBOX_NORMAL,
            ActorType::Session => SESSION_MAILBOX_NORMAL,
            ActorType::Connection => CONNECTION_MAILBOX_NORMAL,
        }
    }

    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Manager => MANAGER_MAILBOX_WARNING,
            ActorType::Session => SESSION_MAILBOX_WARNING,
            ActorType::Connection => CONNECTION_MAILBOX_WARNING,
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    Normal,
    Warning,
    Critical,
}

/// Tracks one actor's mailbox depth and throughput.
///
/// Owned by the actor's task; only the actor itself records into it.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    actor_id: String,
    depth: usize,
    peak_depth: usize,
    level: MailboxLevel,
    messages_processed: u64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType, actor_id: impl Into<String>) -> Self {
        Self {
            actor_type,
            actor_id: actor_id.into(),
            depth: 0,
            peak_depth: 0,
            level: MailboxLevel::Normal,
            messages_processed: 0,
        }
    }

    /// Record one dequeued message and the depth left behind it.
    pub fn record_dequeue(&mut self, remaining: usize) {
        self.messages_processed = self.messages_processed.saturating_add(1);
        self.depth = remaining;
        self.peak_depth = self.peak_depth.max(remaining);
        prom::set_actor_mailbox_depth(self.actor_type.as_str(), remaining);

        let level = self.level_for_depth(remaining);
        if level != self.level {
            match level {
                MailboxLevel::Critical => warn!(
                    target: "sync.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    actor_id = %self.actor_id,
                    depth = remaining,
                    threshold = self.actor_type.warning_threshold(),
                    "Mailbox depth critical"
                ),
                MailboxLevel::Warning => debug!(
                    target: "sync.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    actor_id = %self.actor_id,
                    depth = remaining,
                    "Mailbox depth elevated"
                ),
                MailboxLevel::Normal => debug!(
                    target: "sync.actor.mailbox",
                    actor_type = self.actor_type.as_str(),
                    actor_id = %self.actor_id,
                    depth = remaining,
                    "Mailbox depth back to normal"
                ),
            }
            self.level = level;
        }
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth >= self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Counters shared across the actor tree.
///
/// Each update is mirrored to the Prometheus gauges so `/metrics` and
/// [`crate::actors::ManagerStatus`] agree.
#[derive(Debug, Default)]
pub struct ActorMetrics {
    active_sessions: AtomicUsize,
    active_connections: AtomicUsize,
    actor_panics: AtomicU64,
    total_messages_processed: AtomicU64,
}

impl ActorMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn session_created(&self) {
        let count = self.active_sessions.fetch_add(1, Ordering::Relaxed) + 1;
        prom::set_sessions_active(count);
    }

    pub fn session_removed(&self) {
        let previous = self
            .active_sessions
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .unwrap_or(0);
        prom::set_sessions_active(previous.saturating_sub(1));
    }

    pub fn connection_attached(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        prom::connection_attached();
    }

    pub fn connection_detached(&self) {
        if self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| n.checked_sub(1))
            .is_ok()
        {
            prom::connection_detached();
        }
    }

    /// Record an actor panic.
    pub fn record_panic(&self, actor_type: ActorType) {
        let total = self.actor_panics.fetch_add(1, Ordering::Relaxed) + 1;
        prom::record_actor_panic(actor_type.as_str());
        error!(
            target: "sync.actor.mailbox",
            actor_type = actor_type.as_str(),
            total_panics = total,
            "Actor panic detected - indicates bug, investigation required"
        );
    }

    pub fn record_message_processed(&self) {
        self.total_messages_processed
            .fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn panic_count(&self) -> u64 {
        self.actor_panics.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.total_messages_processed.load(Ordering::Relaxed)
    }
}
