//! Health endpoints for the Session Sync Service.
//!
//! - `GET /health` - Liveness probe (is the process running?)
//! - `GET /ready` - Readiness probe with a JSON body:
//!   `{"status": "ready"|"not_ready", "durability": "ok"|"degraded"}`
//!
//! Durability degradation is reported but does not fail readiness: live
//! sessions keep being served while the durable log is retried.
//!
//! The `/metrics` endpoint is merged in by `main` from the Prometheus
//! exporter handle.

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug)]
pub struct HealthState {
    /// Always true after startup.
    live: AtomicBool,
    /// True once listeners are bound; false while draining.
    ready: AtomicBool,
    /// Durable writers currently failing to append.
    degraded_writers: AtomicUsize,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (live=true, ready=false).
    #[must_use]
    pub fn new() -> Self {
        Self {
            live: AtomicBool::new(true),
            ready: AtomicBool::new(false),
            degraded_writers: AtomicUsize::new(0),
        }
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn set_not_ready(&self) {
        self.ready.store(false, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// A durable writer started failing. Paired with
    /// [`HealthState::durability_recovered`].
    pub fn durability_degraded(&self) {
        self.degraded_writers.fetch_add(1, Ordering::SeqCst);
    }

    /// A previously failing durable writer succeeded or stopped.
    pub fn durability_recovered(&self) {
        // Saturating: never wrap below zero on a stray extra call.
        let _ = self
            .degraded_writers
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    #[must_use]
    pub fn is_durability_degraded(&self) -> bool {
        self.degraded_writers.load(Ordering::SeqCst) > 0
    }
}

#[derive(Debug, Serialize)]
struct ReadinessBody {
    status: &'static str,
    durability: &'static str,
}

pub fn health_router(health_state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/health", get(liveness_handler))
        .route("/ready", get(readiness_handler))
        .with_state(health_state)
}

async fn liveness_handler(State(state): State<Arc<HealthState>>) -> StatusCode {
    if state.is_live() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

async fn readiness_handler(
    State(state): State<Arc<HealthState>>,
) -> (StatusCode, Json<ReadinessBody>) {
    let durability = if state.is_durability_degraded() {
        "degraded"
    } else {
        "ok"
    };
    if state.is_ready() {
        (
            StatusCode::OK,
            Json(ReadinessBody {
                status: "ready",
                durability,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReadinessBody {
                status: "not_ready",
                durability,
            }),
        )
    }
}
