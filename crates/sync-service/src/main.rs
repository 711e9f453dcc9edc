//! Session Sync Service
//!
//! Authoritative state synchronization server for two-participant
//! investigation sessions.
//!
//! # Servers
//!
//! - WebSocket server for participant connections (default: 0.0.0.0:8090)
//! - HTTP server for health, metrics and the internal session API
//!   (default: 0.0.0.0:8091)
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Load the scenario library
//! 4. Open the durable log (memory or Redis)
//! 5. Initialize actor system (`SessionManagerHandle`)
//! 6. Bind and start the health/internal server, then the WebSocket server
//! 7. Mark ready and wait for shutdown signal

#![warn(clippy::pedantic)]
#![allow(clippy::too_many_lines)] // main.rs orchestrates startup, naturally longer

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use secrecy::ExposeSecret;
use sync_service::actors::{ActorMetrics, ManagerContext, SessionManagerHandle};
use sync_service::config::{Config, DurableBackend};
use sync_service::durable::{DurableLog, InMemoryDurableLog, RedisDurableLog};
use sync_service::engine::ScenarioLibrary;
use sync_service::observability::{health_router, init_metrics_recorder, HealthState};
use sync_service::transport::{internal_router, ws_router};
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time the actor system gets to flush durable writers on shutdown.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sync_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Session Sync Service");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        service_id = %config.service_id,
        ws_bind_address = %config.ws_bind_address,
        health_bind_address = %config.health_bind_address,
        durable_backend = ?config.durable_backend,
        history_capacity = config.history_capacity,
        outbound_queue_capacity = config.outbound_queue_capacity,
        durable_backlog_capacity = config.durable_backlog_capacity,
        max_sessions = config.max_sessions,
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder
    // This must happen before any metrics are recorded
    let prometheus_handle = init_metrics_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        e
    })?;
    info!("Prometheus metrics recorder initialized");

    let health_state = Arc::new(HealthState::new());

    let scenarios = ScenarioLibrary::from_file(Path::new(&config.scenario_path)).map_err(|e| {
        error!(error = %e, path = %config.scenario_path, "Failed to load scenario library");
        e
    })?;
    info!(scenarios = scenarios.len(), "Scenario library loaded");

    let log: Arc<dyn DurableLog> = match (config.durable_backend, &config.redis_url) {
        (DurableBackend::Redis, Some(redis_url)) => {
            info!("Connecting to Redis...");
            let log = RedisDurableLog::connect(redis_url.expose_secret())
                .await
                .map_err(|e| {
                    error!(error = %e, "Failed to connect to Redis");
                    e
                })?;
            info!("Redis connection established");
            Arc::new(log)
        }
        (DurableBackend::Redis, None) => {
            return Err("REDIS_URL is required for the redis durable log".into());
        }
        (DurableBackend::Memory, _) => {
            warn!("Using in-memory durable log; history is lost on restart");
            Arc::new(InMemoryDurableLog::new())
        }
    };

    // Initialize actor system
    info!("Initializing actor system...");
    let manager = SessionManagerHandle::new(
        config.service_id.clone(),
        ManagerContext {
            scenarios: Arc::new(scenarios),
            log,
            health: Arc::clone(&health_state),
            settings: config.session_settings(),
            max_sessions: config.max_sessions,
            metrics: ActorMetrics::new(),
        },
    );
    info!("Actor system initialized");

    // Servers stop when the manager's token is cancelled
    let shutdown_token = manager.child_token();

    // Health, metrics and internal API
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state))
        .merge(metrics_router)
        .merge(internal_router(manager.clone()))
        .layer(TraceLayer::new_for_http());

    // Bind listeners BEFORE spawning to fail fast on bind errors
    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;

    let ws_addr: SocketAddr = config.ws_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.ws_bind_address, "Invalid WebSocket bind address");
        format!("Invalid WebSocket bind address: {e}")
    })?;
    let ws_listener = tokio::net::TcpListener::bind(ws_addr).await.map_err(|e| {
        error!(error = %e, addr = %ws_addr, "Failed to bind WebSocket server");
        format!("Failed to bind WebSocket server to {ws_addr}: {e}")
    })?;

    let health_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    let ws_app = ws_router(manager.clone()).layer(TraceLayer::new_for_http());
    let ws_shutdown_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %ws_addr, "WebSocket server starting");
        let server = axum::serve(ws_listener, ws_app).with_graceful_shutdown(async move {
            ws_shutdown_token.cancelled().await;
            info!("WebSocket server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "WebSocket server failed");
        }
    });

    health_state.set_ready();
    info!("Session Sync Service running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, initiating graceful shutdown...");

    // Mark as not ready immediately so the load balancer stops sending traffic
    health_state.set_not_ready();

    // Sessions stop, writers flush, then the servers stop with the token
    if let Err(e) = manager.shutdown(SHUTDOWN_DEADLINE).await {
        warn!(error = %e, "Actor system shutdown error");
    }
    shutdown_token.cancel();

    info!("Session Sync Service shutdown complete");
    Ok(())
}

/// Wait for SIGTERM or Ctrl+C.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
}
