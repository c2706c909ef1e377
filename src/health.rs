//! Health check HTTP endpoint for monitoring

use crate::metrics;
use axum::{routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

/// Cycles skipped in a row before the engine reports itself critical.
pub const CRITICAL_SKIP_STREAK: u64 = 3;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct HealthResponse {
    pub status: String, // "healthy", "degraded", "critical"
    pub version: String,
    pub cycles_completed: u64,
    pub cycles_skipped: u64,
    /// Skips since the last cycle that evaluated
    pub consecutive_skips: u64,
    pub last_skip_reason: Option<String>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub active_strategies: usize,
    pub strategies_needing_review: usize,
    pub in_flight_executions: usize,
    pub pending_submissions: usize,
    pub ledger_records: usize,
    pub uptime_seconds: u64,
    pub timestamp: i64,
}

impl Default for HealthResponse {
    fn default() -> Self {
        Self {
            status: "healthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            cycles_completed: 0,
            cycles_skipped: 0,
            consecutive_skips: 0,
            last_skip_reason: None,
            last_cycle_at: None,
            active_strategies: 0,
            strategies_needing_review: 0,
            in_flight_executions: 0,
            pending_submissions: 0,
            ledger_records: 0,
            uptime_seconds: 0,
            timestamp: Utc::now().timestamp(),
        }
    }
}

impl HealthResponse {
    /// Derive `status` from the counters.
    pub fn with_derived_status(mut self) -> Self {
        self.status = if self.consecutive_skips >= CRITICAL_SKIP_STREAK {
            "critical"
        } else if self.consecutive_skips > 0 || self.strategies_needing_review > 0 {
            "degraded"
        } else {
            "healthy"
        }
        .to_string();
        self
    }
}

// Shared health state, refreshed by the engine after every cycle
pub type HealthState = Arc<RwLock<HealthResponse>>;

pub fn create_health_state() -> HealthState {
    Arc::new(RwLock::new(HealthResponse::default()))
}

async fn health_check(
    axum::extract::State(state): axum::extract::State<HealthState>,
) -> Json<HealthResponse> {
    let health = state.read().await.clone();
    Json(health)
}

/// Prometheus metrics endpoint
async fn metrics_endpoint() -> String {
    metrics::gather_metrics()
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state)
}

/// Serve until `shutdown` flips to true. Bind failures are logged and the
/// engine keeps running without the endpoint.
pub async fn run_health_server(port: u16, state: HealthState, mut shutdown: watch::Receiver<bool>) {
    let app = router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(
                "Health server failed to bind to {}: {}. Engine will continue without health endpoint.",
                addr,
                e
            );
            return;
        }
    };
    tracing::info!("Health check server listening on {}", addr);

    let graceful = async move {
        while shutdown.changed().await.is_ok() {
            if *shutdown.borrow() {
                break;
            }
        }
    };
    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(graceful).await {
        tracing::error!("Health check server failed: {}", e);
    }
}
