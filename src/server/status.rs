use crate::keys::{ApiKeyHealth, KeyHealthRegistry};
use crate::resilience::{CircuitBreakerManager, CircuitBreakerStats, OverallStatus, SystemHealth};
use crate::{Error, Result};
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

/// Shared handles behind the status routes
#[derive(Debug, Clone)]
pub struct AppState {
    pub manager: Arc<CircuitBreakerManager>,
    pub keys: Arc<KeyHealthRegistry>,
}

/// Key pool summary for `/health`
#[derive(Debug, Clone, Serialize)]
pub struct KeySummary {
    pub total: usize,
    pub healthy: usize,
    pub rate_limited: usize,
}

impl KeySummary {
    fn from_status(status: &[ApiKeyHealth]) -> Self {
        Self {
            total: status.len(),
            healthy: status.iter().filter(|k| k.is_healthy).count(),
            rate_limited: status
                .iter()
                .filter(|k| k.rate_limit_reset_time.is_some())
                .count(),
        }
    }
}

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: OverallStatus,
    pub breakers: SystemHealth,
    pub keys: KeySummary,
    pub timestamp: DateTime<Utc>,
}

/// Build the status router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/health/live", get(liveness_handler))
        .route("/health/breakers", get(breakers_handler))
        .route("/health/keys", get(keys_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Read-only HTTP view over breaker and key health
#[derive(Debug)]
pub struct StatusServer {
    addr: SocketAddr,
    state: AppState,
}

impl StatusServer {
    #[must_use]
    pub const fn new(addr: SocketAddr, state: AppState) -> Self {
        Self { addr, state }
    }

    /// Serve until `shutdown` resolves
    #[instrument(skip(self, shutdown), fields(addr = %self.addr))]
    pub async fn start<S>(self, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()> + Send + 'static,
    {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .map_err(|e| Error::Service(format!("Failed to bind status port: {e}")))?;

        info!("Status endpoint listening on {}", self.addr);

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Service(format!("Status server error: {e}")))?;

        info!("Status endpoint stopped");
        Ok(())
    }
}

/// Overall health; 503 when most breakers are open
async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let breakers = state.manager.get_system_health().await;
    let keys = KeySummary::from_status(&state.keys.get_health_status());

    let status_code = if breakers.overall_status == OverallStatus::Critical {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    let report = HealthReport {
        status: breakers.overall_status,
        breakers,
        keys,
        timestamp: Utc::now(),
    };
    (status_code, Json(report))
}

async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

async fn breakers_handler(
    State(state): State<AppState>,
) -> Json<HashMap<String, CircuitBreakerStats>> {
    Json(state.manager.get_all_stats().await)
}

async fn keys_handler(State(state): State<AppState>) -> Json<Vec<ApiKeyHealth>> {
    Json(state.keys.get_health_status())
}
