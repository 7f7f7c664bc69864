//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::broker::BrokerHealthStats;
use crate::connection_manager::ConnectionStats;
use crate::notification::DispatcherStatsSnapshot;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub broker: BrokerHealthResponse,
    pub connections: ConnectionStats,
}

#[derive(Debug, Serialize)]
pub struct BrokerHealthResponse {
    pub backend: String,
    pub status: String,
    pub connected: bool,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub connections: ConnectionStats,
    pub delivery: DispatcherStatsSnapshot,
    pub broker: BrokerHealthStats,
}

/// GET /health - degraded while the broker subscription is reconnecting
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let broker_health = state.broker.health();
    let connected = broker_health.is_healthy();
    let status = if connected { "healthy" } else { "degraded" };

    Json(HealthResponse {
        status: status.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        broker: BrokerHealthResponse {
            backend: state.broker.backend_name().to_string(),
            status: broker_health.status().as_str().to_string(),
            connected,
        },
        connections: state.registry.stats(),
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        connections: state.registry.stats(),
        delivery: state.dispatcher.stats(),
        broker: state.broker.health().stats(),
    })
}
