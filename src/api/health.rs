//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::connection_manager::{ConnectionInfo, ConnectionStats};
use crate::relay::RelayStatsSnapshot;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub connections: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub connections: ConnectionStats,
    pub relay: RelayStatsResponse,
    pub clients: Vec<ConnectionInfo>,
}

#[derive(Debug, Serialize)]
pub struct RelayStatsResponse {
    pub echo_to_sender: bool,
    #[serde(flatten)]
    pub counters: RelayStatsSnapshot,
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        connections: state.connection_manager.len(),
    })
}

pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    Json(StatsResponse {
        connections: state.connection_manager.stats(),
        relay: RelayStatsResponse {
            echo_to_sender: state.broadcaster.echo_to_sender(),
            counters: state.broadcaster.stats(),
        },
        clients: state.connection_manager.list_connections(),
    })
}
