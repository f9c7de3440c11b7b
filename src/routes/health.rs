use axum::extract::State;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::config::Environment;
use crate::state::SharedState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
    pub instance_id: String,
    pub environment: Environment,
    pub started_at: String,
    pub uptime_secs: i64,
    pub monitor: MonitorHealth,
}

#[derive(Serialize)]
pub struct MonitorHealth {
    pub running: bool,
    pub strategy: String,
    pub pending_timing_entries: usize,
    pub sse_clients: usize,
}

/// GET /health
pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let status = state.monitor.status().await;
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        instance_id: state.instance_id.clone(),
        environment: state.environment,
        started_at: state.started_at.to_rfc3339(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        monitor: MonitorHealth {
            running: status.running,
            strategy: status.strategy,
            pending_timing_entries: state.timing.len(),
            sse_clients: state.events_tx.receiver_count(),
        },
    })
}
