use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::collector::{build_strategy, StrategyKind};
use crate::config::ConfigPatch;
use crate::error::MonitorError;
use crate::monitor::CycleOutcome;
use crate::state::SharedState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StrategyRequest {
    pub strategy: StrategyKind,
    pub sample_rate: Option<f64>,
    pub lighthouse_target: Option<String>,
}

/// GET /monitor/status
pub async fn status(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.monitor.status().await)
}

/// POST /monitor/start
pub async fn start(State(state): State<SharedState>) -> impl IntoResponse {
    state.monitor.start().await;
    Json(state.monitor.status().await)
}

/// POST /monitor/stop
pub async fn stop(State(state): State<SharedState>) -> impl IntoResponse {
    state.monitor.stop().await;
    Json(state.monitor.status().await)
}

/// POST /monitor/collect: run one cycle now.
pub async fn collect(State(state): State<SharedState>) -> Result<impl IntoResponse, MonitorError> {
    let body = match state.monitor.collect_metrics().await? {
        CycleOutcome::Reported(report) => json!({
            "outcome": "reported",
            "report": report,
        }),
        CycleOutcome::Skipped { reason } => json!({
            "outcome": "skipped",
            "reason": reason,
        }),
    };
    Ok(Json(body))
}

/// PUT /monitor/strategy: switch strategy; applies from the next cycle.
pub async fn set_strategy(
    State(state): State<SharedState>,
    body: Result<Json<StrategyRequest>, JsonRejection>,
) -> Result<impl IntoResponse, MonitorError> {
    let Json(body) = body.map_err(|e| MonitorError::Validation(e.to_string()))?;

    let mut options = state.strategy_options.read().await.clone();
    if let Some(rate) = body.sample_rate {
        options.sample_rate = rate;
    }
    if let Some(target) = body.lighthouse_target {
        options.lighthouse_target = target;
    }
    let strategy = build_strategy(body.strategy, &options)?;
    *state.strategy_options.write().await = options;
    state.monitor.set_strategy(strategy).await;
    info!("Strategy set to {} via API", body.strategy.as_str());

    Ok(Json(state.monitor.status().await))
}

/// PATCH /monitor/config: replace config sections; rejected when invalid.
pub async fn update_config(
    State(state): State<SharedState>,
    body: Result<Json<ConfigPatch>, JsonRejection>,
) -> Result<impl IntoResponse, MonitorError> {
    let Json(patch) = body.map_err(|e| MonitorError::Validation(e.to_string()))?;
    let webhooks_changed = patch.alerts.is_some();

    let config = state.monitor.update_config(patch).await?;
    if webhooks_changed {
        state.alerts.set_webhooks(config.alerts.webhooks.clone());
    }
    Ok(Json(config))
}

/// GET /monitor/config
pub async fn config(State(state): State<SharedState>) -> impl IntoResponse {
    Json(state.monitor.config().await)
}
