use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::alerts::{AlertQuery, AlertSeverity, CriticalAlert};
use crate::error::MonitorError;
use crate::state::SharedState;

#[derive(Deserialize)]
pub struct ListQuery {
    pub severity: Option<AlertSeverity>,
    pub acknowledged: Option<bool>,
    pub since: Option<i64>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    50
}

#[derive(Deserialize)]
pub struct AlertIdQuery {
    pub id: Option<String>,
}

#[derive(Deserialize)]
pub struct AcknowledgeRequest {
    pub acknowledged: bool,
}

/// POST /performance/alerts: a page reporting a critical metric.
pub async fn create_alert(
    State(state): State<SharedState>,
    body: Result<Json<CriticalAlert>, JsonRejection>,
) -> Result<impl IntoResponse, MonitorError> {
    let Json(alert) = body.map_err(|e| MonitorError::Validation(format!("Invalid alert data structure: {}", e)))?;
    let recorded = state.alerts.record(alert)?;

    Ok(Json(json!({
        "success": true,
        "alertId": recorded.alert.id,
        "severity": recorded.alert.severity,
        "recentAlertsCount": recorded.recent_count,
    })))
}

/// GET /performance/alerts: newest first.
pub async fn list_alerts(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> Json<serde_json::Value> {
    let (alerts, total) = state.alerts.list(&AlertQuery {
        severity: query.severity,
        acknowledged: query.acknowledged,
        since: query.since.filter(|s| *s > 0),
        limit: Some(query.limit),
    });

    Json(json!({
        "count": alerts.len(),
        "alerts": alerts,
        "total": total,
        "stats": state.alerts.stats(),
    }))
}

/// PATCH /performance/alerts?id=...: set the acknowledged flag.
pub async fn acknowledge_alert(
    State(state): State<SharedState>,
    Query(query): Query<AlertIdQuery>,
    body: Result<Json<AcknowledgeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, MonitorError> {
    let id = query
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| MonitorError::Validation("Alert ID is required".to_string()))?;
    let Json(body) = body.map_err(|e| MonitorError::Validation(e.to_string()))?;

    let alert = state
        .alerts
        .acknowledge(&id, body.acknowledged)
        .ok_or_else(|| MonitorError::NotFound(format!("Alert {}", id)))?;

    Ok(Json(json!({
        "success": true,
        "alert": alert,
    })))
}
