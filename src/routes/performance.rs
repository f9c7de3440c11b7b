use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::alerts::{CriticalAlert, CRITICAL_PERFORMANCE};
use crate::analysis::{self, Insights};
use crate::budget::Budget;
use crate::collector::{PageContext, TimingEntry};
use crate::config::REPORT_HISTORY_SIZE;
use crate::error::MonitorError;
use crate::metrics::{Metric, MetricName, Rating};
use crate::report::Report;
use crate::reporter::{BeaconMetric, PageInfo};
use crate::state::SharedState;
use crate::storage::ReportFilters;

#[derive(Deserialize)]
pub struct IngestRequest {
    pub performance: PageInfo,
    pub metrics: Vec<BeaconMetric>,
    /// Raw timeline entries, for pages that do not pre-compute vitals.
    #[serde(default)]
    pub entries: Vec<TimingEntry>,
}

#[derive(Deserialize)]
pub struct ReportQuery {
    pub url: Option<String>,
    pub since: Option<i64>,
    #[serde(default = "default_limit")]
    pub limit: usize,
}

fn default_limit() -> usize {
    100
}

/// POST /performance: beacon ingest. Feeds the timing source and raises an
/// alert for every metric rated poor.
pub async fn ingest(
    State(state): State<SharedState>,
    body: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<impl IntoResponse, MonitorError> {
    let Json(body) = body.map_err(|e| MonitorError::Validation(format!("Invalid performance data structure: {}", e)))?;
    if body.entries.iter().any(|entry| !entry.is_finite()) {
        return Err(MonitorError::Validation("Timing entries must carry finite numbers".to_string()));
    }
    let page = body.performance;
    let budget = state.monitor.config().await.budget;

    let mut entries = Vec::with_capacity(body.metrics.len() + body.entries.len());
    let mut accepted = Vec::new();
    let mut critical = 0usize;

    for beacon in &body.metrics {
        let Ok(name) = beacon.name.parse::<MetricName>() else {
            debug!("Ignoring unknown metric {} from {}", beacon.name, page.url);
            continue;
        };
        if !beacon.value.is_finite() {
            continue;
        }
        let threshold = budget.threshold(name);
        let rating = beacon.rating.unwrap_or_else(|| threshold.rating(beacon.value));
        let url = beacon.url.clone().unwrap_or_else(|| page.url.clone());

        if rating == Rating::Poor {
            critical += 1;
            let alert = CriticalAlert {
                alert_type: Some(CRITICAL_PERFORMANCE.to_string()),
                metric: Some(name.as_str().to_uppercase()),
                value: beacon.value,
                threshold: Some(threshold.needs_improvement),
                url: url.clone(),
                timestamp: beacon.timestamp.or(page.timestamp),
                user_agent: page.user_agent.clone(),
            };
            if let Err(e) = state.alerts.record(alert) {
                warn!("Failed to record ingest alert: {}", e);
            }
        }

        entries.push(TimingEntry::WebVital {
            name,
            value: beacon.value,
            rating: Some(rating),
        });
        accepted.push(
            Metric::new(name, beacon.value, url, page.user_agent.clone())
                .with_timestamp(beacon.timestamp.or(page.timestamp).unwrap_or_else(crate::metrics::now_millis)),
        );
    }
    entries.extend(body.entries);

    if !entries.is_empty() {
        state.timing.push(
            PageContext {
                url: page.url.clone(),
                user_agent: page.user_agent.clone(),
                viewport_width: page.viewport_width,
                connection_type: page.connection_type.clone(),
                timestamp: page.timestamp,
            },
            entries,
        );
    }

    if critical > 0 {
        warn!("Critical performance metrics detected on {}: {}", page.url, critical);
    }
    info!(
        "Performance metrics received from {}: {} metrics, {} critical",
        page.url,
        body.metrics.len(),
        critical
    );

    Ok(Json(json!({
        "success": true,
        "received": body.metrics.len(),
        "critical": critical,
        "aggregated": analysis::aggregate(&accepted, &budget),
    })))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start: i64,
    pub end: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopMetric {
    pub name: MetricName,
    pub average_value: f64,
    pub poor_percentage: f64,
    pub count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportStats {
    pub total_reports: usize,
    pub total_metrics: usize,
    pub time_range: Option<TimeRange>,
    pub top_metrics: Vec<TopMetric>,
    pub aggregated: std::collections::BTreeMap<MetricName, analysis::MetricAggregate>,
}

fn report_stats(reports: &[Report], budget: &Budget) -> ReportStats {
    let metrics: Vec<Metric> = reports.iter().flat_map(|r| r.metrics.iter().cloned()).collect();
    let aggregated = analysis::aggregate(&metrics, budget);

    let time_range = match (
        reports.iter().map(|r| r.timestamp).min(),
        reports.iter().map(|r| r.timestamp).max(),
    ) {
        (Some(start), Some(end)) => Some(TimeRange { start, end }),
        _ => None,
    };

    let mut top_metrics: Vec<TopMetric> = aggregated
        .iter()
        .map(|(name, agg)| TopMetric {
            name: *name,
            average_value: agg.average,
            poor_percentage: agg.ratings.get(&Rating::Poor).copied().unwrap_or(0) as f64 / agg.count as f64 * 100.0,
            count: agg.count,
        })
        .collect();
    top_metrics.sort_by(|a, b| b.poor_percentage.total_cmp(&a.poor_percentage));
    top_metrics.truncate(10);

    ReportStats {
        total_reports: reports.len(),
        total_metrics: metrics.len(),
        time_range,
        top_metrics,
        aggregated,
    }
}

/// GET /performance: stored reports, newest first.
pub async fn list_reports(
    State(state): State<SharedState>,
    Query(query): Query<ReportQuery>,
) -> Result<impl IntoResponse, MonitorError> {
    let filters = ReportFilters {
        start: query.since.filter(|s| *s > 0),
        url: query.url.filter(|u| !u.is_empty()),
        limit: Some(query.limit),
        ..Default::default()
    };
    let reports = state.monitor.reports(&filters).await?;
    let total = state.monitor.report_count().await?;
    let budget = state.monitor.config().await.budget;
    let stats = report_stats(&reports, &budget);

    Ok(Json(json!({
        "reports": reports,
        "count": reports.len(),
        "total": total,
        "stats": stats,
    })))
}

#[derive(Deserialize)]
pub struct AnalysisQuery {
    #[serde(default = "default_history")]
    pub history: usize,
}

fn default_history() -> usize {
    REPORT_HISTORY_SIZE
}

/// GET /performance/analysis: trends of the latest report against the one
/// before it, anomalies against older history, and insights.
pub async fn analysis(
    State(state): State<SharedState>,
    Query(query): Query<AnalysisQuery>,
) -> Result<impl IntoResponse, MonitorError> {
    let reports = state.monitor.get_reports(query.history.max(1)).await?;
    let Some((latest, older)) = reports.split_first() else {
        return Ok(Json(json!({
            "reportId": null,
            "trends": [],
            "anomalies": [],
            "insights": Insights::default(),
        })));
    };

    let trends = older
        .first()
        .map(|previous| analysis::calculate_trends(&latest.metrics, &previous.metrics))
        .unwrap_or_default();

    // Oldest first so that "last" means most recent.
    let history: Vec<Metric> = older
        .iter()
        .rev()
        .flat_map(|r| r.metrics.iter().cloned())
        .collect();
    let anomalies = analysis::detect_anomalies(&latest.metrics, &history);
    let insights = analysis::generate_insights(&latest.metrics, &latest.violations, &latest.budget);

    Ok(Json(json!({
        "reportId": latest.id,
        "score": latest.score,
        "trends": trends,
        "anomalies": anomalies,
        "insights": insights,
    })))
}
