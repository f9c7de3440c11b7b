//! Report sinks. Every reporter gets every report; one failing or hanging
//! reporter never affects the others or the collection cycle.

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::alerts::CriticalAlert;
use crate::analysis::format_metric;
use crate::config::{BEACON_BATCH_SIZE, HTTP_TIMEOUT_SECS};
use crate::error::ReporterError;
use crate::metrics::{now_millis, Rating};
use crate::report::Report;

#[async_trait]
pub trait PerformanceReporter: Send + Sync {
    fn name(&self) -> &str;

    async fn report(&self, report: &Report) -> Result<(), ReporterError>;

    /// Deliver anything buffered. Called on shutdown.
    async fn flush(&self) -> Result<(), ReporterError> {
        Ok(())
    }
}

pub type SharedReporter = Arc<dyn PerformanceReporter>;

/// Runs every reporter concurrently, each bounded by `timeout`, and waits for
/// all of them to settle. Failures are logged and returned per reporter.
pub async fn dispatch(
    reporters: &[SharedReporter],
    report: &Report,
    timeout: Duration,
) -> Vec<(String, Result<(), ReporterError>)> {
    let runs = reporters.iter().map(|reporter| async move {
        let result = match tokio::time::timeout(timeout, reporter.report(report)).await {
            Ok(result) => result,
            Err(_) => Err(ReporterError::Timeout(timeout.as_secs())),
        };
        if let Err(e) = &result {
            warn!("Reporter {} failed for report {}: {}", reporter.name(), report.id, e);
        }
        (reporter.name().to_string(), result)
    });
    join_all(runs).await
}

// --- Console ---

/// Logs a human-readable summary of each report.
pub struct ConsoleReporter;

#[async_trait]
impl PerformanceReporter for ConsoleReporter {
    fn name(&self) -> &str {
        "console"
    }

    async fn report(&self, report: &Report) -> Result<(), ReporterError> {
        info!(
            "Performance report {} for {}: score {:.1} ({:?}), {} metrics, {} violations",
            report.id,
            report.url,
            report.score.overall,
            report.score.grade,
            report.metrics.len(),
            report.violations.len()
        );
        for metric in &report.metrics {
            let rating = report.budget.threshold(metric.name).rating(metric.value);
            let marker = if rating == Rating::Good { "PASS" } else { "FAIL" };
            info!(
                "  [{}] {} = {} ({})",
                marker,
                metric.name.as_str().to_uppercase(),
                format_metric(metric.name, metric.value),
                rating.as_str()
            );
        }
        for violation in &report.violations {
            warn!(
                "  {} violation: {} = {} (budget {})",
                violation.severity.as_str(),
                violation.metric.as_str().to_uppercase(),
                format_metric(violation.metric, violation.actual),
                format_metric(violation.metric, violation.budget)
            );
        }
        Ok(())
    }
}

// --- HTTP ---

/// POSTs each report as JSON to an analytics endpoint.
pub struct HttpReporter {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpReporter {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl PerformanceReporter for HttpReporter {
    fn name(&self) -> &str {
        "http"
    }

    async fn report(&self, report: &Report) -> Result<(), ReporterError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .json(report)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(ReporterError::Status(resp.status().as_u16()));
        }
        debug!("Delivered report {} to {}", report.id, self.endpoint);
        Ok(())
    }
}

// --- Beacon ---

/// Page-level context of a beacon batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    #[serde(default)]
    pub timestamp: Option<i64>,
    pub url: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
}

/// One metric as carried in a beacon. `name` is accepted in either case
/// (`LCP` or `lcp`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeaconMetric {
    pub name: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<Rating>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BeaconPayload {
    pub performance: PageInfo,
    pub metrics: Vec<BeaconMetric>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Transport {
    /// Fire-and-forget: the send runs on a spawned task.
    #[default]
    Beacon,
    /// The caller awaits the request and sees its failure.
    KeepAlive,
}

/// Batching sender: buffers metrics and ships them in batches, sending any
/// metric rated poor to the alert endpoint immediately. At most once, no
/// retries.
pub struct BeaconReporter {
    client: reqwest::Client,
    endpoint: String,
    batch_size: usize,
    transport: Transport,
    user_agent: String,
    pending: Mutex<Vec<PendingMetric>>,
}

/// A buffered metric and the user agent of the page that produced it.
struct PendingMetric {
    metric: BeaconMetric,
    user_agent: String,
}

impl BeaconReporter {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            batch_size: BEACON_BATCH_SIZE,
            transport: Transport::default(),
            user_agent: format!("vitals-monitor/{}", env!("CARGO_PKG_VERSION")),
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_transport(mut self, transport: Transport) -> Self {
        self.transport = transport;
        self
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Takes a full batch out of the buffer, if there is one.
    fn take_batch(&self, force: bool) -> Option<Vec<PendingMetric>> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if pending.is_empty() || (!force && pending.len() < self.batch_size) {
            return None;
        }
        Some(std::mem::take(&mut *pending))
    }

    /// The page fields come from the newest metric in the batch.
    async fn send_batch(&self, batch: Vec<PendingMetric>) -> Result<(), ReporterError> {
        let url = batch
            .last()
            .and_then(|p| p.metric.url.clone())
            .unwrap_or_default();
        let user_agent = batch
            .last()
            .map(|p| p.user_agent.clone())
            .filter(|ua| !ua.is_empty())
            .unwrap_or_else(|| self.user_agent.clone());
        let payload = BeaconPayload {
            performance: PageInfo {
                timestamp: Some(now_millis()),
                url,
                user_agent,
                viewport_width: None,
                connection_type: None,
            },
            metrics: batch.into_iter().map(|p| p.metric).collect(),
        };
        debug!("Sending beacon batch of {} metrics to {}", payload.metrics.len(), self.endpoint);
        self.send(self.endpoint.clone(), serde_json::to_value(&payload).map_err(|e| ReporterError::Other(e.to_string()))?)
            .await
    }

    async fn send_alert(&self, alert: CriticalAlert) -> Result<(), ReporterError> {
        let url = format!("{}/alerts", self.endpoint);
        self.send(url, serde_json::to_value(&alert).map_err(|e| ReporterError::Other(e.to_string()))?)
            .await
    }

    async fn send(&self, url: String, body: serde_json::Value) -> Result<(), ReporterError> {
        let request = self
            .client
            .post(&url)
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .json(&body);

        match self.transport {
            Transport::Beacon => {
                tokio::spawn(async move {
                    if let Err(e) = request.send().await {
                        debug!("Beacon to {} dropped: {}", url, e);
                    }
                });
                Ok(())
            }
            Transport::KeepAlive => {
                let resp = request.send().await?;
                if !resp.status().is_success() {
                    return Err(ReporterError::Status(resp.status().as_u16()));
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl PerformanceReporter for BeaconReporter {
    fn name(&self) -> &str {
        "beacon"
    }

    async fn report(&self, report: &Report) -> Result<(), ReporterError> {
        let mut first_error = None;

        for metric in &report.metrics {
            let threshold = report.budget.threshold(metric.name);
            let rating = threshold.rating(metric.value);
            if rating == Rating::Poor {
                let alert = CriticalAlert::new(
                    metric.name,
                    metric.value,
                    threshold.needs_improvement,
                    metric.url.clone(),
                    metric.user_agent.clone(),
                );
                if let Err(e) = self.send_alert(alert).await {
                    first_error.get_or_insert(e);
                }
            }

            self.pending
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(PendingMetric {
                    metric: BeaconMetric {
                        name: metric.name.as_str().to_uppercase(),
                        value: metric.value,
                        rating: Some(rating),
                        timestamp: Some(metric.timestamp),
                        url: Some(metric.url.clone()),
                    },
                    user_agent: metric.user_agent.clone(),
                });

            if let Some(batch) = self.take_batch(false) {
                if let Err(e) = self.send_batch(batch).await {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn flush(&self) -> Result<(), ReporterError> {
        match self.take_batch(true) {
            Some(batch) => self.send_batch(batch).await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{self, Budget};
    use crate::metrics::{Metric, MetricName};
    use crate::scoring;
    use axum::extract::State;
    use axum::routing::post;
    use axum::{Json, Router};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn report(values: &[(MetricName, f64)]) -> Report {
        let budget = Budget::production();
        let metrics: Vec<Metric> = values
            .iter()
            .map(|(name, value)| Metric::new(*name, *value, "https://example.test/", "test-agent"))
            .collect();
        Report {
            id: "perf_1_abcdefghi".to_string(),
            timestamp: 1,
            url: "https://example.test/".to_string(),
            violations: budget::validate(&metrics, &budget),
            score: scoring::score(&metrics, &budget),
            metrics,
            budget,
        }
    }

    #[derive(Clone, Default)]
    struct Received {
        batches: Arc<Mutex<Vec<BeaconPayload>>>,
        alerts: Arc<Mutex<Vec<serde_json::Value>>>,
    }

    async fn collector() -> (String, Received) {
        let received = Received::default();
        let app = Router::new()
            .route(
                "/performance",
                post(|State(r): State<Received>, Json(body): Json<BeaconPayload>| async move {
                    r.batches.lock().unwrap().push(body);
                }),
            )
            .route(
                "/performance/alerts",
                post(|State(r): State<Received>, Json(body): Json<serde_json::Value>| async move {
                    r.alerts.lock().unwrap().push(body);
                }),
            )
            .with_state(received.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/performance", addr), received)
    }

    struct Failing;

    #[async_trait]
    impl PerformanceReporter for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        async fn report(&self, _report: &Report) -> Result<(), ReporterError> {
            Err(ReporterError::Other("boom".to_string()))
        }
    }

    struct Hanging;

    #[async_trait]
    impl PerformanceReporter for Hanging {
        fn name(&self) -> &str {
            "hanging"
        }
        async fn report(&self, _report: &Report) -> Result<(), ReporterError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl PerformanceReporter for Counting {
        fn name(&self) -> &str {
            "counting"
        }
        async fn report(&self, _report: &Report) -> Result<(), ReporterError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_dispatch_isolates_failing_and_hanging_reporters() {
        let count = Arc::new(AtomicUsize::new(0));
        let reporters: Vec<SharedReporter> = vec![
            Arc::new(Failing),
            Arc::new(Hanging),
            Arc::new(Counting(count.clone())),
        ];

        let results = dispatch(&reporters, &report(&[(MetricName::Lcp, 2000.0)]), Duration::from_secs(10)).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(results.len(), 3);
        assert!(matches!(results[0].1, Err(ReporterError::Other(_))));
        assert!(matches!(results[1].1, Err(ReporterError::Timeout(10))));
        assert!(results[2].1.is_ok());
    }

    #[tokio::test]
    async fn test_console_reporter_never_fails() {
        let report = report(&[(MetricName::Lcp, 7000.0), (MetricName::Cls, 0.01)]);
        assert!(ConsoleReporter.report(&report).await.is_ok());
    }

    #[tokio::test]
    async fn test_http_reporter_surfaces_transport_errors() {
        let reporter = HttpReporter::new(reqwest::Client::new(), "http://127.0.0.1:9/reports");
        let result = reporter.report(&report(&[(MetricName::Lcp, 2000.0)])).await;
        assert!(matches!(result, Err(ReporterError::Http(_))));
    }

    #[tokio::test]
    async fn test_beacon_batches_at_five_and_alerts_poor_immediately() {
        let (endpoint, received) = collector().await;
        let reporter = BeaconReporter::new(reqwest::Client::new(), endpoint).with_transport(Transport::KeepAlive);

        // 4 metrics, one of them poor: an alert but no batch yet.
        reporter
            .report(&report(&[
                (MetricName::Lcp, 6500.0),
                (MetricName::Fid, 50.0),
                (MetricName::Cls, 0.02),
                (MetricName::Fcp, 1000.0),
            ]))
            .await
            .unwrap();
        assert_eq!(received.alerts.lock().unwrap().len(), 1);
        assert!(received.batches.lock().unwrap().is_empty());
        assert_eq!(reporter.pending_len(), 4);

        let alert = received.alerts.lock().unwrap()[0].clone();
        assert_eq!(alert["type"], "critical-performance");
        assert_eq!(alert["metric"], "LCP");
        assert_eq!(alert["threshold"], 4000.0);

        // The fifth metric completes the batch.
        reporter.report(&report(&[(MetricName::Ttfb, 300.0), (MetricName::Inp, 90.0)])).await.unwrap();
        {
            let batches = received.batches.lock().unwrap();
            assert_eq!(batches.len(), 1);
            assert_eq!(batches[0].metrics.len(), 5);
            assert_eq!(batches[0].metrics[0].name, "LCP");
            assert_eq!(batches[0].metrics[0].rating, Some(Rating::Poor));
            assert_eq!(batches[0].performance.user_agent, "test-agent");
            assert_eq!(batches[0].performance.url, "https://example.test/");
        }
        assert_eq!(reporter.pending_len(), 1);

        reporter.flush().await.unwrap();
        assert_eq!(received.batches.lock().unwrap().len(), 2);
        assert_eq!(received.batches.lock().unwrap()[1].metrics[0].name, "INP");
        assert_eq!(reporter.pending_len(), 0);

        // Nothing pending: flush sends nothing.
        reporter.flush().await.unwrap();
        assert_eq!(received.batches.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_beacon_transport_does_not_surface_errors() {
        let reporter = BeaconReporter::new(reqwest::Client::new(), "http://127.0.0.1:9/performance").with_batch_size(1);
        assert!(reporter.report(&report(&[(MetricName::Lcp, 9000.0)])).await.is_ok());
        assert_eq!(reporter.pending_len(), 0);
    }
}
