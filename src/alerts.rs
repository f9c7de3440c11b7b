//! Critical performance alerts raised by pages and by ingest.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::{Mutex, RwLock};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::{
    ALERT_BURST_THRESHOLD, ALERT_BURST_WINDOW_SECS, ALERT_HISTORY_SIZE, ALERT_RECENT_WINDOW_SECS,
    CRITICAL_ALERT_THRESHOLDS, HTTP_TIMEOUT_SECS,
};
use crate::error::MonitorError;
use crate::metrics::{now_millis, MetricName};

pub const CRITICAL_PERFORMANCE: &str = "critical-performance";

/// Alert as sent by a page. `type` and `metric` are required; the rest is
/// whatever the sender knew.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CriticalAlert {
    #[serde(rename = "type", default)]
    pub alert_type: Option<String>,
    #[serde(default)]
    pub metric: Option<String>,
    pub value: f64,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub user_agent: String,
}

impl CriticalAlert {
    pub fn new(metric: MetricName, value: f64, threshold: f64, url: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            alert_type: Some(CRITICAL_PERFORMANCE.to_string()),
            metric: Some(metric.as_str().to_uppercase()),
            value,
            threshold: Some(threshold),
            url: url.into(),
            timestamp: Some(now_millis()),
            user_agent: user_agent.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    High,
    Critical,
}

impl AlertSeverity {
    /// `critical` at or above the per-metric critical threshold. Metrics
    /// without one are always `high`.
    pub fn classify(metric: &str, value: f64) -> Self {
        let Ok(name) = metric.parse::<MetricName>() else {
            return AlertSeverity::High;
        };
        match CRITICAL_ALERT_THRESHOLDS.iter().find(|(m, _)| *m == name) {
            Some((_, critical)) if value >= *critical => AlertSeverity::Critical,
            _ => AlertSeverity::High,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::High => "high",
            AlertSeverity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub metric: String,
    pub value: f64,
    pub threshold: Option<f64>,
    pub url: String,
    pub user_agent: String,
    pub timestamp: i64,
    pub server_timestamp: i64,
    pub acknowledged: bool,
}

/// Result of recording an alert.
#[derive(Debug, Clone)]
pub struct RecordedAlert {
    pub alert: Alert,
    /// Alerts for the same metric and url inside the burst window, this one included.
    pub recent_count: usize,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlertQuery {
    pub severity: Option<AlertSeverity>,
    pub acknowledged: Option<bool>,
    /// Only alerts received at or after this server timestamp.
    pub since: Option<i64>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UrlCount {
    pub url: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertStats {
    pub total: usize,
    pub critical: usize,
    pub high: usize,
    pub acknowledged: usize,
    /// Received within the last hour.
    pub recent: usize,
    pub by_metric: BTreeMap<String, usize>,
    /// Top 10 urls by alert count.
    pub by_url: Vec<UrlCount>,
}

pub struct AlertStore {
    history: Mutex<VecDeque<Alert>>,
    capacity: usize,
    webhooks: RwLock<Vec<String>>,
    client: reqwest::Client,
}

impl AlertStore {
    pub fn new(client: reqwest::Client) -> Self {
        Self::with_capacity(client, ALERT_HISTORY_SIZE)
    }

    pub fn with_capacity(client: reqwest::Client, capacity: usize) -> Self {
        Self {
            history: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            webhooks: RwLock::new(Vec::new()),
            client,
        }
    }

    pub fn set_webhooks(&self, webhooks: Vec<String>) {
        *self.webhooks.write().unwrap_or_else(|e| e.into_inner()) = webhooks;
    }

    pub fn record(&self, incoming: CriticalAlert) -> Result<RecordedAlert, MonitorError> {
        let alert_type = incoming
            .alert_type
            .filter(|t| !t.is_empty())
            .ok_or_else(|| MonitorError::Validation("Alert type is required".to_string()))?;
        let metric = incoming
            .metric
            .filter(|m| !m.is_empty())
            .ok_or_else(|| MonitorError::Validation("Alert metric is required".to_string()))?;
        // Known metrics are stored under one spelling so "lcp" and "LCP" group together.
        let metric = match metric.parse::<MetricName>() {
            Ok(name) => name.as_str().to_uppercase(),
            Err(_) => metric,
        };
        if !incoming.value.is_finite() {
            return Err(MonitorError::Validation("Alert value must be a number".to_string()));
        }

        let server_timestamp = now_millis();
        let alert = Alert {
            id: generate_alert_id(server_timestamp),
            alert_type,
            severity: AlertSeverity::classify(&metric, incoming.value),
            metric,
            value: incoming.value,
            threshold: incoming.threshold,
            url: incoming.url,
            user_agent: incoming.user_agent,
            timestamp: incoming.timestamp.unwrap_or(server_timestamp),
            server_timestamp,
            acknowledged: false,
        };

        let recent_count = {
            let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
            history.push_front(alert.clone());
            history.truncate(self.capacity);

            let window_start = server_timestamp - ALERT_BURST_WINDOW_SECS * 1000;
            history
                .iter()
                .filter(|a| a.metric == alert.metric && a.url == alert.url && a.server_timestamp > window_start)
                .count()
        };

        if recent_count > ALERT_BURST_THRESHOLD {
            warn!(
                "High frequency of {} alerts for {}: {} in the last {}s",
                alert.metric, alert.url, recent_count, ALERT_BURST_WINDOW_SECS
            );
        }

        info!(
            "Performance alert [{}]: {}={} (threshold {:?}) on {}",
            alert.severity.as_str().to_uppercase(),
            alert.metric,
            alert.value,
            alert.threshold,
            alert.url
        );

        if alert.severity == AlertSeverity::Critical {
            self.notify(&alert);
        }

        Ok(RecordedAlert { alert, recent_count })
    }

    /// Newest first. Returns the matching page and the unfiltered total.
    pub fn list(&self, query: &AlertQuery) -> (Vec<Alert>, usize) {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let limit = query.limit.unwrap_or(usize::MAX);
        let alerts = history
            .iter()
            .filter(|a| query.severity.is_none_or(|s| a.severity == s))
            .filter(|a| query.acknowledged.is_none_or(|ack| a.acknowledged == ack))
            .filter(|a| query.since.is_none_or(|since| a.server_timestamp >= since))
            .take(limit)
            .cloned()
            .collect();
        (alerts, history.len())
    }

    pub fn acknowledge(&self, id: &str, acknowledged: bool) -> Option<Alert> {
        let mut history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let alert = history.iter_mut().find(|a| a.id == id)?;
        alert.acknowledged = acknowledged;
        Some(alert.clone())
    }

    pub fn stats(&self) -> AlertStats {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        let recent_start = now_millis() - ALERT_RECENT_WINDOW_SECS * 1000;

        let mut stats = AlertStats {
            total: history.len(),
            ..Default::default()
        };
        let mut url_counts: HashMap<&str, usize> = HashMap::new();
        for alert in history.iter() {
            match alert.severity {
                AlertSeverity::Critical => stats.critical += 1,
                AlertSeverity::High => stats.high += 1,
            }
            if alert.acknowledged {
                stats.acknowledged += 1;
            }
            if alert.server_timestamp > recent_start {
                stats.recent += 1;
            }
            *stats.by_metric.entry(alert.metric.clone()).or_default() += 1;
            *url_counts.entry(alert.url.as_str()).or_default() += 1;
        }

        let mut by_url: Vec<UrlCount> = url_counts
            .into_iter()
            .map(|(url, count)| UrlCount {
                url: url.to_string(),
                count,
            })
            .collect();
        by_url.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.url.cmp(&b.url)));
        by_url.truncate(10);
        stats.by_url = by_url;
        stats
    }

    fn notify(&self, alert: &Alert) {
        let webhooks = self.webhooks.read().unwrap_or_else(|e| e.into_inner()).clone();
        error!(
            "CRITICAL performance alert: {} = {} on {}",
            alert.metric, alert.value, alert.url
        );
        if webhooks.is_empty() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime available; skipping alert webhooks");
            return;
        };

        let body = serde_json::json!({
            "text": notification_text(alert),
            "username": "Performance Monitor",
            "alert": alert,
        });
        for url in webhooks {
            let client = self.client.clone();
            let body = body.clone();
            handle.spawn(async move {
                let result = client
                    .post(&url)
                    .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
                    .json(&body)
                    .send()
                    .await;
                if let Err(e) = result {
                    warn!("Failed to deliver alert webhook to {}: {}", url, e);
                }
            });
        }
    }
}

fn notification_text(alert: &Alert) -> String {
    let unit = alert.metric.parse::<MetricName>().map(|m| m.unit()).unwrap_or("");
    let threshold = alert
        .threshold
        .map(|t| format!("{}{}", t, unit))
        .unwrap_or_else(|| "n/a".to_string());
    let user_agent: String = alert.user_agent.chars().take(100).collect();
    format!(
        "CRITICAL Performance Alert\nMetric: {}\nValue: {}{}\nThreshold: {}\nURL: {}\nUser Agent: {}\nSeverity: {}",
        alert.metric,
        alert.value,
        unit,
        threshold,
        alert.url,
        user_agent,
        alert.severity.as_str().to_uppercase()
    )
}

/// `alert-<epoch-ms>-<9 lowercase alnum>`
fn generate_alert_id(now: i64) -> String {
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .map(|b| (b as char).to_ascii_lowercase())
        .take(9)
        .collect();
    format!("alert-{}-{}", now, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> AlertStore {
        AlertStore::new(reqwest::Client::new())
    }

    fn alert(metric: &str, value: f64, url: &str) -> CriticalAlert {
        CriticalAlert {
            alert_type: Some(CRITICAL_PERFORMANCE.to_string()),
            metric: Some(metric.to_string()),
            value,
            threshold: Some(4000.0),
            url: url.to_string(),
            timestamp: None,
            user_agent: "test-agent".to_string(),
        }
    }

    #[test]
    fn test_severity_classification() {
        assert_eq!(AlertSeverity::classify("LCP", 6000.0), AlertSeverity::Critical);
        assert_eq!(AlertSeverity::classify("lcp", 5999.0), AlertSeverity::High);
        assert_eq!(AlertSeverity::classify("CLS", 0.5), AlertSeverity::Critical);
        assert_eq!(AlertSeverity::classify("TTFB", 1200.0), AlertSeverity::Critical);
        // FCP has no critical threshold
        assert_eq!(AlertSeverity::classify("FCP", 99999.0), AlertSeverity::High);
        assert_eq!(AlertSeverity::classify("TBT", 99999.0), AlertSeverity::High);
    }

    #[test]
    fn test_record_requires_type_and_metric() {
        let store = store();
        let mut missing_type = alert("LCP", 5000.0, "/");
        missing_type.alert_type = None;
        assert!(matches!(store.record(missing_type), Err(MonitorError::Validation(_))));

        let mut missing_metric = alert("LCP", 5000.0, "/");
        missing_metric.metric = None;
        assert!(matches!(store.record(missing_metric), Err(MonitorError::Validation(_))));
        assert_eq!(store.list(&AlertQuery::default()).1, 0);
    }

    #[test]
    fn test_record_assigns_id_and_counts_recent() {
        let store = store();
        let first = store.record(alert("LCP", 5000.0, "/search")).unwrap();
        assert!(first.alert.id.starts_with("alert-"));
        assert!(!first.alert.acknowledged);
        assert_eq!(first.recent_count, 1);

        store.record(alert("LCP", 5200.0, "/deals")).unwrap();
        let third = store.record(alert("LCP", 5100.0, "/search")).unwrap();
        assert_eq!(third.recent_count, 2);
    }

    #[test]
    fn test_metric_spellings_share_stats_and_burst_count() {
        let store = store();
        let lower = store.record(alert("lcp", 5000.0, "/search")).unwrap();
        assert_eq!(lower.alert.metric, "LCP");

        let upper = store.record(alert("LCP", 5100.0, "/search")).unwrap();
        assert_eq!(upper.recent_count, 2);
        assert_eq!(store.stats().by_metric.get("LCP"), Some(&2));
        assert!(!store.stats().by_metric.contains_key("lcp"));

        let custom = store.record(alert("longTask", 900.0, "/search")).unwrap();
        assert_eq!(custom.alert.metric, "longTask");
    }

    #[test]
    fn test_history_is_bounded_newest_first() {
        let store = AlertStore::with_capacity(reqwest::Client::new(), 3);
        for i in 0..5 {
            store.record(alert("FID", 300.0 + i as f64, "/")).unwrap();
        }
        let (alerts, total) = store.list(&AlertQuery::default());
        assert_eq!(total, 3);
        assert_eq!(alerts[0].value, 304.0);
        assert_eq!(alerts[2].value, 302.0);
    }

    #[test]
    fn test_list_filters_and_acknowledge() {
        let store = store();
        let critical = store.record(alert("LCP", 7000.0, "/")).unwrap().alert;
        store.record(alert("LCP", 4500.0, "/")).unwrap();

        let (criticals, _) = store.list(&AlertQuery {
            severity: Some(AlertSeverity::Critical),
            ..Default::default()
        });
        assert_eq!(criticals.len(), 1);
        assert_eq!(criticals[0].id, critical.id);

        let updated = store.acknowledge(&critical.id, true).unwrap();
        assert!(updated.acknowledged);
        assert!(store.acknowledge("alert-0-missing", true).is_none());

        let (unacked, total) = store.list(&AlertQuery {
            acknowledged: Some(false),
            ..Default::default()
        });
        assert_eq!(total, 2);
        assert_eq!(unacked.len(), 1);
        assert_eq!(unacked[0].value, 4500.0);
    }

    #[test]
    fn test_stats() {
        let store = store();
        assert_eq!(store.stats(), AlertStats::default());

        store.record(alert("LCP", 7000.0, "/a")).unwrap();
        store.record(alert("LCP", 4500.0, "/a")).unwrap();
        let cls = store.record(alert("CLS", 0.3, "/b")).unwrap().alert;
        store.acknowledge(&cls.id, true);

        let stats = store.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.critical, 1);
        assert_eq!(stats.high, 2);
        assert_eq!(stats.acknowledged, 1);
        assert_eq!(stats.recent, 3);
        assert_eq!(stats.by_metric.get("LCP"), Some(&2));
        assert_eq!(stats.by_url[0], UrlCount { url: "/a".to_string(), count: 2 });
    }
}
