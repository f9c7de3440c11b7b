use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

use super::{CollectionOutcome, CollectionStrategy};
use crate::config::{LIGHTHOUSE_API_URL, LIGHTHOUSE_TIMEOUT_SECS};
use crate::metrics::{now_millis, DeviceType, Metric, MetricName};

/// Lighthouse audit ids and the metric each one maps to.
const AUDIT_MAPPINGS: &[(&str, MetricName)] = &[
    ("largest-contentful-paint", MetricName::Lcp),
    ("first-input-delay", MetricName::Fid),
    ("cumulative-layout-shift", MetricName::Cls),
    ("first-contentful-paint", MetricName::Fcp),
    ("server-response-time", MetricName::Ttfb),
];

/// Asks a PageSpeed-style scoring service to audit `target_url`. Any failure
/// degrades to the fallback strategy.
pub struct LighthouseStrategy {
    client: reqwest::Client,
    api_url: String,
    target_url: String,
    timeout: Duration,
    fallback: Arc<dyn CollectionStrategy>,
}

impl LighthouseStrategy {
    pub fn new(
        client: reqwest::Client,
        target_url: impl Into<String>,
        fallback: Arc<dyn CollectionStrategy>,
    ) -> Self {
        Self {
            client,
            api_url: LIGHTHOUSE_API_URL.to_string(),
            target_url: target_url.into(),
            timeout: Duration::from_secs(LIGHTHOUSE_TIMEOUT_SECS),
            fallback,
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run_audit(&self) -> Result<Vec<Metric>, String> {
        let url = url::Url::parse_with_params(
            &self.api_url,
            &[("url", self.target_url.as_str()), ("strategy", "desktop")],
        )
        .map_err(|e| format!("Invalid Lighthouse API url {}: {}", self.api_url, e))?;

        let resp = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| format!("Lighthouse request failed: {}", e))?;

        if !resp.status().is_success() {
            return Err(format!("Lighthouse API error: {}", resp.status()));
        }

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| format!("Failed to parse Lighthouse response: {}", e))?;

        Ok(parse_audits(&json, &self.target_url))
    }
}

/// Extracts metrics from a `lighthouseResult.audits` payload. Audits without a
/// numeric value are skipped.
pub fn parse_audits(json: &serde_json::Value, target_url: &str) -> Vec<Metric> {
    let Some(audits) = json
        .get("lighthouseResult")
        .and_then(|r| r.get("audits"))
    else {
        return Vec::new();
    };

    let timestamp = now_millis();
    AUDIT_MAPPINGS
        .iter()
        .filter_map(|(audit_key, name)| {
            let value = audits.get(*audit_key)?.get("numericValue")?.as_f64()?;
            Some(
                Metric::new(*name, value, target_url, lighthouse_user_agent())
                    .with_timestamp(timestamp)
                    .with_device_type(DeviceType::Desktop),
            )
        })
        .collect()
}

fn lighthouse_user_agent() -> String {
    format!("vitals-monitor/{} (lighthouse)", env!("CARGO_PKG_VERSION"))
}

#[async_trait]
impl CollectionStrategy for LighthouseStrategy {
    fn name(&self) -> &str {
        "lighthouse"
    }

    async fn collect(&self) -> CollectionOutcome {
        match self.run_audit().await {
            Ok(metrics) => {
                debug!("Lighthouse audit returned {} metrics", metrics.len());
                CollectionOutcome::Collected(metrics)
            }
            Err(e) => {
                error!("Lighthouse strategy failed, falling back to {}: {}", self.fallback.name(), e);
                self.fallback.collect().await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::{DirectStrategy, PageContext, TimingEntry, TimingSource};
    use serde_json::json;

    #[test]
    fn test_parse_audits_maps_known_keys() {
        let payload = json!({
            "lighthouseResult": {
                "audits": {
                    "largest-contentful-paint": { "numericValue": 2300.5 },
                    "cumulative-layout-shift": { "numericValue": 0.04 },
                    "server-response-time": { "numericValue": 310 },
                    "first-input-delay": { "displayValue": "n/a" },
                    "speed-index": { "numericValue": 1800 }
                }
            }
        });

        let metrics = parse_audits(&payload, "https://example.test/");
        let names: Vec<MetricName> = metrics.iter().map(|m| m.name).collect();
        assert_eq!(names, vec![MetricName::Lcp, MetricName::Cls, MetricName::Ttfb]);
        assert!(metrics.iter().all(|m| m.device_type == Some(DeviceType::Desktop)));
        assert!(metrics.iter().all(|m| m.url == "https://example.test/"));
    }

    #[test]
    fn test_parse_audits_without_result_is_empty() {
        assert!(parse_audits(&json!({"error": "quota"}), "https://example.test/").is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_api_falls_back_to_direct_strategy() {
        let source = Arc::new(TimingSource::new());
        source.push(
            PageContext {
                url: "https://example.test/".to_string(),
                ..Default::default()
            },
            vec![
                TimingEntry::LargestContentfulPaint { start_time: 1900.0 },
                TimingEntry::FirstInput {
                    start_time: 0.0,
                    processing_start: 12.0,
                },
                TimingEntry::LayoutShift {
                    value: 0.01,
                    had_recent_input: false,
                },
            ],
        );
        let fallback = Arc::new(DirectStrategy::new(source));
        let strategy = LighthouseStrategy::new(reqwest::Client::new(), "https://example.test/", fallback)
            // Port 9 (discard) on loopback refuses connections immediately.
            .with_api_url("http://127.0.0.1:9/runPagespeed")
            .with_timeout(Duration::from_secs(2));

        let outcome = strategy.collect().await;
        assert_eq!(outcome.metrics().len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_api_url_falls_back() {
        let fallback = Arc::new(
            DirectStrategy::new(Arc::new(TimingSource::new()))
                .with_observation_window(Duration::from_millis(10)),
        );
        let strategy = LighthouseStrategy::new(reqwest::Client::new(), "https://example.test/", fallback)
            .with_api_url("not a url");

        let outcome = strategy.collect().await;
        assert_eq!(outcome, CollectionOutcome::Collected(vec![]));
    }
}
