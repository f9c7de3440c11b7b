use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use super::{CollectionOutcome, CollectionStrategy, PageContext, SharedTimingSource, TimingEntry, TimingSample};
use crate::config::OBSERVATION_WINDOW_SECS;
use crate::metrics::{now_millis, DeviceType, Metric, MetricName};

/// Metrics that only show up once the user has interacted with the page, so
/// collection waits for them up to the observation window.
const OBSERVED_METRICS: [MetricName; 3] = [MetricName::Lcp, MetricName::Fid, MetricName::Cls];

/// Samples the runtime timing entries pages have reported.
pub struct DirectStrategy {
    source: SharedTimingSource,
    window: Duration,
}

impl DirectStrategy {
    pub fn new(source: SharedTimingSource) -> Self {
        Self {
            source,
            window: Duration::from_secs(OBSERVATION_WINDOW_SECS),
        }
    }

    pub fn with_observation_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

#[async_trait]
impl CollectionStrategy for DirectStrategy {
    fn name(&self) -> &str {
        "web-api"
    }

    async fn collect(&self) -> CollectionOutcome {
        let deadline = Instant::now() + self.window;
        let mut samples = Vec::new();

        loop {
            samples.extend(self.source.drain());
            if has_observed_all(&samples) {
                break;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            if tokio::time::timeout(remaining, self.source.changed()).await.is_err() {
                samples.extend(self.source.drain());
                break;
            }
        }

        let metrics = normalize(samples);
        debug!("web-api strategy collected {} metrics", metrics.len());
        CollectionOutcome::Collected(metrics)
    }
}

fn has_observed_all(samples: &[TimingSample]) -> bool {
    let seen: HashSet<MetricName> = samples.iter().filter_map(|s| entry_metric(&s.entry)).collect();
    OBSERVED_METRICS.iter().all(|m| seen.contains(m))
}

fn entry_metric(entry: &TimingEntry) -> Option<MetricName> {
    match entry {
        TimingEntry::Navigation { .. } => Some(MetricName::Ttfb),
        TimingEntry::Paint { name, .. } if name == "first-contentful-paint" => Some(MetricName::Fcp),
        TimingEntry::Paint { .. } => None,
        TimingEntry::LargestContentfulPaint { .. } => Some(MetricName::Lcp),
        TimingEntry::FirstInput { .. } => Some(MetricName::Fid),
        TimingEntry::LayoutShift { had_recent_input, .. } => {
            (!had_recent_input).then_some(MetricName::Cls)
        }
        TimingEntry::Event { .. } => Some(MetricName::Inp),
        TimingEntry::WebVital { name, .. } => Some(*name),
    }
}

#[derive(Default)]
struct PageAccumulator {
    context: PageContext,
    lcp: Option<f64>,
    cls: Option<f64>,
    inp: Option<f64>,
}

/// Turns raw timeline entries into metrics. Entries that accumulate (layout
/// shifts, LCP candidates, interactions) are folded per page url.
pub fn normalize(samples: Vec<TimingSample>) -> Vec<Metric> {
    let mut metrics = Vec::new();
    let mut pages: BTreeMap<String, PageAccumulator> = BTreeMap::new();

    for TimingSample { context, entry } in samples {
        let page = pages.entry(context.url.clone()).or_default();
        page.context = context.clone();

        match entry {
            TimingEntry::Navigation {
                request_start,
                response_start,
            } => {
                let ttfb = response_start - request_start;
                if ttfb >= 0.0 {
                    metrics.extend(to_metric(MetricName::Ttfb, ttfb, &context));
                }
            }
            TimingEntry::Paint { name, start_time } => {
                if name == "first-contentful-paint" {
                    metrics.extend(to_metric(MetricName::Fcp, start_time, &context));
                }
            }
            TimingEntry::LargestContentfulPaint { start_time } => page.lcp = Some(start_time),
            TimingEntry::FirstInput {
                start_time,
                processing_start,
            } => {
                let fid = processing_start - start_time;
                if fid >= 0.0 {
                    metrics.extend(to_metric(MetricName::Fid, fid, &context));
                }
            }
            TimingEntry::LayoutShift {
                value,
                had_recent_input,
            } => {
                if !had_recent_input {
                    *page.cls.get_or_insert(0.0) += value;
                }
            }
            TimingEntry::Event { duration } => {
                page.inp = Some(page.inp.map_or(duration, |d| d.max(duration)));
            }
            TimingEntry::WebVital { name, value, .. } => {
                metrics.extend(to_metric(name, value, &context));
            }
        }
    }

    for page in pages.into_values() {
        if let Some(lcp) = page.lcp {
            metrics.extend(to_metric(MetricName::Lcp, lcp, &page.context));
        }
        if let Some(cls) = page.cls {
            metrics.extend(to_metric(MetricName::Cls, cls, &page.context));
        }
        if let Some(inp) = page.inp {
            metrics.extend(to_metric(MetricName::Inp, inp, &page.context));
        }
    }

    metrics
}

/// `None` for values that are not finite, such as a CLS sum that overflowed.
fn to_metric(name: MetricName, value: f64, context: &PageContext) -> Option<Metric> {
    if !value.is_finite() {
        debug!("Dropping non-finite {} value from {}", name, context.url);
        return None;
    }
    let mut metric = Metric::new(name, value, context.url.clone(), context.user_agent.clone())
        .with_timestamp(context.timestamp.unwrap_or_else(now_millis));
    if let Some(width) = context.viewport_width {
        metric = metric.with_device_type(DeviceType::from_viewport_width(width));
    }
    if let Some(connection) = &context.connection_type {
        metric = metric.with_connection_type(connection.clone());
    }
    Some(metric)
}
