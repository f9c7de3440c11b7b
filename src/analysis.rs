//! Dashboard analytics over collected metrics: trends between reports,
//! anomaly detection against history, insights and per-metric aggregates.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::budget::{Budget, Violation};
use crate::metrics::{Metric, MetricName, Rating};
use crate::scoring;

/// Relative change below this percentage counts as stable.
const STABLE_BAND_PCT: f64 = 5.0;
/// CLS moves in small absolute steps, so any change past this is reported.
const CLS_SIGNIFICANT_PCT: f64 = 10.0;
const MIN_HISTORY: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Improving,
    Degrading,
    Stable,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trend {
    pub metric: MetricName,
    /// Percent change from previous to current, one decimal.
    pub change: f64,
    pub trend: TrendDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyKind {
    Outlier,
    Spike,
    Regression,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Anomaly {
    pub metric: MetricName,
    pub anomaly_type: AnomalyKind,
    pub value: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Insights {
    pub insights: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricAggregate {
    pub count: usize,
    pub average: f64,
    pub min: f64,
    pub max: f64,
    pub ratings: BTreeMap<Rating, usize>,
}

/// Compares each metric in `current` with the first sample of the same name in
/// `previous`. Metrics missing from `previous` or with a zero baseline are
/// left out.
pub fn calculate_trends(current: &[Metric], previous: &[Metric]) -> Vec<Trend> {
    let mut trends: Vec<Trend> = Vec::new();
    for metric in current {
        let Some(before) = previous.iter().find(|m| m.name == metric.name) else {
            continue;
        };
        if before.value == 0.0 {
            continue;
        }

        let change = (metric.value - before.value) / before.value * 100.0;
        let mut trend = if change.abs() < STABLE_BAND_PCT {
            TrendDirection::Stable
        } else if change < 0.0 {
            TrendDirection::Improving
        } else {
            TrendDirection::Degrading
        };
        if metric.name == MetricName::Cls && change.abs() > CLS_SIGNIFICANT_PCT {
            trend = if change < 0.0 {
                TrendDirection::Improving
            } else {
                TrendDirection::Degrading
            };
        }

        let entry = Trend {
            metric: metric.name,
            change: (change * 10.0).round() / 10.0,
            trend,
        };
        // Later samples of the same metric replace earlier ones.
        match trends.iter_mut().find(|t| t.metric == metric.name) {
            Some(existing) => *existing = entry,
            None => trends.push(entry),
        }
    }
    trends
}

pub fn detect_anomalies(metrics: &[Metric], history: &[Metric]) -> Vec<Anomaly> {
    let mut anomalies = Vec::new();

    for metric in metrics {
        let values: Vec<f64> = history
            .iter()
            .filter(|m| m.name == metric.name)
            .map(|m| m.value)
            .collect();
        if values.len() < MIN_HISTORY {
            continue;
        }

        let mean = values.iter().sum::<f64>() / values.len() as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
        let std_dev = variance.sqrt();
        let mut push = |kind| {
            anomalies.push(Anomaly {
                metric: metric.name,
                anomaly_type: kind,
                value: metric.value,
            })
        };

        if (metric.value - mean).abs() > 2.0 * std_dev {
            push(AnomalyKind::Outlier);
        }

        let recent = &values[values.len() - 3..];
        let recent_mean = recent.iter().sum::<f64>() / recent.len() as f64;
        if metric.value > recent_mean * 1.5 {
            push(AnomalyKind::Spike);
        }

        let last5 = &values[values.len() - 5..];
        let rising = last5.windows(2).all(|w| w[1] >= w[0]);
        if rising && metric.value > last5[0] * 1.2 {
            push(AnomalyKind::Regression);
        }
    }

    anomalies
}

pub fn generate_insights(metrics: &[Metric], violations: &[Violation], budget: &Budget) -> Insights {
    let mut out = Insights::default();

    for violation in violations {
        let over_pct = if violation.budget != 0.0 {
            ((violation.actual - violation.budget) / violation.budget * 100.0).round()
        } else {
            0.0
        };
        let (label, recommendation) = match violation.metric {
            MetricName::Lcp => (
                "Largest Contentful Paint",
                "Optimize images, preload critical resources, improve server response time",
            ),
            MetricName::Fid => (
                "First Input Delay",
                "Reduce JavaScript execution time, code splitting, defer non-critical scripts",
            ),
            MetricName::Cls => (
                "Cumulative Layout Shift",
                "Set dimensions for images/videos, avoid inserting content above existing content",
            ),
            MetricName::Fcp => (
                "First Contentful Paint",
                "Optimize critical rendering path, inline critical CSS, preload fonts",
            ),
            MetricName::Ttfb => (
                "Time to First Byte",
                "Optimize server performance, use CDN, enable compression",
            ),
            MetricName::Inp => (
                "Interaction to Next Paint",
                "Break up long tasks and yield to the main thread in event handlers",
            ),
        };
        out.insights.push(format!(
            "{} is {} ({}% over budget)",
            label,
            format_metric(violation.metric, violation.actual),
            over_pct
        ));
        out.recommendations.push(recommendation.to_string());
    }

    let score = scoring::score(metrics, budget);
    if score.overall < 70.0 {
        out.recommendations.push("Consider implementing performance monitoring alerts".to_string());
        out.recommendations.push("Review and optimize critical user journeys".to_string());
    }
    if score.loading < 80.0 {
        out.recommendations.push("Implement lazy loading for images and components".to_string());
        out.recommendations.push("Optimize bundle size and enable tree shaking".to_string());
    }
    if score.interactivity < 80.0 {
        out.recommendations.push("Reduce main thread blocking time".to_string());
        out.recommendations.push("Implement virtual scrolling for large lists".to_string());
    }

    out
}

pub fn format_metric(name: MetricName, value: f64) -> String {
    match name {
        MetricName::Cls => format!("{:.3}", value),
        _ => format!("{}ms", value.round() as i64),
    }
}

/// Per-metric count, mean, extremes and rating histogram.
pub fn aggregate(metrics: &[Metric], budget: &Budget) -> BTreeMap<MetricName, MetricAggregate> {
    let mut sums: HashMap<MetricName, f64> = HashMap::new();
    let mut out: BTreeMap<MetricName, MetricAggregate> = BTreeMap::new();

    for metric in metrics.iter().filter(|m| m.value.is_finite()) {
        let agg = out.entry(metric.name).or_insert_with(|| MetricAggregate {
            count: 0,
            average: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            ratings: [Rating::Good, Rating::NeedsImprovement, Rating::Poor]
                .into_iter()
                .map(|r| (r, 0))
                .collect(),
        });
        agg.count += 1;
        agg.min = agg.min.min(metric.value);
        agg.max = agg.max.max(metric.value);
        *agg.ratings.entry(budget.threshold(metric.name).rating(metric.value)).or_default() += 1;
        *sums.entry(metric.name).or_default() += metric.value;
    }

    for (name, agg) in out.iter_mut() {
        agg.average = sums.get(name).copied().unwrap_or_default() / agg.count as f64;
    }
    out
}
