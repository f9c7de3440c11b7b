//! Weighted Core Web Vitals score.
//!
//! Each metric is interpolated against the active budget: 1.0 at or below
//! `good`, linearly down to 0.5 at `needsImprovement`, linearly down to 0.0 at
//! `poor`, and 0.0 beyond. The overall score is the weighted sum of the metrics
//! present in the cycle; a missing metric contributes nothing.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::budget::Budget;
use crate::metrics::{Metric, MetricCategory, MetricName};

const LOADING_WEIGHT: f64 = 0.45;
const INTERACTIVITY_WEIGHT: f64 = 0.30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    A,
    B,
    C,
    D,
    F,
}

impl Grade {
    pub fn from_score(score: f64) -> Self {
        if score >= 90.0 {
            Grade::A
        } else if score >= 80.0 {
            Grade::B
        } else if score >= 70.0 {
            Grade::C
        } else if score >= 60.0 {
            Grade::D
        } else {
            Grade::F
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Score {
    pub overall: f64,
    pub loading: f64,
    pub interactivity: f64,
    pub visual_stability: f64,
    pub grade: Grade,
}

pub fn weight(name: MetricName) -> f64 {
    match name {
        MetricName::Lcp => 0.25,
        MetricName::Fid => 0.25,
        MetricName::Cls => 0.25,
        MetricName::Fcp => 0.15,
        MetricName::Ttfb => 0.05,
        MetricName::Inp => 0.05,
    }
}

/// Score of a single value on a 0..=1 scale.
pub fn metric_score(name: MetricName, value: f64, budget: &Budget) -> f64 {
    let t = budget.threshold(name);
    if value.is_nan() {
        return 0.0;
    }
    if value <= t.good {
        1.0
    } else if value <= t.needs_improvement {
        0.5 + 0.5 * (t.needs_improvement - value) / (t.needs_improvement - t.good)
    } else if value <= t.poor {
        0.5 * (t.poor - value) / (t.poor - t.needs_improvement)
    } else {
        0.0
    }
}

pub fn score(metrics: &[Metric], budget: &Budget) -> Score {
    // Last sample per metric wins.
    let mut latest: HashMap<MetricName, f64> = HashMap::new();
    for metric in metrics {
        latest.insert(metric.name, metric.value);
    }

    let mut overall = 0.0;
    let mut loading = 0.0;
    let mut interactivity = 0.0;
    let mut visual_stability = 0.0;

    for name in MetricName::ALL {
        let Some(value) = latest.get(&name) else {
            continue;
        };
        let s = metric_score(name, *value, budget);
        let w = weight(name);
        overall += s * w;
        match name.category() {
            MetricCategory::Loading => loading += s * (w / LOADING_WEIGHT),
            MetricCategory::Interactivity => interactivity += s * (w / INTERACTIVITY_WEIGHT),
            MetricCategory::VisualStability => visual_stability = s,
        }
    }

    let overall = clamp_percent(overall);
    Score {
        overall,
        loading: clamp_percent(loading),
        interactivity: clamp_percent(interactivity),
        visual_stability: clamp_percent(visual_stability),
        grade: Grade::from_score(overall),
    }
}

fn clamp_percent(fraction: f64) -> f64 {
    (fraction * 100.0).clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(name: MetricName, value: f64) -> Metric {
        Metric::new(name, value, "https://example.test/", "test-agent")
    }

    fn healthy_page() -> Vec<Metric> {
        vec![
            metric(MetricName::Lcp, 2000.0),
            metric(MetricName::Fid, 50.0),
            metric(MetricName::Cls, 0.05),
            metric(MetricName::Fcp, 1500.0),
            metric(MetricName::Ttfb, 500.0),
        ]
    }

    #[test]
    fn test_grade_boundaries() {
        assert_eq!(Grade::from_score(100.0), Grade::A);
        assert_eq!(Grade::from_score(90.0), Grade::A);
        assert_eq!(Grade::from_score(89.999), Grade::B);
        assert_eq!(Grade::from_score(80.0), Grade::B);
        assert_eq!(Grade::from_score(79.999), Grade::C);
        assert_eq!(Grade::from_score(70.0), Grade::C);
        assert_eq!(Grade::from_score(60.0), Grade::D);
        assert_eq!(Grade::from_score(59.999), Grade::F);
        assert_eq!(Grade::from_score(0.0), Grade::F);
    }

    #[test]
    fn test_metric_score_interpolation_points() {
        let budget = Budget::production();
        assert_eq!(metric_score(MetricName::Lcp, 1000.0, &budget), 1.0);
        assert_eq!(metric_score(MetricName::Lcp, 2500.0, &budget), 1.0);
        assert!((metric_score(MetricName::Lcp, 3250.0, &budget) - 0.75).abs() < 1e-9);
        assert!((metric_score(MetricName::Lcp, 4000.0, &budget) - 0.5).abs() < 1e-9);
        assert!((metric_score(MetricName::Lcp, 4500.0, &budget) - 0.25).abs() < 1e-9);
        assert_eq!(metric_score(MetricName::Lcp, 5000.0, &budget), 0.0);
        assert_eq!(metric_score(MetricName::Lcp, 9000.0, &budget), 0.0);
    }

    #[test]
    fn test_healthy_page_scores_a() {
        let score = score(&healthy_page(), &Budget::production());
        assert!(score.overall >= 90.0, "overall was {}", score.overall);
        assert_eq!(score.grade, Grade::A);
        assert!((score.loading - 100.0).abs() < 1e-9);
        assert!((score.visual_stability - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_slow_lcp_drops_below_a() {
        let mut metrics = healthy_page();
        metrics[0] = metric(MetricName::Lcp, 4500.0);
        let score = score(&metrics, &Budget::production());
        assert!(score.grade > Grade::A);
        assert!(score.loading < 100.0);
    }

    #[test]
    fn test_score_is_monotonic_in_value() {
        let budget = Budget::production();
        for name in MetricName::ALL {
            let poor = budget.threshold(name).poor;
            let mut previous = f64::NEG_INFINITY;
            // Walk from worst to best; the score must never go down.
            for step in (0..=60).rev() {
                let value = poor * 1.2 * f64::from(step) / 60.0;
                let s = score(&[metric(name, value)], &budget).overall;
                assert!(s >= previous, "{} at {} scored {} < {}", name, value, s, previous);
                previous = s;
            }
        }
    }

    #[test]
    fn test_scores_stay_in_bounds() {
        let budget = Budget::production();
        let extremes = [-1.0e9, -1.0, 0.0, 1.0e12, f64::INFINITY];
        for value in extremes {
            let metrics: Vec<Metric> = MetricName::ALL.iter().map(|n| metric(*n, value)).collect();
            let s = score(&metrics, &budget);
            for v in [s.overall, s.loading, s.interactivity, s.visual_stability] {
                assert!((0.0..=100.0).contains(&v), "{} out of bounds for {}", v, value);
            }
        }
    }

    #[test]
    fn test_empty_metrics_score_zero() {
        let s = score(&[], &Budget::production());
        assert_eq!(s.overall, 0.0);
        assert_eq!(s.grade, Grade::F);
    }

    #[test]
    fn test_last_sample_wins() {
        let budget = Budget::production();
        let metrics = vec![metric(MetricName::Cls, 0.9), metric(MetricName::Cls, 0.01)];
        assert_eq!(score(&metrics, &budget).visual_stability, 100.0);
    }
}
