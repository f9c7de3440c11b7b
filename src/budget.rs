//! Three-tier performance budgets and the budget validator.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::metrics::{Metric, MetricName, Rating};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Threshold {
    pub good: f64,
    pub needs_improvement: f64,
    pub poor: f64,
}

impl Threshold {
    /// Builds a threshold for `metric`, rejecting values that are not strictly increasing.
    pub fn new(
        metric: MetricName,
        good: f64,
        needs_improvement: f64,
        poor: f64,
    ) -> Result<Self, ConfigError> {
        let threshold = Self {
            good,
            needs_improvement,
            poor,
        };
        threshold.check(metric)?;
        Ok(threshold)
    }

    fn check(&self, metric: MetricName) -> Result<(), ConfigError> {
        if !(self.good.is_finite() && self.needs_improvement.is_finite() && self.poor.is_finite()) {
            return Err(ConfigError::NonFiniteThreshold(metric));
        }
        if !(self.good < self.needs_improvement && self.needs_improvement < self.poor) {
            return Err(ConfigError::ThresholdOrder {
                metric,
                good: self.good,
                needs_improvement: self.needs_improvement,
                poor: self.poor,
            });
        }
        Ok(())
    }

    pub fn rating(&self, value: f64) -> Rating {
        if value <= self.good {
            Rating::Good
        } else if value <= self.needs_improvement {
            Rating::NeedsImprovement
        } else {
            Rating::Poor
        }
    }

    /// Severity of a value against this threshold, `None` when within `good`.
    pub fn severity(&self, value: f64) -> Option<Severity> {
        if !value.is_finite() {
            return None;
        }
        if value > self.poor {
            Some(Severity::Critical)
        } else if value > self.needs_improvement {
            Some(Severity::Error)
        } else if value > self.good {
            Some(Severity::Warning)
        } else {
            None
        }
    }

    // const-context constructor for the presets below; ordering is covered by tests.
    const fn preset(good: f64, needs_improvement: f64, poor: f64) -> Self {
        Self {
            good,
            needs_improvement,
            poor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timings {
    pub lcp: Threshold,
    pub fid: Threshold,
    pub cls: Threshold,
    pub fcp: Threshold,
    pub ttfb: Threshold,
    pub inp: Threshold,
}

impl Timings {
    pub fn get(&self, name: MetricName) -> &Threshold {
        match name {
            MetricName::Lcp => &self.lcp,
            MetricName::Fid => &self.fid,
            MetricName::Cls => &self.cls,
            MetricName::Fcp => &self.fcp,
            MetricName::Ttfb => &self.ttfb,
            MetricName::Inp => &self.inp,
        }
    }
}

/// Byte limits. Declarative policy only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceBudget {
    pub total_size: u64,
    pub script_size: u64,
    pub style_size: u64,
    pub image_size: u64,
    pub font_size: u64,
}

/// Request-count limits. Declarative policy only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountBudget {
    pub scripts: u32,
    pub styles: u32,
    pub images: u32,
    pub fonts: u32,
    pub requests: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Budget {
    pub timings: Timings,
    pub resources: ResourceBudget,
    pub counts: CountBudget,
}

impl Budget {
    pub fn production() -> Self {
        Self {
            timings: Timings {
                lcp: Threshold::preset(2500.0, 4000.0, 5000.0),
                fid: Threshold::preset(100.0, 300.0, 500.0),
                cls: Threshold::preset(0.1, 0.25, 0.4),
                fcp: Threshold::preset(1800.0, 3000.0, 4000.0),
                ttfb: Threshold::preset(800.0, 1800.0, 3000.0),
                inp: Threshold::preset(200.0, 500.0, 1000.0),
            },
            resources: ResourceBudget {
                total_size: 1_000_000,
                script_size: 500_000,
                style_size: 100_000,
                image_size: 300_000,
                font_size: 100_000,
            },
            counts: CountBudget {
                scripts: 15,
                styles: 5,
                images: 20,
                fonts: 4,
                requests: 50,
            },
        }
    }

    /// More lenient budget for local development and staging.
    pub fn development() -> Self {
        Self {
            timings: Timings {
                lcp: Threshold::preset(3000.0, 5000.0, 7000.0),
                fid: Threshold::preset(200.0, 500.0, 1000.0),
                cls: Threshold::preset(0.15, 0.3, 0.5),
                fcp: Threshold::preset(2500.0, 4000.0, 5000.0),
                ttfb: Threshold::preset(1200.0, 2500.0, 4000.0),
                inp: Threshold::preset(300.0, 700.0, 1500.0),
            },
            resources: ResourceBudget {
                total_size: 2_000_000,
                script_size: 1_000_000,
                style_size: 200_000,
                image_size: 600_000,
                font_size: 200_000,
            },
            counts: CountBudget {
                scripts: 25,
                styles: 10,
                images: 30,
                fonts: 6,
                requests: 100,
            },
        }
    }

    pub fn threshold(&self, name: MetricName) -> &Threshold {
        self.timings.get(name)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for name in MetricName::ALL {
            self.timings.get(name).check(name)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    pub metric: MetricName,
    pub actual: f64,
    /// The `good` threshold the metric was held to.
    pub budget: f64,
    pub severity: Severity,
}

/// Compares metrics against the budget. Pure; the result is sorted so that it
/// does not depend on the order of `metrics`.
pub fn validate(metrics: &[Metric], budget: &Budget) -> Vec<Violation> {
    let mut violations: Vec<Violation> = metrics
        .iter()
        .filter_map(|metric| {
            let threshold = budget.threshold(metric.name);
            threshold.severity(metric.value).map(|severity| Violation {
                metric: metric.name,
                actual: metric.value,
                budget: threshold.good,
                severity,
            })
        })
        .collect();

    violations.sort_by(|a, b| {
        a.metric
            .cmp(&b.metric)
            .then(a.actual.total_cmp(&b.actual))
            .then(a.severity.cmp(&b.severity))
    });
    violations
}
