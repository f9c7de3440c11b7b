//! Core Web Vitals data model shared by every stage of the pipeline.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One of the six Core Web Vitals the monitor understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricName {
    Lcp,
    Fid,
    Cls,
    Fcp,
    Ttfb,
    Inp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum MetricCategory {
    Loading,
    Interactivity,
    VisualStability,
}

impl MetricName {
    pub const ALL: [MetricName; 6] = [
        MetricName::Lcp,
        MetricName::Fid,
        MetricName::Cls,
        MetricName::Fcp,
        MetricName::Ttfb,
        MetricName::Inp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::Lcp => "lcp",
            MetricName::Fid => "fid",
            MetricName::Cls => "cls",
            MetricName::Fcp => "fcp",
            MetricName::Ttfb => "ttfb",
            MetricName::Inp => "inp",
        }
    }

    pub fn category(&self) -> MetricCategory {
        match self {
            MetricName::Lcp | MetricName::Fcp | MetricName::Ttfb => MetricCategory::Loading,
            MetricName::Fid | MetricName::Inp => MetricCategory::Interactivity,
            MetricName::Cls => MetricCategory::VisualStability,
        }
    }

    /// CLS is unitless; everything else is milliseconds.
    pub fn unit(&self) -> &'static str {
        match self {
            MetricName::Cls => "",
            _ => "ms",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricName {
    type Err = String;

    /// Accepts both the lowercase wire names and the upper-case names the
    /// web-vitals library reports (`LCP`, `CLS`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lcp" => Ok(MetricName::Lcp),
            "fid" => Ok(MetricName::Fid),
            "cls" => Ok(MetricName::Cls),
            "fcp" => Ok(MetricName::Fcp),
            "ttfb" => Ok(MetricName::Ttfb),
            "inp" => Ok(MetricName::Inp),
            other => Err(format!("unknown metric name: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
}

impl DeviceType {
    pub fn from_viewport_width(width: u32) -> Self {
        if width < 768 {
            DeviceType::Mobile
        } else if width < 1024 {
            DeviceType::Tablet
        } else {
            DeviceType::Desktop
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rating {
    Good,
    NeedsImprovement,
    Poor,
}

impl Rating {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rating::Good => "good",
            Rating::NeedsImprovement => "needs-improvement",
            Rating::Poor => "poor",
        }
    }
}

/// A single observed sample. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metric {
    pub name: MetricName,
    pub value: f64,
    /// Epoch milliseconds.
    pub timestamp: i64,
    pub url: String,
    pub user_agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<DeviceType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection_type: Option<String>,
}

impl Metric {
    pub fn new(
        name: MetricName,
        value: f64,
        url: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            name,
            value,
            timestamp: now_millis(),
            url: url.into(),
            user_agent: user_agent.into(),
            device_type: None,
            connection_type: None,
        }
    }

    pub fn with_device_type(mut self, device_type: DeviceType) -> Self {
        self.device_type = Some(device_type);
        self
    }

    pub fn with_connection_type(mut self, connection_type: impl Into<String>) -> Self {
        self.connection_type = Some(connection_type.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
