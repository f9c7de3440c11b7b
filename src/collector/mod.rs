//! Metric collection strategies.
//!
//! Pages push raw timing entries to the ingest endpoint; they land in a
//! [`TimingSource`], which the direct strategy samples in place of the
//! browser's performance timeline.

pub mod direct;
pub mod lighthouse;
pub mod sampled;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tracing::warn;

use crate::budget::{self, Budget, Violation};
use crate::config::TIMING_BUFFER_SIZE;
use crate::error::ConfigError;
use crate::metrics::{Metric, MetricName, Rating};

pub use direct::DirectStrategy;
pub use lighthouse::LighthouseStrategy;
pub use sampled::SampledStrategy;

#[derive(Debug, Clone, PartialEq)]
pub enum CollectionOutcome {
    Collected(Vec<Metric>),
    /// The strategy deliberately produced nothing this cycle (sampling).
    Skipped { reason: String },
}

impl CollectionOutcome {
    pub fn metrics(&self) -> &[Metric] {
        match self {
            CollectionOutcome::Collected(metrics) => metrics,
            CollectionOutcome::Skipped { .. } => &[],
        }
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, CollectionOutcome::Skipped { .. })
    }
}

/// A way of obtaining Core Web Vitals. `collect` never fails: problems are
/// logged and whatever was gathered so far is returned.
#[async_trait]
pub trait CollectionStrategy: Send + Sync {
    fn name(&self) -> &str;

    async fn collect(&self) -> CollectionOutcome;

    fn validate(&self, metrics: &[Metric], budget: &Budget) -> Vec<Violation> {
        budget::validate(metrics, budget)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Runtime timing entries reported by pages.
    WebApi,
    /// External Lighthouse-style scoring API with web-api fallback.
    Lighthouse,
    /// Probability-gated web-api collection.
    Rum,
}

/// Page the entries were observed on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageContext {
    pub url: String,
    #[serde(default)]
    pub user_agent: String,
    #[serde(default)]
    pub viewport_width: Option<u32>,
    #[serde(default)]
    pub connection_type: Option<String>,
    /// Epoch milliseconds at which the page reported the entries.
    #[serde(default)]
    pub timestamp: Option<i64>,
}

/// Raw performance-timeline entries, shaped like the browser APIs that produce them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entryType", rename_all = "kebab-case")]
pub enum TimingEntry {
    #[serde(rename_all = "camelCase")]
    Navigation {
        request_start: f64,
        response_start: f64,
    },
    #[serde(rename_all = "camelCase")]
    Paint { name: String, start_time: f64 },
    #[serde(rename_all = "camelCase")]
    LargestContentfulPaint { start_time: f64 },
    #[serde(rename_all = "camelCase")]
    FirstInput {
        start_time: f64,
        processing_start: f64,
    },
    #[serde(rename_all = "camelCase")]
    LayoutShift {
        value: f64,
        #[serde(default)]
        had_recent_input: bool,
    },
    /// Interaction timing; the longest one becomes INP.
    Event { duration: f64 },
    /// A value already computed by a web-vitals style library.
    WebVital {
        name: MetricName,
        value: f64,
        #[serde(default)]
        rating: Option<Rating>,
    },
}

impl TimingEntry {
    /// Whether every numeric field is a finite number.
    pub fn is_finite(&self) -> bool {
        match self {
            TimingEntry::Navigation {
                request_start,
                response_start,
            } => request_start.is_finite() && response_start.is_finite(),
            TimingEntry::Paint { start_time, .. } | TimingEntry::LargestContentfulPaint { start_time } => {
                start_time.is_finite()
            }
            TimingEntry::FirstInput {
                start_time,
                processing_start,
            } => start_time.is_finite() && processing_start.is_finite(),
            TimingEntry::LayoutShift { value, .. } => value.is_finite(),
            TimingEntry::Event { duration } => duration.is_finite(),
            TimingEntry::WebVital { value, .. } => value.is_finite(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimingSample {
    pub context: PageContext,
    pub entry: TimingEntry,
}

/// Bounded buffer of timing samples awaiting collection.
pub struct TimingSource {
    buffer: Mutex<VecDeque<TimingSample>>,
    capacity: usize,
    notify: Notify,
}

impl Default for TimingSource {
    fn default() -> Self {
        Self::new()
    }
}

impl TimingSource {
    pub fn new() -> Self {
        Self::with_capacity(TIMING_BUFFER_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Mutex::new(VecDeque::with_capacity(capacity.min(TIMING_BUFFER_SIZE))),
            capacity: capacity.max(1),
            notify: Notify::new(),
        }
    }

    pub fn push(&self, context: PageContext, entries: impl IntoIterator<Item = TimingEntry>) {
        let mut dropped = 0usize;
        {
            let mut buf = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
            for entry in entries {
                if buf.len() >= self.capacity {
                    buf.pop_front();
                    dropped += 1;
                }
                buf.push_back(TimingSample {
                    context: context.clone(),
                    entry,
                });
            }
        }
        if dropped > 0 {
            warn!("Timing buffer full, dropped {} oldest entries", dropped);
        }
        self.notify.notify_one();
    }

    pub fn drain(&self) -> Vec<TimingSample> {
        let mut buf = self.buffer.lock().unwrap_or_else(|e| e.into_inner());
        buf.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolves after the next `push` (or immediately if one happened since the
    /// last wait).
    pub async fn changed(&self) {
        self.notify.notified().await;
    }
}

pub type SharedTimingSource = Arc<TimingSource>;

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::WebApi => "web-api",
            StrategyKind::Lighthouse => "lighthouse",
            StrategyKind::Rum => "rum",
        }
    }
}

/// What a strategy needs to be built.
#[derive(Clone)]
pub struct StrategyOptions {
    pub source: SharedTimingSource,
    pub client: reqwest::Client,
    pub lighthouse_target: String,
    pub sample_rate: f64,
}

pub fn build_strategy(
    kind: StrategyKind,
    options: &StrategyOptions,
) -> Result<Arc<dyn CollectionStrategy>, ConfigError> {
    let direct: Arc<dyn CollectionStrategy> = Arc::new(DirectStrategy::new(options.source.clone()));
    Ok(match kind {
        StrategyKind::WebApi => direct,
        StrategyKind::Lighthouse => Arc::new(LighthouseStrategy::new(
            options.client.clone(),
            options.lighthouse_target.clone(),
            direct,
        )),
        StrategyKind::Rum => Arc::new(SampledStrategy::new(direct, options.sample_rate)?),
    })
}
