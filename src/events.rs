//! In-process publish/subscribe for pipeline events.
//!
//! Dispatch is synchronous: `emit` calls every listener for the event type in
//! subscription order, on the caller's thread, over a snapshot of the listener
//! list. Listeners may therefore subscribe or unsubscribe from inside a
//! callback. A panicking listener is logged and skipped.

use serde::Serialize;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, Weak};
use tracing::error;

use crate::budget::Violation;
use crate::metrics::{now_millis, Metric, MetricName};
use crate::report::Report;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    MetricCollected,
    BudgetViolated,
    ThresholdExceeded,
    ReportGenerated,
}

impl EventType {
    pub const ALL: [EventType; 4] = [
        EventType::MetricCollected,
        EventType::BudgetViolated,
        EventType::ThresholdExceeded,
        EventType::ReportGenerated,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::MetricCollected => "metric-collected",
            EventType::BudgetViolated => "budget-violated",
            EventType::ThresholdExceeded => "threshold-exceeded",
            EventType::ReportGenerated => "report-generated",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorStatus {
    Started,
    Stopped,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum EventPayload {
    /// Lifecycle notice; published on the `metric-collected` channel.
    Status {
        status: MonitorStatus,
        strategy: Option<String>,
    },
    MetricsCollected {
        metrics: Vec<Metric>,
        report_id: String,
    },
    BudgetViolated {
        violations: Vec<Violation>,
        report_id: String,
    },
    ThresholdExceeded {
        metric: MetricName,
        value: f64,
        threshold: f64,
        report_id: String,
    },
    ReportGenerated {
        report: Box<Report>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub timestamp: i64,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl PerformanceEvent {
    pub fn new(payload: EventPayload) -> Self {
        let event_type = match &payload {
            EventPayload::Status { .. } | EventPayload::MetricsCollected { .. } => {
                EventType::MetricCollected
            }
            EventPayload::BudgetViolated { .. } => EventType::BudgetViolated,
            EventPayload::ThresholdExceeded { .. } => EventType::ThresholdExceeded,
            EventPayload::ReportGenerated { .. } => EventType::ReportGenerated,
        };
        Self {
            event_type,
            timestamp: now_millis(),
            payload,
        }
    }
}

pub type Listener = Arc<dyn Fn(&PerformanceEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<EventType, Vec<(u64, Listener)>>,
}

#[derive(Clone, Default)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
}

/// Handle returned by [`EventBus::subscribe`]. Dropping it keeps the listener
/// registered; call [`Subscription::unsubscribe`] to remove it.
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    event_type: EventType,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut registry = registry.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(list) = registry.listeners.get_mut(&self.event_type) {
            list.retain(|(id, _)| *id != self.id);
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, event_type: EventType, listener: F) -> Subscription
    where
        F: Fn(&PerformanceEvent) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .listeners
            .entry(event_type)
            .or_default()
            .push((id, Arc::new(listener)));

        Subscription {
            registry: Arc::downgrade(&self.registry),
            event_type,
            id,
        }
    }

    pub fn emit(&self, event: &PerformanceEvent) {
        let snapshot: Vec<Listener> = {
            let registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
            match registry.listeners.get(&event.event_type) {
                Some(list) => list.iter().map(|(_, l)| l.clone()).collect(),
                None => return,
            }
        };

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!(
                    "Performance event listener panicked while handling {}",
                    event.event_type.as_str()
                );
            }
        }
    }

    pub fn listener_count(&self, event_type: EventType) -> usize {
        let registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        registry.listeners.get(&event_type).map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        let mut registry = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        registry.listeners.clear();
    }
}
