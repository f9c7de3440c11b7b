//! The monitor orchestrator: runs collection cycles on a schedule or on
//! demand and fans the results out to storage, events and reporters.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::budget::Violation;
use crate::collector::{CollectionOutcome, CollectionStrategy};
use crate::config::{ConfigPatch, MonitoringConfig, REPORTER_TIMEOUT_SECS};
use crate::error::{ConfigError, MonitorError};
use crate::events::{EventBus, EventPayload, EventType, MonitorStatus, PerformanceEvent, Subscription};
use crate::metrics::{now_millis, Metric};
use crate::report::{generate_report_id, Report};
use crate::reporter::{self, SharedReporter};
use crate::scoring;
use crate::storage::{PerformanceStorage, ReportFilters};

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Reported(Report),
    /// The strategy chose not to collect this cycle.
    Skipped { reason: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSnapshot {
    pub running: bool,
    pub strategy: String,
    pub storage: String,
    pub reporters: Vec<String>,
    pub interval_ms: u64,
    pub alerts_enabled: bool,
    pub cycles_completed: u64,
    pub cycles_skipped: u64,
    pub last_report_id: Option<String>,
    pub last_cycle_at: Option<i64>,
}

#[derive(Default)]
struct CycleStats {
    last_report_id: Option<String>,
    last_cycle_at: Option<i64>,
}

pub struct Monitor {
    config: RwLock<MonitoringConfig>,
    strategy: RwLock<Arc<dyn CollectionStrategy>>,
    storage: Arc<dyn PerformanceStorage>,
    reporters: RwLock<Vec<SharedReporter>>,
    events: EventBus,
    schedule: Mutex<Option<JoinHandle<()>>>,
    in_flight: AtomicUsize,
    tick_claimed: AtomicBool,
    shut_down: AtomicBool,
    completed: AtomicU64,
    skipped: AtomicU64,
    stats: RwLock<CycleStats>,
    reporter_timeout: Duration,
}

impl Monitor {
    pub fn new(
        config: MonitoringConfig,
        strategy: Arc<dyn CollectionStrategy>,
        storage: Arc<dyn PerformanceStorage>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config: RwLock::new(config),
            strategy: RwLock::new(strategy),
            storage,
            reporters: RwLock::new(Vec::new()),
            events: EventBus::new(),
            schedule: Mutex::new(None),
            in_flight: AtomicUsize::new(0),
            tick_claimed: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
            completed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            stats: RwLock::new(CycleStats::default()),
            reporter_timeout: Duration::from_secs(REPORTER_TIMEOUT_SECS),
        })
    }

    pub fn with_reporter_timeout(mut self, timeout: Duration) -> Self {
        self.reporter_timeout = timeout;
        self
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub async fn is_running(&self) -> bool {
        self.schedule.lock().await.is_some()
    }

    /// Starts the collection schedule. Calling it while running only warns.
    pub async fn start(self: &Arc<Self>) {
        // Never hold another lock while waiting on `schedule`.
        let period = Duration::from_millis(self.config.read().await.reporting.interval.max(1));
        let mut schedule = self.schedule.lock().await;
        if schedule.is_some() {
            warn!("Performance monitor is already running");
            return;
        }

        let monitor = self.clone();
        *schedule = Some(tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                monitor.scheduled_tick();
            }
        }));
        drop(schedule);

        let strategy = self.strategy.read().await.name().to_string();
        info!("Performance monitor started (strategy {}, every {:?})", strategy, period);
        self.events.emit(&PerformanceEvent::new(EventPayload::Status {
            status: MonitorStatus::Started,
            strategy: Some(strategy),
        }));
    }

    /// Stops the schedule. A cycle already in flight runs to completion.
    pub async fn stop(&self) {
        let Some(handle) = self.schedule.lock().await.take() else {
            return;
        };
        handle.abort();
        info!("Performance monitor stopped");
        self.events.emit(&PerformanceEvent::new(EventPayload::Status {
            status: MonitorStatus::Stopped,
            strategy: None,
        }));
    }

    /// Stops the schedule, flushes reporters and refuses further cycles.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.shut_down.store(true, Ordering::SeqCst);
        let reporters = self.reporters.read().await.clone();
        for reporter in reporters {
            match tokio::time::timeout(self.reporter_timeout, reporter.flush()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Failed to flush reporter {}: {}", reporter.name(), e),
                Err(_) => warn!("Timed out flushing reporter {}", reporter.name()),
            }
        }
    }

    /// Skip-if-busy: a tick that finds a cycle in flight does nothing. The
    /// slot is claimed before spawning, so two close ticks cannot both start
    /// a cycle. The cycle runs on its own task so that `stop` never cancels
    /// it midway.
    fn scheduled_tick(self: &Arc<Self>) {
        let Some(claim) = ScheduledClaim::acquire(self) else {
            debug!("Previous collection cycle still running, skipping tick");
            return;
        };
        tokio::spawn(async move {
            match claim.0.collect_metrics().await {
                Ok(CycleOutcome::Reported(report)) => {
                    debug!("Scheduled cycle produced report {}", report.id);
                }
                Ok(CycleOutcome::Skipped { reason }) => {
                    debug!("Scheduled cycle skipped: {}", reason);
                }
                Err(e) => error!("Scheduled collection cycle failed: {}", e),
            }
        });
    }

    /// Runs one full cycle now, whether or not the schedule is running.
    pub async fn collect_metrics(&self) -> Result<CycleOutcome, MonitorError> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(MonitorError::Other("Performance monitor has been shut down".to_string()));
        }
        let _guard = InFlight::enter(&self.in_flight);

        let config = self.config.read().await.clone();
        let strategy = self.strategy.read().await.clone();

        let metrics = match strategy.collect().await {
            CollectionOutcome::Collected(metrics) => metrics,
            CollectionOutcome::Skipped { reason } => {
                self.skipped.fetch_add(1, Ordering::Relaxed);
                return Ok(CycleOutcome::Skipped { reason });
            }
        };

        let violations = strategy.validate(&metrics, &config.budget);
        let score = scoring::score(&metrics, &config.budget);
        let report = Report {
            id: generate_report_id(),
            timestamp: now_millis(),
            url: report_url(&metrics, &config),
            metrics,
            budget: config.budget.clone(),
            violations,
            score,
        };

        if let Err(e) = self.storage.store(&report).await {
            error!("Failed to store report {} in {}: {}", report.id, self.storage.name(), e);
        }

        self.emit_cycle_events(&report, &config);

        let reporters = self.reporters.read().await.clone();
        reporter::dispatch(&reporters, &report, self.reporter_timeout).await;

        self.events.emit(&PerformanceEvent::new(EventPayload::ReportGenerated {
            report: Box::new(report.clone()),
        }));

        self.completed.fetch_add(1, Ordering::Relaxed);
        {
            let mut stats = self.stats.write().await;
            stats.last_report_id = Some(report.id.clone());
            stats.last_cycle_at = Some(report.timestamp);
        }
        if report.has_violations() {
            debug!(
                "Report {}: score {:.1}, violations [{}]",
                report.id,
                report.score.overall,
                summarize_violations(&report.violations)
            );
        } else {
            debug!("Report {}: score {:.1}, within budget", report.id, report.score.overall);
        }
        Ok(CycleOutcome::Reported(report))
    }

    fn emit_cycle_events(&self, report: &Report, config: &MonitoringConfig) {
        self.events.emit(&PerformanceEvent::new(EventPayload::MetricsCollected {
            metrics: report.metrics.clone(),
            report_id: report.id.clone(),
        }));

        if report.has_violations() {
            self.events.emit(&PerformanceEvent::new(EventPayload::BudgetViolated {
                violations: report.violations.clone(),
                report_id: report.id.clone(),
            }));
        }

        if config.alerts.enabled {
            for metric in exceeding(&report.metrics, config) {
                self.events.emit(&PerformanceEvent::new(EventPayload::ThresholdExceeded {
                    metric: metric.name,
                    value: metric.value,
                    threshold: config.alerts.thresholds.get(metric.name),
                    report_id: report.id.clone(),
                }));
            }
        }
    }

    /// Takes effect on the next cycle.
    pub async fn set_strategy(&self, strategy: Arc<dyn CollectionStrategy>) {
        info!("Switching collection strategy to {}", strategy.name());
        *self.strategy.write().await = strategy;
    }

    /// Merges `patch` into the active config. The merged config is validated
    /// first; an invalid one leaves the active config untouched. A new
    /// interval applies from the next `start`.
    pub async fn update_config(&self, patch: ConfigPatch) -> Result<MonitoringConfig, MonitorError> {
        let mut config = self.config.write().await;
        let mut updated = config.clone();
        updated.apply(patch);
        updated.validate()?;
        *config = updated.clone();
        info!("Monitoring config updated");
        Ok(updated)
    }

    pub async fn config(&self) -> MonitoringConfig {
        self.config.read().await.clone()
    }

    pub async fn add_reporter(&self, reporter: SharedReporter) {
        info!("Registered reporter {}", reporter.name());
        self.reporters.write().await.push(reporter);
    }

    pub fn subscribe<F>(&self, event_type: EventType, listener: F) -> Subscription
    where
        F: Fn(&PerformanceEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(event_type, listener)
    }

    /// Newest first.
    pub async fn get_reports(&self, limit: usize) -> Result<Vec<Report>, MonitorError> {
        self.reports(&ReportFilters::recent(limit)).await
    }

    pub async fn reports(&self, filters: &ReportFilters) -> Result<Vec<Report>, MonitorError> {
        Ok(self.storage.retrieve(filters).await?)
    }

    pub async fn report_count(&self) -> Result<usize, MonitorError> {
        Ok(self.storage.count().await?)
    }

    /// Takes each lock on its own; no guard is held across another await.
    pub async fn status(&self) -> MonitorSnapshot {
        let (interval_ms, alerts_enabled) = {
            let config = self.config.read().await;
            (config.reporting.interval, config.alerts.enabled)
        };
        let (last_report_id, last_cycle_at) = {
            let stats = self.stats.read().await;
            (stats.last_report_id.clone(), stats.last_cycle_at)
        };
        let running = self.is_running().await;
        let strategy = self.strategy.read().await.name().to_string();
        let reporters = self
            .reporters
            .read()
            .await
            .iter()
            .map(|r| r.name().to_string())
            .collect();

        MonitorSnapshot {
            running,
            strategy,
            storage: self.storage.name().to_string(),
            reporters,
            interval_ms,
            alerts_enabled,
            cycles_completed: self.completed.load(Ordering::Relaxed),
            cycles_skipped: self.skipped.load(Ordering::Relaxed),
            last_report_id,
            last_cycle_at,
        }
    }
}

/// Metrics strictly above their alert threshold.
fn exceeding<'a>(metrics: &'a [Metric], config: &'a MonitoringConfig) -> impl Iterator<Item = &'a Metric> {
    metrics
        .iter()
        .filter(move |m| m.value > config.alerts.thresholds.get(m.name))
}

/// The page a report is about: the most recent sample's url, else the first
/// configured endpoint.
fn report_url(metrics: &[Metric], config: &MonitoringConfig) -> String {
    metrics
        .iter()
        .max_by_key(|m| m.timestamp)
        .map(|m| m.url.clone())
        .or_else(|| config.endpoints.first().cloned())
        .unwrap_or_default()
}

/// The scheduled-cycle slot, released on drop.
struct ScheduledClaim(Arc<Monitor>);

impl ScheduledClaim {
    fn acquire(monitor: &Arc<Monitor>) -> Option<Self> {
        monitor
            .tick_claimed
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;
        let claim = Self(monitor.clone());
        // A manual cycle counts as busy too.
        if monitor.in_flight.load(Ordering::SeqCst) > 0 {
            return None;
        }
        Some(claim)
    }
}

impl Drop for ScheduledClaim {
    fn drop(&mut self) {
        self.0.tick_claimed.store(false, Ordering::SeqCst);
    }
}

/// Counts a cycle as in flight for as long as it lives.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Violations grouped for log lines, worst first.
pub fn summarize_violations(violations: &[Violation]) -> String {
    let mut sorted: Vec<&Violation> = violations.iter().collect();
    sorted.sort_by(|a, b| b.severity.cmp(&a.severity).then(a.metric.cmp(&b.metric)));
    sorted
        .iter()
        .map(|v| format!("{}:{}", v.metric, v.severity.as_str()))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Environment;
    use crate::metrics::MetricName;
    use crate::storage::MemoryStorage;
    use async_trait::async_trait;

    struct Fixed(Vec<Metric>);

    #[async_trait]
    impl CollectionStrategy for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
        async fn collect(&self) -> CollectionOutcome {
            CollectionOutcome::Collected(self.0.clone())
        }
    }

    fn monitor(metrics: Vec<Metric>) -> Arc<Monitor> {
        Arc::new(
            Monitor::new(
                MonitoringConfig::for_environment(Environment::Development),
                Arc::new(Fixed(metrics)),
                Arc::new(MemoryStorage::new()),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let monitor = monitor(vec![]);
        assert!(!monitor.is_running().await);
        monitor.stop().await;

        monitor.start().await;
        monitor.start().await;
        assert!(monitor.is_running().await);

        monitor.stop().await;
        monitor.stop().await;
        assert!(!monitor.is_running().await);
    }

    #[tokio::test]
    async fn test_back_to_back_ticks_start_one_cycle() {
        let monitor = monitor(vec![]);
        monitor.scheduled_tick();
        monitor.scheduled_tick();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(monitor.status().await.cycles_completed, 1);

        // The slot is released once the cycle ends.
        monitor.scheduled_tick();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(monitor.status().await.cycles_completed, 2);
    }

    #[tokio::test]
    async fn test_collect_runs_while_stopped() {
        let monitor = monitor(vec![Metric::new(MetricName::Lcp, 2000.0, "https://example.test/", "ua")]);
        let outcome = monitor.collect_metrics().await.unwrap();
        assert!(matches!(outcome, CycleOutcome::Reported(_)));
        assert_eq!(monitor.get_reports(10).await.unwrap().len(), 1);
        assert_eq!(monitor.status().await.cycles_completed, 1);
    }

    #[tokio::test]
    async fn test_report_url_falls_back_to_first_endpoint() {
        let monitor = monitor(vec![]);
        let CycleOutcome::Reported(report) = monitor.collect_metrics().await.unwrap() else {
            panic!("expected a report");
        };
        assert_eq!(report.url, "http://localhost:3000");
        assert_eq!(report.score.overall, 0.0);
    }

    #[tokio::test]
    async fn test_update_config_rejects_bad_budget() {
        let monitor = monitor(vec![]);
        let mut budget = monitor.config().await.budget;
        budget.timings.lcp.good = 9000.0;

        let result = monitor
            .update_config(ConfigPatch {
                budget: Some(budget),
                ..Default::default()
            })
            .await;
        assert!(matches!(result, Err(MonitorError::Config(_))));
        assert_eq!(monitor.config().await.budget.timings.lcp.good, 3000.0);
    }

    #[tokio::test]
    async fn test_shutdown_refuses_further_cycles() {
        let monitor = monitor(vec![]);
        monitor.shutdown().await;
        assert!(monitor.collect_metrics().await.is_err());
    }

    #[test]
    fn test_summarize_violations_worst_first() {
        use crate::budget::Severity;
        let violations = vec![
            Violation {
                metric: MetricName::Fid,
                actual: 250.0,
                budget: 200.0,
                severity: Severity::Warning,
            },
            Violation {
                metric: MetricName::Lcp,
                actual: 8000.0,
                budget: 3000.0,
                severity: Severity::Critical,
            },
        ];
        assert_eq!(summarize_violations(&violations), "lcp:critical, fid:warning");
    }
}
