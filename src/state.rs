use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use crate::alerts::AlertStore;
use crate::collector::{build_strategy, SharedTimingSource, StrategyOptions, TimingSource};
use crate::config::{AppConfig, Environment, StorageKind, EVENT_CHANNEL_SIZE, HTTP_TIMEOUT_SECS};
use crate::events::{EventType, PerformanceEvent};
use crate::monitor::Monitor;
use crate::reporter::{BeaconReporter, ConsoleReporter, HttpReporter, SharedReporter};
use crate::storage::{MemoryStorage, PerformanceStorage, RemoteStorage, SqliteStorage};

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub environment: Environment,
    pub instance_id: String,
    pub started_at: DateTime<Utc>,
    pub monitor: Arc<Monitor>,
    pub timing: SharedTimingSource,
    pub alerts: Arc<AlertStore>,
    /// Used when the strategy is switched at runtime.
    pub strategy_options: RwLock<StrategyOptions>,
    pub events_tx: broadcast::Sender<PerformanceEvent>,
    pub http_client: reqwest::Client,
}

impl AppState {
    /// Wires the monitor's event bus into a broadcast channel for SSE clients.
    pub fn new(
        environment: Environment,
        monitor: Arc<Monitor>,
        timing: SharedTimingSource,
        alerts: Arc<AlertStore>,
        strategy_options: StrategyOptions,
        http_client: reqwest::Client,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        for event_type in EventType::ALL {
            let tx = events_tx.clone();
            // Never unsubscribed: the bus lives exactly as long as the state.
            let _ = monitor.subscribe(event_type, move |event| {
                // No SSE clients is not an error.
                let _ = tx.send(event.clone());
            });
        }

        Self {
            environment,
            instance_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            monitor,
            timing,
            alerts,
            strategy_options: RwLock::new(strategy_options),
            events_tx,
            http_client,
        }
    }

    /// Builds the full runtime from resolved configuration.
    pub async fn from_config(config: &AppConfig) -> anyhow::Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(HTTP_TIMEOUT_SECS))
            .pool_max_idle_per_host(4)
            .build()?;

        let timing: SharedTimingSource = Arc::new(TimingSource::new());
        let strategy_options = StrategyOptions {
            source: timing.clone(),
            client: http_client.clone(),
            lighthouse_target: config.lighthouse_target(),
            sample_rate: config.sample_rate,
        };
        let strategy = build_strategy(config.strategy, &strategy_options)?;

        let reporting = &config.monitoring.reporting;
        let storage: Arc<dyn PerformanceStorage> = match (reporting.storage, &reporting.endpoint) {
            (StorageKind::Memory, _) => Arc::new(MemoryStorage::with_capacity(reporting.max_reports)),
            (StorageKind::Local, _) => Arc::new(SqliteStorage::new(&config.db_path, reporting.max_reports)?),
            (StorageKind::Remote, Some(endpoint)) => Arc::new(RemoteStorage::new(
                http_client.clone(),
                endpoint.clone(),
                reporting.max_reports,
            )),
            (StorageKind::Remote, None) => {
                warn!("Remote storage selected without an endpoint, keeping reports in memory");
                Arc::new(MemoryStorage::with_capacity(reporting.max_reports))
            }
        };
        info!("Report storage: {}", storage.name());

        let monitor = Arc::new(Monitor::new(config.monitoring.clone(), strategy, storage)?);

        let mut reporters: Vec<SharedReporter> = Vec::new();
        if config.console_report {
            reporters.push(Arc::new(ConsoleReporter));
        }
        if let (Some(endpoint), false) = (&reporting.endpoint, reporting.storage == StorageKind::Remote) {
            reporters.push(Arc::new(HttpReporter::new(http_client.clone(), endpoint.clone())));
        }
        if let Some(endpoint) = &config.beacon_endpoint {
            reporters.push(Arc::new(
                BeaconReporter::new(http_client.clone(), endpoint.clone()).with_batch_size(reporting.batch_size),
            ));
        }
        for reporter in reporters {
            monitor.add_reporter(reporter).await;
        }

        let alerts = Arc::new(AlertStore::new(http_client.clone()));
        alerts.set_webhooks(config.monitoring.alerts.webhooks.clone());

        Ok(Self::new(
            config.monitoring.environment,
            monitor,
            timing,
            alerts,
            strategy_options,
            http_client,
        ))
    }
}
