//! Report storage backends.

use async_trait::async_trait;
use rusqlite::{params, Connection};
use serde::Deserialize;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::config::{HTTP_TIMEOUT_SECS, REPORT_HISTORY_SIZE};
use crate::error::StorageError;
use crate::metrics::MetricName;
use crate::report::Report;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportFilters {
    /// Inclusive lower bound on the report timestamp (epoch ms).
    pub start: Option<i64>,
    /// Inclusive upper bound on the report timestamp (epoch ms).
    pub end: Option<i64>,
    /// Substring of the report url.
    pub url: Option<String>,
    /// Only reports carrying this metric.
    pub metric: Option<MetricName>,
    pub min_score: Option<f64>,
    pub max_score: Option<f64>,
    pub limit: Option<usize>,
}

impl ReportFilters {
    pub fn recent(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Default::default()
        }
    }

    pub fn matches(&self, report: &Report) -> bool {
        if self.start.is_some_and(|start| report.timestamp < start) {
            return false;
        }
        if self.end.is_some_and(|end| report.timestamp > end) {
            return false;
        }
        if let Some(url) = &self.url {
            if !report.url.contains(url.as_str()) {
                return false;
            }
        }
        if let Some(metric) = self.metric {
            if !report.metrics.iter().any(|m| m.name == metric) {
                return false;
            }
        }
        if self.min_score.is_some_and(|min| report.score.overall < min) {
            return false;
        }
        if self.max_score.is_some_and(|max| report.score.overall > max) {
            return false;
        }
        true
    }
}

/// Durable home for reports. Implementations return newest first.
#[async_trait]
pub trait PerformanceStorage: Send + Sync {
    fn name(&self) -> &str;

    async fn store(&self, report: &Report) -> Result<(), StorageError>;

    async fn retrieve(&self, filters: &ReportFilters) -> Result<Vec<Report>, StorageError>;

    /// Number of reports currently held.
    async fn count(&self) -> Result<usize, StorageError>;
}

// --- Memory ---

pub struct MemoryStorage {
    reports: RwLock<VecDeque<Report>>,
    capacity: usize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::with_capacity(REPORT_HISTORY_SIZE)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            reports: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PerformanceStorage for MemoryStorage {
    fn name(&self) -> &str {
        "memory"
    }

    async fn store(&self, report: &Report) -> Result<(), StorageError> {
        let mut reports = self.reports.write().await;
        reports.push_front(report.clone());
        reports.truncate(self.capacity);
        Ok(())
    }

    async fn retrieve(&self, filters: &ReportFilters) -> Result<Vec<Report>, StorageError> {
        let reports = self.reports.read().await;
        let limit = filters.limit.unwrap_or(usize::MAX);
        Ok(reports
            .iter()
            .filter(|r| filters.matches(r))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn count(&self) -> Result<usize, StorageError> {
        Ok(self.reports.read().await.len())
    }
}

// --- SQLite ---

/// Reports serialized as JSON rows, pruned to the newest `max_reports` on
/// every store.
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
    max_reports: usize,
}

impl SqliteStorage {
    pub fn new(db_path: &Path, max_reports: usize) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
            max_reports,
        };
        storage.init_schema()?;
        debug!("Opened report database at {:?}", db_path);
        Ok(storage)
    }

    fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().map_err(|_| StorageError::Poisoned)?;
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS reports (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                timestamp INTEGER NOT NULL,
                url TEXT NOT NULL,
                overall_score REAL NOT NULL,
                body TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_reports_timestamp ON reports(timestamp);
        ",
        )?;
        Ok(())
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, StorageError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock().map_err(|_| StorageError::Poisoned)?;
            f(&conn)
        })
        .await
        .map_err(|e| StorageError::Join(e.to_string()))?
    }
}

#[async_trait]
impl PerformanceStorage for SqliteStorage {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn store(&self, report: &Report) -> Result<(), StorageError> {
        let body = serde_json::to_string(report)?;
        let id = report.id.clone();
        let timestamp = report.timestamp;
        let url = report.url.clone();
        let overall = report.score.overall;
        let max_reports = self.max_reports as i64;

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO reports (id, timestamp, url, overall_score, body)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, timestamp, url, overall, body],
            )?;
            conn.execute(
                "DELETE FROM reports WHERE seq NOT IN (
                    SELECT seq FROM reports ORDER BY timestamp DESC, seq DESC LIMIT ?1
                 )",
                params![max_reports],
            )?;
            Ok(())
        })
        .await
    }

    async fn retrieve(&self, filters: &ReportFilters) -> Result<Vec<Report>, StorageError> {
        let filters = filters.clone();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT body FROM reports
                 WHERE (?1 IS NULL OR timestamp >= ?1)
                   AND (?2 IS NULL OR timestamp <= ?2)
                   AND (?3 IS NULL OR instr(url, ?3) > 0)
                   AND (?4 IS NULL OR overall_score >= ?4)
                   AND (?5 IS NULL OR overall_score <= ?5)
                 ORDER BY timestamp DESC, seq DESC",
            )?;
            let rows = stmt.query_map(
                params![filters.start, filters.end, filters.url, filters.min_score, filters.max_score],
                |row| row.get::<_, String>(0),
            )?;

            let limit = filters.limit.unwrap_or(usize::MAX);
            let mut reports = Vec::new();
            for body in rows {
                let report: Report = match serde_json::from_str(&body?) {
                    Ok(report) => report,
                    Err(e) => {
                        warn!("Skipping unreadable stored report: {}", e);
                        continue;
                    }
                };
                if !filters.matches(&report) {
                    continue;
                }
                reports.push(report);
                if reports.len() >= limit {
                    break;
                }
            }
            Ok(reports)
        })
        .await
    }

    async fn count(&self) -> Result<usize, StorageError> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM reports", [], |row| row.get(0))?;
            Ok(count as usize)
        })
        .await
    }
}

// --- Remote ---

/// Serves reads from memory and forwards every stored report to a remote
/// collection endpoint. Forwarding is best-effort.
pub struct RemoteStorage {
    client: reqwest::Client,
    endpoint: String,
    local: MemoryStorage,
}

impl RemoteStorage {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, max_reports: usize) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            local: MemoryStorage::with_capacity(max_reports),
        }
    }
}

#[async_trait]
impl PerformanceStorage for RemoteStorage {
    fn name(&self) -> &str {
        "remote"
    }

    async fn store(&self, report: &Report) -> Result<(), StorageError> {
        self.local.store(report).await?;

        let result = self
            .client
            .post(&self.endpoint)
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .json(report)
            .send()
            .await;
        match result {
            Ok(resp) if resp.status().is_success() => {
                debug!("Forwarded report {} to {}", report.id, self.endpoint);
            }
            Ok(resp) => {
                warn!("Remote storage {} rejected report {}: {}", self.endpoint, report.id, resp.status());
            }
            Err(e) => {
                warn!("Failed to forward report {} to {}: {}", report.id, self.endpoint, e);
            }
        }
        Ok(())
    }

    async fn retrieve(&self, filters: &ReportFilters) -> Result<Vec<Report>, StorageError> {
        self.local.retrieve(filters).await
    }

    async fn count(&self) -> Result<usize, StorageError> {
        self.local.count().await
    }
}
