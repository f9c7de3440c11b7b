use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::metrics::MetricName;

/// Rejected configuration. Raised at load time, never on the collection path.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{metric} thresholds must satisfy good < needsImprovement < poor (got {good}, {needs_improvement}, {poor})")]
    ThresholdOrder {
        metric: MetricName,
        good: f64,
        needs_improvement: f64,
        poor: f64,
    },

    #[error("{0} thresholds must be finite numbers")]
    NonFiniteThreshold(MetricName),

    #[error("Sample rate must be within [0, 1], got {0}")]
    SampleRate(f64),

    #[error("Reporting interval must be positive")]
    ZeroInterval,

    #[error("Invalid endpoint URL {url}: {reason}")]
    Endpoint { url: String, reason: String },

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage lock poisoned")]
    Poisoned,

    #[error("Storage task failed: {0}")]
    Join(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ReporterError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Endpoint returned status {0}")]
    Status(u16),

    #[error("Reporter timed out after {0}s")]
    Timeout(u64),

    #[error("{0}")]
    Other(String),
}

impl IntoResponse for MonitorError {
    fn into_response(self) -> Response {
        let status = match &self {
            MonitorError::Config(_) => StatusCode::BAD_REQUEST,
            MonitorError::Validation(_) => StatusCode::BAD_REQUEST,
            MonitorError::NotFound(_) => StatusCode::NOT_FOUND,
            MonitorError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            MonitorError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = serde_json::json!({
            "error": self.to_string(),
        });

        (status, axum::Json(body)).into_response()
    }
}
