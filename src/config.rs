use clap::Parser;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::budget::Budget;
use crate::collector::StrategyKind;
use crate::error::ConfigError;
use crate::metrics::MetricName;

/// Vitals Monitor: collects Core Web Vitals, scores them against a budget and
/// serves the results to dashboards.
#[derive(Parser, Debug, Clone)]
#[command(name = "vitals-monitor")]
pub struct CliArgs {
    /// HTTP port for the collection and dashboard API
    #[arg(long = "port", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Deployment environment; selects budget, intervals and alerting defaults
    #[arg(short = 'e', long = "environment", value_enum, default_value_t = Environment::Development)]
    pub environment: Environment,

    /// JSON file overriding parts of the monitoring config
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// Collection strategy
    #[arg(short = 's', long = "strategy", value_enum, default_value_t = StrategyKind::WebApi)]
    pub strategy: StrategyKind,

    /// Fraction of cycles that collect when using the rum strategy
    #[arg(long = "sample-rate", default_value_t = DEFAULT_SAMPLE_RATE)]
    pub sample_rate: f64,

    /// Page audited by the lighthouse strategy (defaults to the first configured endpoint)
    #[arg(long = "lighthouse-target")]
    pub lighthouse_target: Option<String>,

    /// Collection interval in seconds (overrides the environment default)
    #[arg(short = 'i', long = "interval-secs")]
    pub interval_secs: Option<u64>,

    /// Where reports are kept
    #[arg(long = "storage", value_enum)]
    pub storage: Option<StorageKind>,

    /// SQLite file for local storage
    #[arg(long = "db-path")]
    pub db_path: Option<PathBuf>,

    /// Endpoint that receives every report when storage is remote
    #[arg(long = "remote-endpoint")]
    pub remote_endpoint: Option<String>,

    /// Collection endpoint for the beacon batch sender
    #[arg(long = "beacon-endpoint")]
    pub beacon_endpoint: Option<String>,

    /// Log a summary of every report
    #[arg(long = "console-report")]
    pub console_report: bool,

    /// Start the collection schedule immediately
    #[arg(short = 'a', long = "auto-start")]
    pub auto_start: bool,

    /// Also write logs to this file
    #[arg(short = 'l', long = "log-file")]
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Development,
    Staging,
    Production,
}

impl Environment {
    fn base_url(&self) -> &'static str {
        match self {
            Environment::Development => "http://localhost:3000",
            Environment::Staging => "https://staging.skyscout.ai",
            Environment::Production => "https://skyscout.ai",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// In-memory, lost on restart.
    Memory,
    /// SQLite file.
    Local,
    /// In-memory reads plus a POST of each report to the reporting endpoint.
    Remote,
}

/// Per-metric values above which `threshold-exceeded` fires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertThresholds {
    pub lcp: f64,
    pub fid: f64,
    pub cls: f64,
    pub fcp: f64,
    pub ttfb: f64,
    pub inp: f64,
}

impl AlertThresholds {
    pub fn get(&self, name: MetricName) -> f64 {
        match name {
            MetricName::Lcp => self.lcp,
            MetricName::Fid => self.fid,
            MetricName::Cls => self.cls,
            MetricName::Fcp => self.fcp,
            MetricName::Ttfb => self.ttfb,
            MetricName::Inp => self.inp,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertConfig {
    pub enabled: bool,
    pub thresholds: AlertThresholds,
    #[serde(default)]
    pub webhooks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportingConfig {
    /// Collection interval in milliseconds.
    pub interval: u64,
    pub storage: StorageKind,
    #[serde(default)]
    pub endpoint: Option<String>,
    pub batch_size: usize,
    #[serde(default = "default_max_reports")]
    pub max_reports: usize,
}

fn default_max_reports() -> usize {
    REPORT_HISTORY_SIZE
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub environment: Environment,
    pub endpoints: Vec<String>,
    pub budget: Budget,
    pub alerts: AlertConfig,
    pub reporting: ReportingConfig,
}

/// Partial config, used both for the override file and for runtime updates.
/// Present sections replace the corresponding section wholesale.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigPatch {
    #[serde(default)]
    pub endpoints: Option<Vec<String>>,
    #[serde(default)]
    pub budget: Option<Budget>,
    #[serde(default)]
    pub alerts: Option<AlertConfig>,
    #[serde(default)]
    pub reporting: Option<ReportingConfig>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_none()
            && self.budget.is_none()
            && self.alerts.is_none()
            && self.reporting.is_none()
    }
}

impl MonitoringConfig {
    pub fn for_environment(environment: Environment) -> Self {
        let production = environment == Environment::Production;
        let budget = if production {
            Budget::production()
        } else {
            Budget::development()
        };
        let thresholds = if production {
            AlertThresholds {
                lcp: 3000.0,
                fid: 200.0,
                cls: 0.2,
                fcp: 2500.0,
                ttfb: 1500.0,
                inp: 400.0,
            }
        } else {
            AlertThresholds {
                lcp: 5000.0,
                fid: 500.0,
                cls: 0.3,
                fcp: 4000.0,
                ttfb: 3000.0,
                inp: 800.0,
            }
        };
        let webhooks = if production {
            ["PERFORMANCE_WEBHOOK_URL", "SLACK_WEBHOOK_URL"]
                .iter()
                .filter_map(|var| std::env::var(var).ok())
                .filter(|url| !url.is_empty())
                .collect()
        } else {
            Vec::new()
        };
        let interval = match environment {
            Environment::Production => 60_000,
            Environment::Staging => 30_000,
            Environment::Development => 15_000,
        };

        let base = environment.base_url();
        let endpoints = ["", "/search", "/deals", "/flights", "/hotels", "/trips"]
            .iter()
            .map(|path| format!("{}{}", base, path))
            .collect();

        MonitoringConfig {
            environment,
            endpoints,
            budget,
            alerts: AlertConfig {
                enabled: production,
                thresholds,
                webhooks,
            },
            reporting: ReportingConfig {
                interval,
                storage: if production {
                    StorageKind::Remote
                } else {
                    StorageKind::Local
                },
                endpoint: if production {
                    std::env::var("PERFORMANCE_API_ENDPOINT").ok()
                } else {
                    None
                },
                batch_size: if production { 10 } else { 5 },
                max_reports: REPORT_HISTORY_SIZE,
            },
        }
    }

    pub fn apply(&mut self, patch: ConfigPatch) {
        if let Some(endpoints) = patch.endpoints {
            self.endpoints = endpoints;
        }
        if let Some(budget) = patch.budget {
            self.budget = budget;
        }
        if let Some(alerts) = patch.alerts {
            self.alerts = alerts;
        }
        if let Some(reporting) = patch.reporting {
            self.reporting = reporting;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.budget.validate()?;
        if self.reporting.interval == 0 {
            return Err(ConfigError::ZeroInterval);
        }
        let urls = self
            .alerts
            .webhooks
            .iter()
            .chain(self.reporting.endpoint.iter());
        for raw in urls {
            url::Url::parse(raw).map_err(|e| ConfigError::Endpoint {
                url: raw.clone(),
                reason: e.to_string(),
            })?;
        }
        Ok(())
    }
}

/// Resolved runtime configuration.
pub struct AppConfig {
    pub port: u16,
    pub monitoring: MonitoringConfig,
    pub strategy: StrategyKind,
    pub sample_rate: f64,
    pub lighthouse_target: Option<String>,
    pub db_path: PathBuf,
    pub beacon_endpoint: Option<String>,
    pub console_report: bool,
    pub auto_start: bool,
    pub log_file: Option<PathBuf>,
}

// Server constants
pub const DEFAULT_PORT: u16 = 9880;

// Collection constants
pub const OBSERVATION_WINDOW_SECS: u64 = 10;
pub const TIMING_BUFFER_SIZE: usize = 1000;
pub const DEFAULT_SAMPLE_RATE: f64 = 0.1;
pub const LIGHTHOUSE_API_URL: &str = "https://www.googleapis.com/pagespeedonline/v5/runPagespeed";
pub const LIGHTHOUSE_TIMEOUT_SECS: u64 = 5;

// Storage constants
pub const REPORT_HISTORY_SIZE: usize = 100;
pub const DEFAULT_DB_FILE: &str = "vitals-monitor.db";

// Reporter constants
pub const REPORTER_TIMEOUT_SECS: u64 = 10;
pub const BEACON_BATCH_SIZE: usize = 5;
pub const HTTP_TIMEOUT_SECS: u64 = 10;

// Alert constants
pub const ALERT_HISTORY_SIZE: usize = 100;
pub const ALERT_BURST_WINDOW_SECS: i64 = 300; // 5 minutes
pub const ALERT_BURST_THRESHOLD: usize = 5;
pub const ALERT_RECENT_WINDOW_SECS: i64 = 3600;

// Event stream constants
pub const EVENT_CHANNEL_SIZE: usize = 256;

/// Value at or above which an incoming alert is `critical` rather than `high`.
pub const CRITICAL_ALERT_THRESHOLDS: &[(MetricName, f64)] = &[
    (MetricName::Lcp, 6000.0),
    (MetricName::Fid, 500.0),
    (MetricName::Cls, 0.5),
    (MetricName::Ttfb, 1000.0),
    (MetricName::Inp, 800.0),
];

impl AppConfig {
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        let mut monitoring = MonitoringConfig::for_environment(args.environment);

        if let Some(path) = &args.config {
            let patch = crate::settings::load_overrides(path)?;
            monitoring.apply(patch);
        }
        if let Some(secs) = args.interval_secs {
            monitoring.reporting.interval = secs.saturating_mul(1000);
        }
        if let Some(storage) = args.storage {
            monitoring.reporting.storage = storage;
        }
        if args.remote_endpoint.is_some() {
            monitoring.reporting.endpoint = args.remote_endpoint;
        }
        monitoring.validate()?;

        if !(0.0..=1.0).contains(&args.sample_rate) {
            return Err(ConfigError::SampleRate(args.sample_rate));
        }

        let db_path = args.db_path.unwrap_or_else(default_db_path);

        Ok(AppConfig {
            port: args.port,
            monitoring,
            strategy: args.strategy,
            sample_rate: args.sample_rate,
            lighthouse_target: args.lighthouse_target,
            db_path,
            beacon_endpoint: args.beacon_endpoint,
            console_report: args.console_report,
            auto_start: args.auto_start,
            log_file: args.log_file,
        })
    }

    /// Page audited by the lighthouse strategy.
    pub fn lighthouse_target(&self) -> String {
        self.lighthouse_target
            .clone()
            .or_else(|| self.monitoring.endpoints.first().cloned())
            .unwrap_or_else(|| self.monitoring.environment.base_url().to_string())
    }
}

pub fn default_db_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("vitals-monitor")
        .join(DEFAULT_DB_FILE)
}
