use clap::Parser;
use tempfile::TempDir;
use vitals_monitor::config::{AppConfig, CliArgs};
use vitals_monitor::error::ConfigError;
use vitals_monitor::metrics::MetricName;
use vitals_monitor::settings::load_overrides;

#[test]
fn test_load_missing_file() {
    let dir = TempDir::new().unwrap();
    let result = load_overrides(&dir.path().join("nonexistent.json"));
    assert!(matches!(result, Err(ConfigError::Io(_))));
}

#[test]
fn test_load_invalid_json() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.json");
    std::fs::write(&path, "not json at all {{{").unwrap();
    assert!(matches!(load_overrides(&path), Err(ConfigError::Parse(_))));
}

#[test]
fn test_load_partial_patch() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("overrides.json");
    std::fs::write(&path, r#"{"endpoints": ["https://example.test/a", "https://example.test/b"]}"#).unwrap();

    let patch = load_overrides(&path).unwrap();
    assert_eq!(patch.endpoints.as_deref().map(<[String]>::len), Some(2));
    assert!(patch.budget.is_none());
    assert!(patch.alerts.is_none());
    assert!(patch.reporting.is_none());
}

#[test]
fn test_load_rejects_out_of_order_budget() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("overrides.json");
    let mut budget = serde_json::to_value(vitals_monitor::budget::Budget::production()).unwrap();
    budget["timings"]["cls"]["good"] = serde_json::json!(0.3);
    std::fs::write(&path, serde_json::json!({ "budget": budget }).to_string()).unwrap();

    let result = load_overrides(&path);
    assert!(matches!(
        result,
        Err(ConfigError::ThresholdOrder { metric: MetricName::Cls, .. })
    ));
}

#[test]
fn test_config_file_applies_on_startup() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("overrides.json");
    std::fs::write(
        &path,
        r#"{"reporting": {"interval": 2000, "storage": "memory", "batchSize": 3}}"#,
    )
    .unwrap();

    let args = CliArgs::parse_from(["vitals-monitor", "--config", path.to_str().unwrap()]);
    let config = AppConfig::from_args(args).unwrap();
    assert_eq!(config.monitoring.reporting.interval, 2000);
    assert_eq!(config.monitoring.reporting.batch_size, 3);
    assert_eq!(config.monitoring.reporting.max_reports, 100);
}

#[test]
fn test_cli_interval_wins_over_config_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("overrides.json");
    std::fs::write(
        &path,
        r#"{"reporting": {"interval": 2000, "storage": "memory", "batchSize": 3}}"#,
    )
    .unwrap();

    let args = CliArgs::parse_from([
        "vitals-monitor",
        "--config",
        path.to_str().unwrap(),
        "--interval-secs",
        "7",
    ]);
    let config = AppConfig::from_args(args).unwrap();
    assert_eq!(config.monitoring.reporting.interval, 7000);
}
