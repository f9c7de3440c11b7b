use clap::Parser;
use vitals_monitor::budget::Budget;
use vitals_monitor::collector::StrategyKind;
use vitals_monitor::config::*;
use vitals_monitor::error::ConfigError;
use vitals_monitor::metrics::MetricName;

fn args(extra: &[&str]) -> CliArgs {
    let mut argv = vec!["vitals-monitor"];
    argv.extend_from_slice(extra);
    CliArgs::parse_from(argv)
}

#[test]
fn test_default_constants() {
    assert_eq!(DEFAULT_PORT, 9880);
    assert_eq!(REPORT_HISTORY_SIZE, 100);
    assert_eq!(BEACON_BATCH_SIZE, 5);
    assert_eq!(OBSERVATION_WINDOW_SECS, 10);
    assert_eq!(DEFAULT_SAMPLE_RATE, 0.1);
}

#[test]
fn test_environment_intervals_and_batches() {
    let production = MonitoringConfig::for_environment(Environment::Production);
    let staging = MonitoringConfig::for_environment(Environment::Staging);
    let development = MonitoringConfig::for_environment(Environment::Development);

    assert_eq!(production.reporting.interval, 60_000);
    assert_eq!(staging.reporting.interval, 30_000);
    assert_eq!(development.reporting.interval, 15_000);

    assert_eq!(production.reporting.batch_size, 10);
    assert_eq!(development.reporting.batch_size, 5);
    assert_eq!(production.reporting.storage, StorageKind::Remote);
    assert_eq!(development.reporting.storage, StorageKind::Local);
}

#[test]
fn test_environment_budgets_and_alerts() {
    let production = MonitoringConfig::for_environment(Environment::Production);
    let staging = MonitoringConfig::for_environment(Environment::Staging);

    assert_eq!(production.budget, Budget::production());
    assert_eq!(staging.budget, Budget::development());
    assert!(production.alerts.enabled);
    assert!(!staging.alerts.enabled);
    assert_eq!(production.alerts.thresholds.get(MetricName::Lcp), 3000.0);
    assert_eq!(staging.alerts.thresholds.get(MetricName::Lcp), 5000.0);
}

#[test]
fn test_environment_endpoints() {
    let development = MonitoringConfig::for_environment(Environment::Development);
    assert_eq!(development.endpoints.len(), 6);
    assert_eq!(development.endpoints[0], "http://localhost:3000");
    assert_eq!(development.endpoints[1], "http://localhost:3000/search");

    let staging = MonitoringConfig::for_environment(Environment::Staging);
    assert!(staging
        .endpoints
        .iter()
        .all(|e| e.starts_with("https://staging.skyscout.ai")));
}

#[test]
fn test_from_args_defaults() {
    let config = AppConfig::from_args(args(&[])).unwrap();
    assert_eq!(config.port, DEFAULT_PORT);
    assert_eq!(config.strategy, StrategyKind::WebApi);
    assert_eq!(config.sample_rate, DEFAULT_SAMPLE_RATE);
    assert_eq!(config.monitoring.environment, Environment::Development);
    assert!(!config.auto_start);
    assert!(config.db_path.ends_with(DEFAULT_DB_FILE));
    assert_eq!(config.lighthouse_target(), "http://localhost:3000");
}

#[test]
fn test_from_args_overrides() {
    let config = AppConfig::from_args(args(&[
        "--environment",
        "staging",
        "--strategy",
        "rum",
        "--sample-rate",
        "0.5",
        "--interval-secs",
        "5",
        "--storage",
        "memory",
        "--lighthouse-target",
        "https://example.test/deals",
        "--auto-start",
    ]))
    .unwrap();

    assert_eq!(config.monitoring.environment, Environment::Staging);
    assert_eq!(config.strategy, StrategyKind::Rum);
    assert_eq!(config.sample_rate, 0.5);
    assert_eq!(config.monitoring.reporting.interval, 5_000);
    assert_eq!(config.monitoring.reporting.storage, StorageKind::Memory);
    assert_eq!(config.lighthouse_target(), "https://example.test/deals");
    assert!(config.auto_start);
}

#[test]
fn test_from_args_rejects_bad_sample_rate() {
    let result = AppConfig::from_args(args(&["--sample-rate", "1.5"]));
    assert!(matches!(result, Err(ConfigError::SampleRate(rate)) if rate == 1.5));
}

#[test]
fn test_from_args_rejects_zero_interval() {
    let result = AppConfig::from_args(args(&["--interval-secs", "0"]));
    assert!(matches!(result, Err(ConfigError::ZeroInterval)));
}

#[test]
fn test_from_args_rejects_bad_remote_endpoint() {
    let result = AppConfig::from_args(args(&["--remote-endpoint", "not a url"]));
    assert!(matches!(result, Err(ConfigError::Endpoint { .. })));
}

#[test]
fn test_patch_replaces_sections() {
    let mut config = MonitoringConfig::for_environment(Environment::Development);
    let patch = ConfigPatch {
        endpoints: Some(vec!["https://example.test".to_string()]),
        ..Default::default()
    };
    assert!(!patch.is_empty());
    config.apply(patch);

    assert_eq!(config.endpoints, vec!["https://example.test"]);
    assert_eq!(config.budget, Budget::development());
    assert!(ConfigPatch::default().is_empty());
}

#[test]
fn test_validate_rejects_bad_webhook() {
    let mut config = MonitoringConfig::for_environment(Environment::Development);
    config.alerts.webhooks = vec!["hooks.example.test/no-scheme".to_string()];
    assert!(matches!(config.validate(), Err(ConfigError::Endpoint { .. })));
}
