use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use vitals_monitor::config::{AppConfig, CliArgs};
use vitals_monitor::server;
use vitals_monitor::state::{AppState, SharedState};

const DEFAULT_LOG_FILTER: &str = "vitals_monitor=info,tower_http=info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| DEFAULT_LOG_FILTER.into())
}

/// Console logging, plus a non-blocking file layer when `--log-file` is set.
/// The returned guard must live until exit so buffered lines are flushed.
fn init_tracing(args: &CliArgs) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let console = tracing_subscriber::fmt::layer().with_filter(env_filter());

    let Some(path) = &args.log_file else {
        tracing_subscriber::registry().with(console).init();
        return None;
    };

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| std::path::Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "vitals-monitor.log".into());
    let (writer, guard) = tracing_appender::non_blocking(tracing_appender::rolling::never(dir, file_name));

    tracing_subscriber::registry()
        .with(console)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_filter(env_filter()),
        )
        .init();
    Some(guard)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    let _log_guard = init_tracing(&args);

    info!("Starting vitals-monitor v{}", env!("CARGO_PKG_VERSION"));
    info!("Environment: {:?}", args.environment);
    info!("Strategy: {}", args.strategy.as_str());
    info!("Auto-start: {}", args.auto_start);

    let config = match AppConfig::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    let port = config.port;
    let auto_start = config.auto_start;

    let state: SharedState = Arc::new(AppState::from_config(&config).await?);

    if auto_start {
        state.monitor.start().await;
    }

    let router = server::build_router(state.clone());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    info!("vitals-monitor listening on http://0.0.0.0:{}", port);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("vitals-monitor shutting down");
    // Page-unload analogue: deliver whatever the reporters still buffer.
    state.monitor.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
