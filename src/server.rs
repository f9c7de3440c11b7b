use axum::routing::{get, post, put};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(crate::routes::health::health))
        // Collection and dashboard
        .route(
            "/performance",
            get(crate::routes::performance::list_reports).post(crate::routes::performance::ingest),
        )
        .route(
            "/performance/alerts",
            get(crate::routes::alerts::list_alerts)
                .post(crate::routes::alerts::create_alert)
                .patch(crate::routes::alerts::acknowledge_alert),
        )
        .route(
            "/performance/analysis",
            get(crate::routes::performance::analysis),
        )
        .route(
            "/performance/events",
            get(crate::routes::events::event_stream),
        )
        // Monitor control
        .route("/monitor/status", get(crate::routes::monitor::status))
        .route("/monitor/start", post(crate::routes::monitor::start))
        .route("/monitor/stop", post(crate::routes::monitor::stop))
        .route("/monitor/collect", post(crate::routes::monitor::collect))
        .route(
            "/monitor/strategy",
            put(crate::routes::monitor::set_strategy),
        )
        .route(
            "/monitor/config",
            get(crate::routes::monitor::config).patch(crate::routes::monitor::update_config),
        )
        .layer(cors)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
