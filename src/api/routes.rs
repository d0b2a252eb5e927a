use crate::api::{handlers, AppState};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};

/// Build the main API router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health & metrics
        .route("/health", get(handlers::health_check))
        .route("/health/live", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        // Services
        .route("/v1/services", get(handlers::list_services))
        .route("/v1/services/run", post(handlers::run_services))
        // Relay intake
        .route("/v1/relays/:name/outbound", post(handlers::enqueue_outbound))
        .route("/v1/relays/:name/inbound", post(handlers::enqueue_inbound))
        .route("/v1/relays/:name/pending", get(handlers::relay_pending))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
}
