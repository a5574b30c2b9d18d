//! HTTP routes for the billing service.
//!
//! Defines the Axum router and application state.

use crate::handlers;
use crate::services::ConferenceService;
use axum::{
    routing::{get, post, put},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub conferences: Arc<ConferenceService>,
}

/// Build the application routes.
///
/// - `/health` - Ledger connectivity probe
/// - `/metrics` - Prometheus scrape endpoint, when a handle is given
/// - `/api/...` - Client credential routes and SFU callbacks
/// - TraceLayer for request logging
pub fn build_routes(state: Arc<AppState>, metrics_handle: Option<PrometheusHandle>) -> Router {
    let api_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/api/participants", get(handlers::list_participants))
        .route(
            "/api/participant/create/:name",
            post(handlers::create_conference),
        )
        .route(
            "/api/participant/join/:sid/:name",
            post(handlers::join_conference),
        )
        .route(
            "/api/participant/add/:sid/:uid/:stream_id/:duration",
            put(handlers::add_participant),
        )
        .route(
            "/api/participant/remove/:sid/:uid/:duration",
            put(handlers::remove_participant),
        )
        .route(
            "/api/conference/remove/:sid/:duration",
            put(handlers::remove_conference),
        )
        .with_state(state);

    let router = match metrics_handle {
        Some(handle) => api_routes.merge(
            Router::new().route(
                "/metrics",
                get(move || {
                    let handle = handle.clone();
                    async move { handle.render() }
                }),
            ),
        ),
        None => api_routes,
    };

    router.layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
