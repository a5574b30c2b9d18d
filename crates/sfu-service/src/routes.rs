//! HTTP routes for the SFU service.
//!
//! The signaling listener serves a single route, `GET /ws`, which upgrades
//! to a WebSocket carrying JSON-RPC. Health and metrics live on a separate
//! listener (see [`crate::observability`]).

use crate::signaling::handler::SignalContext;
use crate::signaling::ws::serve_connection;
use axum::{
    extract::{ws::WebSocketUpgrade, State},
    response::IntoResponse,
    routing::get,
    Router,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Application state shared across all connections.
#[derive(Clone)]
pub struct AppState {
    pub signal: Arc<SignalContext>,

    /// Cancelled at service shutdown; closes every open connection.
    pub shutdown: CancellationToken,
}

pub fn build_routes(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_connection(socket, state.signal, state.shutdown))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_app_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AppState>();
    }
}
