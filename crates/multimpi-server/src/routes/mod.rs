//! HTTP routes. The broker serves a single JSON-RPC endpoint.

pub mod jsonrpc;

use std::sync::Arc;

use axum::Router;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Build the main Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(jsonrpc::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
