//! POST /jsonrpc: checkins and hello_world.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use multimpi_core::config::RPC_PATH;

use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route(RPC_PATH, post(handle_rpc))
}

async fn handle_rpc(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let reply = state.dispatcher.handle_body(&body);
    state.check_drained();
    match reply {
        Some(value) => Json(value).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request};
    use multimpi_core::BrokerConfig;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::routes::build_router;

    fn app() -> (Router, Arc<AppState>) {
        let state = Arc::new(AppState::new(BrokerConfig::default()));
        (build_router(Arc::clone(&state)), state)
    }

    fn post_json(body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(RPC_PATH)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_hello_world() {
        let (app, _) = app();
        let response = app
            .oneshot(post_json(json!({
                "jsonrpc": "2.0", "method": "hello_world", "params": {}, "id": 1
            })))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["id"], 1);
        assert_eq!(body["result"], json!({"hello": "world!"}));
    }

    #[tokio::test]
    async fn test_notification_has_no_body() {
        let (app, _) = app();
        let response = app
            .oneshot(post_json(json!({"jsonrpc": "2.0", "method": "hello_world"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_get_not_allowed() {
        let (app, _) = app();
        let request = Request::builder()
            .uri(RPC_PATH)
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn test_leader_checkin_registers() {
        let (app, state) = app();
        let response = app
            .oneshot(post_json(json!({
                "jsonrpc": "2.0", "method": "leader_checkin", "id": 7,
                "params": {
                    "host": "head", "pid": 10, "cores": 2, "wanted_cores": 4,
                    "state": "waiting", "pubkey": "", "seq": 1
                }
            })))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert!(body["result"].is_null());
        assert!(state.dispatcher.scheduler().leader("head_10").is_some());
    }

    #[tokio::test]
    async fn test_shutdown_with_empty_registry_notifies() {
        let (_, state) = app();
        state.shutdown();
        tokio::time::timeout(std::time::Duration::from_secs(1), state.drained.notified())
            .await
            .unwrap();
    }
}
