//! Route table and request handlers.
//!
//! | Route | Method | Handler |
//! |-------|--------|---------|
//! | `/call` | POST | Forward a call to a worker and return its outcome |
//! | `/health` | GET | Worker and pending-call counts |
//! | `/`, `/ws` | GET | WebSocket upgrade for workers |

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::debug;

use crate::error::Error;
use crate::protocol::CallRequest;
use crate::relay::Broker;

// ============================================================================
// Router
// ============================================================================

/// Builds the relay router over `broker`.
pub fn router(broker: Arc<Broker>) -> Router {
    Router::new()
        .route("/call", post(call_handler))
        .route("/health", get(health_handler))
        .route("/", get(ws_handler))
        .route("/ws", get(ws_handler))
        .with_state(broker)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ============================================================================
// Handlers
// ============================================================================

/// `POST /call`: forwards the call and answers with the worker's outcome.
async fn call_handler(
    State(broker): State<Arc<Broker>>,
    payload: Result<Json<CallRequest>, JsonRejection>,
) -> Response {
    let request = match payload {
        Ok(Json(request)) => request,
        Err(rejection) => {
            debug!(error = %rejection, "Rejected call body");
            return Error::invalid_request(rejection.body_text()).into_response();
        }
    };

    match broker.dispatcher().dispatch(request).await {
        Ok(outcome) => Json(outcome).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /health`.
async fn health_handler(State(broker): State<Arc<Broker>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "workers": broker.registry().len(),
        "pending": broker.correlation().len(),
    }))
}

/// WebSocket upgrade for worker sockets.
async fn ws_handler(ws: WebSocketUpgrade, State(broker): State<Arc<Broker>>) -> Response {
    ws.on_upgrade(move |socket| broker.serve_socket(socket))
}

// ============================================================================
// Tests
// ============================================================================
