pub mod auth;
pub mod conversations;
pub mod inbound;
pub mod webhooks;

use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
///
/// Routes are split into **public** (no bearer token; the WhatsApp webhook
/// authenticates by signature instead) and **protected** (gated behind the
/// `WB_API_TOKEN` bearer-token middleware).
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/health", get(health))
        // WhatsApp Cloud API webhook
        .route(
            "/webhooks/whatsapp",
            get(webhooks::verify).post(webhooks::receive),
        )
        // Normalized envelope for other connectors
        .route("/v1/inbound", post(inbound::inbound));

    let protected = Router::new()
        // Conversation diagnostics / operator tools
        .route("/v1/conversations/:id", get(conversations::get_conversation))
        .route("/v1/conversations/:id/flush", post(conversations::flush_now))
        .route_layer(middleware::from_fn_with_state(
            state,
            auth::require_api_token,
        ));

    public.merge(protected)
}

/// `GET /health`
async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Build a standardized JSON error response: `{ "error": "<message>" }`.
pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({ "error": message.into() })),
    )
        .into_response()
}
