//! Operator endpoints for a single conversation.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use wb_domain::ConversationId;

use super::api_error;
use crate::runtime::JobScheduler;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct ConversationStatus {
    pub conversation_id: String,
    /// Fragments waiting for the next flush.
    pub buffered: usize,
    /// A flush job is pending in this process.
    pub flush_scheduled: bool,
    /// An arm marker is outstanding in the shared cache (any process).
    pub armed: bool,
    /// A flush run currently holds the lock.
    pub locked: bool,
}

/// `GET /v1/conversations/:id`
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Response {
    let conversation = match ConversationId::parse(&raw_id) {
        Ok(id) => id,
        Err(e) => return api_error(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let buffered = match state.buffers.peek_length(&conversation).await {
        Ok(n) => n,
        Err(e) => return api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    };
    let locked = match state.locks.is_locked(&conversation).await {
        Ok(l) => l,
        Err(e) => return api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    };
    let armed = match state.arms.current(&conversation).await {
        Ok(token) => token.is_some(),
        Err(e) => return api_error(StatusCode::SERVICE_UNAVAILABLE, e.to_string()),
    };
    let flush_scheduled = state
        .jobs()
        .is_scheduled(&conversation.flush_job_name())
        .await
        .unwrap_or(false);

    Json(ConversationStatus {
        conversation_id: conversation.to_string(),
        buffered,
        flush_scheduled,
        armed,
        locked,
    })
    .into_response()
}

/// `POST /v1/conversations/:id/flush`
///
/// Cancels the pending debounce and runs the flush now, returning its
/// outcome.  Goes through the same lock as a scheduled run.
pub async fn flush_now(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Response {
    let conversation = match ConversationId::parse(&raw_id) {
        Ok(id) => id,
        Err(e) => return api_error(StatusCode::BAD_REQUEST, e.to_string()),
    };

    if let Err(e) = state.jobs().cancel(&conversation.flush_job_name()).await {
        tracing::warn!(
            conversation_id = %conversation,
            error = %e,
            "cancel before manual flush failed"
        );
    }
    tracing::info!(conversation_id = %conversation, "manual flush requested");

    let outcome = state.coordinator.flush(&conversation).await;
    (StatusCode::OK, Json(outcome)).into_response()
}
