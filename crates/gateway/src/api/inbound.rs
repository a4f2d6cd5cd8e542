//! Inbound channel contract: the normalized envelope that non-WhatsApp
//! connectors (and tests) post.
//!
//! `POST /v1/inbound` takes the same path as the WhatsApp webhook: dedupe,
//! buffer, re-arm.  It returns as soon as the fragment is buffered.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::{Deserialize, Serialize};

use wb_domain::{ConversationId, Fragment, FragmentKind};

use super::api_error;
use crate::runtime::Accepted;
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request / Response shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct InboundEnvelope {
    /// External conversation key (phone number / wa_id).
    pub conversation_id: String,
    pub content: String,
    #[serde(default)]
    pub kind: FragmentKind,
    /// Provider message id; repeated ids are dropped.
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct InboundResponse {
    pub conversation_id: String,
    /// `false` when the message id was already seen.
    pub accepted: bool,
    /// Buffer length after the append (0 for duplicates).
    pub buffered: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /v1/inbound
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn inbound(
    State(state): State<AppState>,
    Json(body): Json<InboundEnvelope>,
) -> Response {
    let conversation = match ConversationId::parse(&body.conversation_id) {
        Ok(id) => id,
        Err(e) => return api_error(StatusCode::BAD_REQUEST, e.to_string()),
    };

    let mut fragment = Fragment::new(body.kind, body.content);
    if let Some(id) = body.message_id {
        fragment = fragment.with_message_id(id);
    }
    if let Some(meta) = body.metadata {
        fragment = fragment.with_metadata(meta);
    }

    let (accepted, buffered) = match state.ingress.accept(&conversation, fragment).await {
        Ok(Accepted::Buffered { buffered }) => (true, buffered),
        Ok(Accepted::Duplicate) => (false, 0),
        Err(e) => {
            return api_error(
                StatusCode::SERVICE_UNAVAILABLE,
                format!("buffer unavailable: {e}"),
            )
        }
    };

    (
        StatusCode::OK,
        Json(InboundResponse {
            conversation_id: conversation.to_string(),
            accepted,
            buffered,
        }),
    )
        .into_response()
}
