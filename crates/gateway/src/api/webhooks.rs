//! WhatsApp Cloud API webhook.
//!
//! - `GET /webhooks/whatsapp` answers Meta's subscription handshake.
//! - `POST /webhooks/whatsapp` receives message callbacks.  When an app
//!   secret is configured the body must carry a valid
//!   `X-Hub-Signature-256: sha256=<hex>` HMAC.
//!
//! The POST returns as soon as every fragment is buffered; processing
//! happens later, when the conversation's debounce fires.

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use super::api_error;
use crate::runtime::Accepted;
use crate::state::AppState;
use crate::whatsapp::WebhookEnvelope;

type HmacSha256 = Hmac<Sha256>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /webhooks/whatsapp
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

pub async fn verify(
    State(state): State<AppState>,
    Query(params): Query<VerifyParams>,
) -> Response {
    let Some(expected) = state.verify_token.as_deref() else {
        return api_error(StatusCode::FORBIDDEN, "webhook verification is not configured");
    };

    let token_ok = params
        .verify_token
        .as_deref()
        .map(|t| bool::from(t.as_bytes().ct_eq(expected.as_bytes())))
        .unwrap_or(false);

    match (params.mode.as_deref(), params.challenge) {
        (Some("subscribe"), Some(challenge)) if token_ok => {
            tracing::info!("webhook subscription verified");
            (StatusCode::OK, challenge).into_response()
        }
        _ => {
            tracing::warn!("webhook verification rejected");
            api_error(StatusCode::FORBIDDEN, "verification failed")
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /webhooks/whatsapp
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn receive(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // 1. Signature, when an app secret is configured.
    if let Some(secret) = state.app_secret.as_deref() {
        let header = headers
            .get("x-hub-signature-256")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if !signature_matches(secret, &body, header) {
            tracing::warn!("webhook signature mismatch");
            return api_error(StatusCode::UNAUTHORIZED, "invalid webhook signature");
        }
    }

    // 2. Parse + normalize.
    let envelope: WebhookEnvelope = match serde_json::from_slice(&body) {
        Ok(e) => e,
        Err(e) => {
            return api_error(StatusCode::BAD_REQUEST, format!("invalid payload: {e}"));
        }
    };
    let normalized = envelope.normalize();

    // 3. Buffer + arm, one fragment at a time in payload order.
    let mut accepted = 0usize;
    let mut duplicates = 0usize;
    for msg in normalized.messages {
        match state.ingress.accept(&msg.conversation_id, msg.fragment).await {
            Ok(Accepted::Buffered { .. }) => accepted += 1,
            Ok(Accepted::Duplicate) => duplicates += 1,
            Err(e) => {
                // Non-2xx makes the provider redeliver later.
                return api_error(
                    StatusCode::SERVICE_UNAVAILABLE,
                    format!("buffer unavailable: {e}"),
                );
            }
        }
    }

    (
        StatusCode::OK,
        Json(serde_json::json!({
            "accepted": accepted,
            "duplicates": duplicates,
            "statuses": normalized.statuses,
        })),
    )
        .into_response()
}

/// Check a `sha256=<hex>` header against the HMAC of `body`.
pub fn signature_matches(secret: &str, body: &[u8], header: &str) -> bool {
    let sig_hex = header.strip_prefix("sha256=").unwrap_or(header);

    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let computed = hex::encode(mac.finalize().into_bytes());

    computed.as_bytes().ct_eq(sig_hex.as_bytes()).unwrap_u8() == 1
}
