//! Reply dispatch: delivers a processor reply back to the user.
//!
//! Send errors surface to the flush coordinator, which logs them.  Nothing
//! here retries.

use std::time::Duration;

use async_trait::async_trait;

use wb_domain::config::WhatsAppConfig;
use wb_domain::ConversationId;

use super::processing::ReplyPayload;

/// WhatsApp rejects text bodies longer than this.
const MAX_TEXT_CHARS: usize = 4096;

#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
    #[error("send request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("whatsapp send failed: status={status} body={body}")]
    Rejected { status: u16, body: String },

    #[error("reply is empty")]
    Empty,

    #[error("dispatch not configured: {0}")]
    NotConfigured(String),
}

#[async_trait]
pub trait ReplySender: Send + Sync {
    async fn send(
        &self,
        conversation: &ConversationId,
        reply: &ReplyPayload,
    ) -> Result<(), DispatchError>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// WhatsApp Cloud API
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WhatsAppCloudSender {
    http: reqwest::Client,
    messages_url: String,
    access_token: String,
}

impl WhatsAppCloudSender {
    pub fn new(
        api_base_url: &str,
        api_version: &str,
        phone_number_id: &str,
        access_token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DispatchError> {
        let phone_number_id = phone_number_id.trim();
        if phone_number_id.is_empty() {
            return Err(DispatchError::NotConfigured(
                "whatsapp.phone_number_id is empty".into(),
            ));
        }
        let access_token = access_token.into();
        if access_token.trim().is_empty() {
            return Err(DispatchError::NotConfigured("access token is empty".into()));
        }

        Ok(Self {
            http: reqwest::Client::builder().timeout(timeout).build()?,
            messages_url: format!(
                "{}/{}/{}/messages",
                api_base_url.trim_end_matches('/'),
                api_version,
                phone_number_id
            ),
            access_token,
        })
    }

    /// Build from config, reading the access token from its env var.
    /// `timeout` bounds each send request.
    pub fn from_config(cfg: &WhatsAppConfig, timeout: Duration) -> Result<Self, DispatchError> {
        let token = std::env::var(&cfg.access_token_env).map_err(|_| {
            DispatchError::NotConfigured(format!("{} is not set", cfg.access_token_env))
        })?;
        Self::new(
            &cfg.api_base_url,
            &cfg.api_version,
            &cfg.phone_number_id,
            token,
            timeout,
        )
    }

    pub fn messages_url(&self) -> &str {
        &self.messages_url
    }

    async fn send_text(&self, to: &str, body: &str) -> Result<(), DispatchError> {
        let payload = text_payload(to, body);

        let response = self
            .http
            .post(&self.messages_url)
            .bearer_auth(&self.access_token)
            .json(&payload)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ReplySender for WhatsAppCloudSender {
    async fn send(
        &self,
        conversation: &ConversationId,
        reply: &ReplyPayload,
    ) -> Result<(), DispatchError> {
        let text = reply.text.trim();
        if text.is_empty() {
            return Err(DispatchError::Empty);
        }
        for chunk in split_text(text, MAX_TEXT_CHARS) {
            self.send_text(conversation.as_str(), &chunk).await?;
        }
        Ok(())
    }
}

fn text_payload(to: &str, body: &str) -> serde_json::Value {
    serde_json::json!({
        "messaging_product": "whatsapp",
        "recipient_type": "individual",
        "to": to,
        "type": "text",
        "text": {
            "preview_url": false,
            "body": body,
        }
    })
}

/// Split on char boundaries into pieces of at most `max` chars.
fn split_text(text: &str, max: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars.chunks(max.max(1)).map(|c| c.iter().collect()).collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LogSender
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Writes replies to the log instead of sending them.
#[derive(Debug, Default)]
pub struct LogSender;

#[async_trait]
impl ReplySender for LogSender {
    async fn send(
        &self,
        conversation: &ConversationId,
        reply: &ReplyPayload,
    ) -> Result<(), DispatchError> {
        tracing::info!(conversation_id = %conversation, text = %reply.text, "reply (log dispatch)");
        Ok(())
    }
}
