//! Downstream processing of a drained batch.
//!
//! The coordinator hands the batch (plus recent history) to a [`Processor`]
//! exactly once per flush and acts on the returned [`ProcessOutcome`].

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use wb_domain::config::ProcessingConfig;
use wb_domain::{ConversationId, Fragment};

use super::history::HistoryEntry;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Input / output shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Everything the processor sees for one flush.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationContext {
    pub conversation_id: ConversationId,
    /// The drained batch, in arrival order.
    pub fragments: Vec<Fragment>,
    /// Contents of `fragments`, in the same order.
    pub messages: Vec<String>,
    pub history: Vec<HistoryEntry>,
}

impl ConversationContext {
    pub fn new(
        conversation_id: ConversationId,
        fragments: Vec<Fragment>,
        history: Vec<HistoryEntry>,
    ) -> Self {
        let messages = fragments.iter().map(|f| f.content.clone()).collect();
        Self {
            conversation_id,
            fragments,
            messages,
            history,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyPayload {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ProcessOutcome {
    Reply(ReplyPayload),
    /// Hand the conversation to a human operator.
    Escalate { reason: String },
    NoReply,
}

#[derive(thiserror::Error, Debug)]
pub enum ProcessingError {
    #[error("processing backend request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("processing backend returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("processing timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait Processor: Send + Sync {
    async fn process(&self, ctx: &ConversationContext) -> Result<ProcessOutcome, ProcessingError>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// EchoProcessor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Development processor: replies with the batch joined into one message.
#[derive(Debug, Default)]
pub struct EchoProcessor;

#[async_trait]
impl Processor for EchoProcessor {
    async fn process(&self, ctx: &ConversationContext) -> Result<ProcessOutcome, ProcessingError> {
        let text = ctx
            .messages
            .iter()
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if text.is_empty() {
            return Ok(ProcessOutcome::NoReply);
        }
        Ok(ProcessOutcome::Reply(ReplyPayload { text }))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HttpProcessor
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Posts the context as JSON to an external service and expects a
/// [`ProcessOutcome`] back.
pub struct HttpProcessor {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

impl HttpProcessor {
    pub fn new(
        endpoint: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProcessingError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
            token,
        })
    }

    /// Build from config; the bearer token is read from `token_env` once.
    pub fn from_config(cfg: &ProcessingConfig) -> Result<Self, ProcessingError> {
        let endpoint = cfg
            .endpoint
            .clone()
            .ok_or_else(|| ProcessingError::Other("processing.endpoint is not set".into()))?;
        let token = cfg
            .token_env
            .as_deref()
            .and_then(|name| std::env::var(name).ok())
            .filter(|t| !t.is_empty());
        Self::new(endpoint, token, cfg.timeout())
    }
}

#[async_trait]
impl Processor for HttpProcessor {
    async fn process(&self, ctx: &ConversationContext) -> Result<ProcessOutcome, ProcessingError> {
        let mut req = self.client.post(&self.endpoint).json(ctx);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProcessingError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp.json::<ProcessOutcome>().await?)
    }
}
