//! Conversation identity and the buffered fragment record.
//!
//! Every piece of per-conversation state (buffer, lock, scheduled flush job)
//! derives its key from the same [`ConversationId`], so the three stay
//! consistent with each other.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ConversationId
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Stable external key of a conversation (the WhatsApp `wa_id`, i.e. the
/// sender's phone number without the leading `+`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConversationId(String);

impl ConversationId {
    /// Normalize and validate a raw identifier.
    ///
    /// Surrounding whitespace and a single leading `+` are stripped.  Empty
    /// ids and ids containing whitespace or `:` are rejected, since the id is
    /// embedded verbatim in cache keys and job names.
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let id = trimmed.strip_prefix('+').unwrap_or(trimmed);

        if id.is_empty() {
            return Err(Error::InvalidConversationId {
                id: raw.to_owned(),
                reason: "must not be empty",
            });
        }
        if id.chars().any(|c| c.is_whitespace() || c == ':') {
            return Err(Error::InvalidConversationId {
                id: raw.to_owned(),
                reason: "must not contain whitespace or ':'",
            });
        }
        Ok(Self(id.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Cache key of the conversation buffer.
    pub fn buffer_key(&self) -> String {
        format!("buffer:{}", self.0)
    }

    /// Cache key of the conversation lock.
    pub fn lock_key(&self) -> String {
        format!("lock:{}", self.0)
    }

    /// Cache key of the latest arm marker.
    pub fn arm_key(&self) -> String {
        format!("armed:{}", self.0)
    }

    /// Deterministic name of the pending flush job.
    pub fn flush_job_name(&self) -> String {
        format!("flush_{}", self.0)
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ConversationId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ConversationId> for String {
    fn from(id: ConversationId) -> Self {
        id.0
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Fragment
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Classification of an inbound event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    #[default]
    Text,
    Image,
    Audio,
    Video,
    Document,
    Sticker,
    Location,
    Contacts,
    Interactive,
    Button,
    Reaction,
    Unknown,
}

impl FragmentKind {
    /// Map a WhatsApp Cloud API message `type` to a kind.
    pub fn from_wire(kind: &str) -> Self {
        match kind {
            "text" => Self::Text,
            "image" => Self::Image,
            "audio" | "voice" => Self::Audio,
            "video" => Self::Video,
            "document" => Self::Document,
            "sticker" => Self::Sticker,
            "location" => Self::Location,
            "contacts" => Self::Contacts,
            "interactive" => Self::Interactive,
            "button" => Self::Button,
            "reaction" => Self::Reaction,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Image => "image",
            Self::Audio => "audio",
            Self::Video => "video",
            Self::Document => "document",
            Self::Sticker => "sticker",
            Self::Location => "location",
            Self::Contacts => "contacts",
            Self::Interactive => "interactive",
            Self::Button => "button",
            Self::Reaction => "reaction",
            Self::Unknown => "unknown",
        }
    }
}

/// One immutable inbound event, buffered until the next flush drains it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    /// Provider message id, when the channel supplies one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(default)]
    pub kind: FragmentKind,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub received_at: DateTime<Utc>,
}

impl Fragment {
    pub fn new(kind: FragmentKind, content: impl Into<String>) -> Self {
        Self {
            message_id: None,
            kind,
            content: content.into(),
            metadata: serde_json::Value::Null,
            received_at: Utc::now(),
        }
    }

    /// Shorthand for a plain text fragment.
    pub fn text(content: impl Into<String>) -> Self {
        Self::new(FragmentKind::Text, content)
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Scheduled job arguments
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Arguments carried by a scheduled flush job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlushJobArgs {
    pub conversation_id: ConversationId,
    /// Marker written when the job was armed.  A job whose token no longer
    /// matches the shared marker was superseded by a later arm, possibly in
    /// another process.  `None` runs unconditionally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arm_token: Option<String>,
}

impl FlushJobArgs {
    pub fn new(conversation_id: ConversationId) -> Self {
        Self {
            conversation_id,
            arm_token: None,
        }
    }

    pub fn with_arm_token(mut self, token: impl Into<String>) -> Self {
        self.arm_token = Some(token.into());
        self
    }
}
