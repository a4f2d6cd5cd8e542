//! WhatsApp Cloud API webhook payloads and their normalization into
//! [`Fragment`]s.
//!
//! Only `entry[].changes[].value.messages[]` produce fragments; delivery
//! status callbacks (`statuses[]`) are counted and otherwise ignored.

use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};

use wb_domain::{ConversationId, Fragment, FragmentKind};

#[derive(Debug, Deserialize)]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub entry: Vec<Entry>,
}

#[derive(Debug, Deserialize)]
pub struct Entry {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub changes: Vec<Change>,
}

#[derive(Debug, Deserialize)]
pub struct Change {
    #[serde(default)]
    pub field: String,
    #[serde(default)]
    pub value: ChangeValue,
}

#[derive(Debug, Default, Deserialize)]
pub struct ChangeValue {
    #[serde(default)]
    pub metadata: Option<PhoneMetadata>,
    #[serde(default)]
    pub contacts: Vec<Contact>,
    #[serde(default)]
    pub messages: Vec<WireMessage>,
    #[serde(default)]
    pub statuses: Vec<Value>,
}

#[derive(Debug, Deserialize)]
pub struct PhoneMetadata {
    #[serde(default)]
    pub phone_number_id: String,
}

#[derive(Debug, Deserialize)]
pub struct Contact {
    #[serde(default)]
    pub wa_id: String,
    #[serde(default)]
    pub profile: Option<Profile>,
}

#[derive(Debug, Deserialize)]
pub struct Profile {
    #[serde(default)]
    pub name: Option<String>,
}

/// One inbound message.  Type-specific bodies (`text`, `image`, ...) stay
/// untyped in `body`.
#[derive(Debug, Deserialize)]
pub struct WireMessage {
    pub from: String,
    pub id: String,
    #[serde(default)]
    pub timestamp: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

/// A message ready for the ingress path.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub conversation_id: ConversationId,
    pub fragment: Fragment,
}

#[derive(Debug, Default)]
pub struct Normalized {
    pub messages: Vec<InboundMessage>,
    pub statuses: usize,
    /// Messages dropped because the sender id was unusable.
    pub rejected: usize,
}

impl WebhookEnvelope {
    /// Flatten every change into fragments, preserving payload order.
    pub fn normalize(self) -> Normalized {
        let mut out = Normalized::default();

        for entry in self.entry {
            for change in entry.changes {
                let value = change.value;
                out.statuses += value.statuses.len();

                let phone_number_id = value.metadata.map(|m| m.phone_number_id);
                for msg in value.messages {
                    let conversation_id = match ConversationId::parse(&msg.from) {
                        Ok(id) => id,
                        Err(e) => {
                            tracing::warn!(
                                from = %msg.from,
                                error = %e,
                                "dropping message with invalid sender"
                            );
                            out.rejected += 1;
                            continue;
                        }
                    };
                    let profile_name = value
                        .contacts
                        .iter()
                        .find(|c| c.wa_id == msg.from)
                        .and_then(|c| c.profile.as_ref())
                        .and_then(|p| p.name.clone());

                    let fragment = to_fragment(msg, profile_name, phone_number_id.as_deref());
                    out.messages.push(InboundMessage {
                        conversation_id,
                        fragment,
                    });
                }
            }
        }
        out
    }
}

fn to_fragment(
    msg: WireMessage,
    profile_name: Option<String>,
    phone_number_id: Option<&str>,
) -> Fragment {
    let kind = FragmentKind::from_wire(&msg.kind);
    let section = msg.body.get(&msg.kind).cloned().unwrap_or(Value::Null);
    let content = content_for(kind, &section);

    let mut metadata = Map::new();
    metadata.insert("wire_type".into(), json!(msg.kind));
    if let Some(name) = profile_name {
        metadata.insert("profile_name".into(), json!(name));
    }
    if let Some(id) = phone_number_id {
        metadata.insert("phone_number_id".into(), json!(id));
    }
    if let Some(media_id) = section.get("id") {
        metadata.insert("media_id".into(), media_id.clone());
    }
    if let Some(mime) = section.get("mime_type") {
        metadata.insert("mime_type".into(), mime.clone());
    }
    if let Some(ctx) = msg.body.get("context") {
        metadata.insert("context".into(), ctx.clone());
    }

    let mut fragment = Fragment::new(kind, content)
        .with_message_id(msg.id)
        .with_metadata(Value::Object(metadata));
    if let Some(at) = msg.timestamp.as_deref().and_then(parse_timestamp) {
        fragment.received_at = at;
    }
    fragment
}

/// Human-readable content for the processor.
fn content_for(kind: FragmentKind, section: &Value) -> String {
    let str_at = |ptr: &str| section.pointer(ptr).and_then(Value::as_str).map(str::to_owned);

    match kind {
        FragmentKind::Text => str_at("/body").unwrap_or_default(),
        FragmentKind::Image | FragmentKind::Video | FragmentKind::Document => {
            match str_at("/caption") {
                Some(caption) => caption,
                None => format!("[{}]", kind.as_str()),
            }
        }
        FragmentKind::Audio | FragmentKind::Sticker => format!("[{}]", kind.as_str()),
        FragmentKind::Location => {
            let lat = section.get("latitude").and_then(Value::as_f64);
            let lng = section.get("longitude").and_then(Value::as_f64);
            let name = str_at("/name").unwrap_or_default();
            match (lat, lng) {
                (Some(lat), Some(lng)) => {
                    format!("[location] {lat},{lng} {name}").trim_end().to_owned()
                }
                _ => "[location]".to_owned(),
            }
        }
        FragmentKind::Interactive => str_at("/button_reply/title")
            .or_else(|| str_at("/list_reply/title"))
            .unwrap_or_else(|| "[interactive]".to_owned()),
        FragmentKind::Button => str_at("/text").unwrap_or_else(|| "[button]".to_owned()),
        FragmentKind::Reaction => str_at("/emoji").unwrap_or_default(),
        FragmentKind::Contacts => "[contacts]".to_owned(),
        FragmentKind::Unknown => "[unsupported]".to_owned(),
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let secs: i64 = raw.parse().ok()?;
    Utc.timestamp_opt(secs, 0).single()
}
