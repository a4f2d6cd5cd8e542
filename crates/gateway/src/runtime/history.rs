//! Per-conversation message history handed to the processor as context.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use wb_domain::ConversationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    pub at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            at: Utc::now(),
        }
    }
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// The most recent `limit` entries, oldest first.
    async fn recent(
        &self,
        conversation: &ConversationId,
        limit: usize,
    ) -> anyhow::Result<Vec<HistoryEntry>>;

    async fn append(
        &self,
        conversation: &ConversationId,
        entries: Vec<HistoryEntry>,
    ) -> anyhow::Result<()>;
}

/// In-memory history, bounded per conversation.
pub struct MemoryHistoryStore {
    inner: RwLock<HashMap<ConversationId, VecDeque<HistoryEntry>>>,
    capacity: usize,
}

impl MemoryHistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn conversations(&self) -> usize {
        self.inner.read().len()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn recent(
        &self,
        conversation: &ConversationId,
        limit: usize,
    ) -> anyhow::Result<Vec<HistoryEntry>> {
        let inner = self.inner.read();
        let Some(entries) = inner.get(conversation) else {
            return Ok(Vec::new());
        };
        let skip = entries.len().saturating_sub(limit);
        Ok(entries.iter().skip(skip).cloned().collect())
    }

    async fn append(
        &self,
        conversation: &ConversationId,
        entries: Vec<HistoryEntry>,
    ) -> anyhow::Result<()> {
        let mut inner = self.inner.write();
        let log = inner.entry(conversation.clone()).or_default();
        for entry in entries {
            if log.len() == self.capacity {
                log.pop_front();
            }
            log.push_back(entry);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keeps_only_the_newest_entries() {
        let store = MemoryHistoryStore::new(3);
        let c = ConversationId::parse("100").unwrap();

        let entries = (0..5).map(|i| HistoryEntry::user(format!("m{i}"))).collect();
        store.append(&c, entries).await.unwrap();

        let recent = store.recent(&c, 10).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, ["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn recent_respects_limit_and_order() {
        let store = MemoryHistoryStore::new(10);
        let c = ConversationId::parse("100").unwrap();
        store
            .append(
                &c,
                vec![
                    HistoryEntry::user("hi"),
                    HistoryEntry::assistant("hello"),
                    HistoryEntry::user("order status?"),
                ],
            )
            .await
            .unwrap();

        let recent = store.recent(&c, 2).await.unwrap();
        assert_eq!(recent[0].role, Role::Assistant);
        assert_eq!(recent[1].content, "order status?");
    }

    #[tokio::test]
    async fn unknown_conversation_has_no_history() {
        let store = MemoryHistoryStore::new(10);
        let c = ConversationId::parse("404").unwrap();
        assert!(store.recent(&c, 5).await.unwrap().is_empty());
        assert_eq!(store.conversations(), 0);
    }
}
