//! Per-conversation fragment buffer.
//!
//! Fragments accumulate under `buffer:{conversation_id}` as a JSON array in
//! arrival order.  Every append rewrites the list and refreshes its TTL, so a
//! buffer only expires after a full TTL of silence.

use std::sync::Arc;
use std::time::Duration;

use wb_domain::{ConversationId, Fragment};

use crate::{BufferError, Cache};

pub struct BufferStore {
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl BufferStore {
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    /// Append a fragment and return the new buffer length.
    pub async fn append(
        &self,
        conversation: &ConversationId,
        fragment: Fragment,
    ) -> Result<usize, BufferError> {
        let key = conversation.buffer_key();
        let mut fragments = self.load(&key).await?;
        fragments.push(fragment);

        let encoded = serde_json::to_vec(&fragments).map_err(BufferError::Encode)?;
        self.cache.set(&key, &encoded, self.ttl).await?;

        tracing::debug!(
            conversation_id = %conversation,
            buffered = fragments.len(),
            "fragment appended"
        );
        Ok(fragments.len())
    }

    /// Return everything buffered for the conversation and clear it.
    ///
    /// This is a read followed by a delete, not an atomic pop.  A fragment
    /// appended between the two is lost.  Callers hold the conversation lock
    /// so only one drain runs at a time; the window left is an append racing
    /// the lock holder's drain, which is a known tolerance.
    pub async fn drain(&self, conversation: &ConversationId) -> Result<Vec<Fragment>, BufferError> {
        let key = conversation.buffer_key();
        let fragments = self.load(&key).await?;
        self.cache.delete(&key).await?;
        Ok(fragments)
    }

    /// Number of buffered fragments, without consuming them.
    pub async fn peek_length(&self, conversation: &ConversationId) -> Result<usize, BufferError> {
        Ok(self.load(&conversation.buffer_key()).await?.len())
    }

    async fn load(&self, key: &str) -> Result<Vec<Fragment>, BufferError> {
        match self.cache.get(key).await? {
            None => Ok(Vec::new()),
            Some(raw) => serde_json::from_slice(&raw).map_err(|source| BufferError::Corrupt {
                key: key.to_owned(),
                source,
            }),
        }
    }
}
