//! Shared record of the latest debounce arm per conversation.
//!
//! Every arm writes a fresh token under `armed:{conversation_id}`.  Pending
//! flush jobs live in the memory of whichever process armed them, so a job
//! compares its own token with this marker before draining: a mismatch means
//! a later fragment re-armed the conversation somewhere and this job is
//! stale.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;
use wb_domain::ConversationId;

use crate::{Cache, CacheError};

pub struct ArmRegistry {
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl ArmRegistry {
    /// `ttl` should match the buffer TTL: a marker that outlives its buffer
    /// has nothing left to guard.
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    /// Record a new arm and return its token.  Overwrites any earlier one.
    pub async fn record(&self, conversation: &ConversationId) -> Result<String, CacheError> {
        let token = Uuid::new_v4().to_string();
        self.cache
            .set(&conversation.arm_key(), token.as_bytes(), self.ttl)
            .await?;
        Ok(token)
    }

    /// Token of the latest arm, if one is outstanding.
    pub async fn current(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<String>, CacheError> {
        Ok(self
            .cache
            .get(&conversation.arm_key())
            .await?
            .map(|raw| String::from_utf8_lossy(&raw).into_owned()))
    }

    /// Remove the marker if it still holds `token`.
    ///
    /// Check-then-delete is not atomic.  Losing a newer marker in that window
    /// only makes its job run unconditionally.
    pub async fn clear(
        &self,
        conversation: &ConversationId,
        token: &str,
    ) -> Result<(), CacheError> {
        let key = conversation.arm_key();
        match self.cache.get(&key).await? {
            Some(current) if current == token.as_bytes() => self.cache.delete(&key).await,
            _ => Ok(()),
        }
    }
}
