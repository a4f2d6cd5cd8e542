//! Per-conversation flush lock.
//!
//! A try-only mutual exclusion token under `lock:{conversation_id}`.  The
//! holder writes a random owner token with a TTL; a crashed holder's lock
//! simply expires.  There is no waiting: a caller that loses the race gets
//! `None` and is expected to give up.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;
use wb_domain::ConversationId;

use crate::{Cache, CacheError};

pub struct ConversationLock {
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl ConversationLock {
    pub fn new(cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self { cache, ttl }
    }

    /// Try to take the lock without waiting.
    ///
    /// Returns `Ok(None)` when another holder has it.
    pub async fn try_acquire(
        &self,
        conversation: &ConversationId,
    ) -> Result<Option<LockGuard>, CacheError> {
        let key = conversation.lock_key();
        let token = Uuid::new_v4().to_string();

        if !self.cache.add(&key, token.as_bytes(), self.ttl).await? {
            return Ok(None);
        }

        Ok(Some(LockGuard {
            cache: self.cache.clone(),
            key,
            token,
        }))
    }

    /// Whether the lock is currently held by anyone.
    pub async fn is_locked(&self, conversation: &ConversationId) -> Result<bool, CacheError> {
        self.cache.has(&conversation.lock_key()).await
    }
}

/// Proof of holding a conversation lock.
///
/// Release is explicit and async; a guard that is dropped without
/// [`LockGuard::release`] leaves the key to expire on its TTL.
#[must_use = "a lock guard must be released"]
pub struct LockGuard {
    cache: Arc<dyn Cache>,
    key: String,
    token: String,
}

impl LockGuard {
    /// Release the lock if it is still ours.
    ///
    /// When the TTL already ran out and another run took the lock, the key
    /// holds a different token and is left alone.  Check-then-delete is not
    /// atomic; the window is bounded by one cache round-trip.
    pub async fn release(self) -> Result<(), CacheError> {
        match self.cache.get(&self.key).await? {
            Some(current) if current == self.token.as_bytes() => {
                self.cache.delete(&self.key).await
            }
            Some(_) => {
                tracing::warn!(key = %self.key, "lock expired and was re-acquired before release");
                Ok(())
            }
            None => {
                tracing::warn!(key = %self.key, "lock expired before release");
                Ok(())
            }
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryCache;

    fn conv(id: &str) -> ConversationId {
        ConversationId::parse(id).unwrap()
    }

    #[tokio::test]
    async fn second_acquire_fails_until_release() {
        let lock = ConversationLock::new(Arc::new(MemoryCache::new()), Duration::from_secs(30));
        let c = conv("100");

        let guard = lock.try_acquire(&c).await.unwrap().expect("first acquire");
        assert!(lock.try_acquire(&c).await.unwrap().is_none());
        assert!(lock.is_locked(&c).await.unwrap());

        guard.release().await.unwrap();
        assert!(!lock.is_locked(&c).await.unwrap());
        let again = lock.try_acquire(&c).await.unwrap().expect("re-acquire");
        again.release().await.unwrap();
    }

    #[tokio::test]
    async fn different_conversations_do_not_contend() {
        let lock = ConversationLock::new(Arc::new(MemoryCache::new()), Duration::from_secs(30));

        let a = lock.try_acquire(&conv("111")).await.unwrap();
        let b = lock.try_acquire(&conv("222")).await.unwrap();
        assert!(a.is_some());
        assert!(b.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn expired_lock_can_be_taken() {
        let lock = ConversationLock::new(Arc::new(MemoryCache::new()), Duration::from_secs(5));
        let c = conv("100");

        let _stale = lock.try_acquire(&c).await.unwrap().expect("first");
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(lock.try_acquire(&c).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn stale_guard_does_not_release_new_holder() {
        let lock = ConversationLock::new(Arc::new(MemoryCache::new()), Duration::from_secs(5));
        let c = conv("100");

        let stale = lock.try_acquire(&c).await.unwrap().expect("first");
        tokio::time::advance(Duration::from_secs(6)).await;
        let _current = lock.try_acquire(&c).await.unwrap().expect("second");

        stale.release().await.unwrap();
        assert!(lock.is_locked(&c).await.unwrap());
    }
}
