//! Process-local cache backend.
//!
//! Expiry is lazy: an expired entry is treated as absent on access and
//! physically removed by [`MemoryCache::purge_expired`], which the gateway
//! runs periodically.  Timestamps use `tokio::time::Instant` so paused-clock
//! tests observe expiry.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::{Cache, CacheError};

struct Entry {
    value: Vec<u8>,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop every expired entry.  Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }

    /// Number of stored entries, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(e) if e.is_live(now) => Ok(Some(e.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError> {
        self.entries.lock().insert(
            key.to_owned(),
            Entry {
                value: value.to_vec(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().remove(key);
        Ok(())
    }

    async fn has(&self, key: &str) -> Result<bool, CacheError> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .get(key)
            .is_some_and(|e| e.is_live(now)))
    }

    async fn add(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        if entries.get(key).is_some_and(|e| e.is_live(now)) {
            return Ok(false);
        }
        entries.insert(
            key.to_owned(),
            Entry {
                value: value.to_vec(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn set_get_delete() {
        let cache = MemoryCache::new();
        assert_eq!(cache.get("k").await.unwrap(), None);

        cache.set("k", b"v", TTL).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), Some(b"v".to_vec()));
        assert!(cache.has("k").await.unwrap());

        cache.delete("k").await.unwrap();
        assert!(!cache.has("k").await.unwrap());
        // Deleting again is fine.
        cache.delete("k").await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn entries_expire() {
        let cache = MemoryCache::new();
        cache.set("k", b"v", TTL).await.unwrap();

        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(cache.get("k").await.unwrap(), None);
        assert!(!cache.has("k").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn add_only_when_absent_or_expired() {
        let cache = MemoryCache::new();
        assert!(cache.add("lock", b"a", TTL).await.unwrap());
        assert!(!cache.add("lock", b"b", TTL).await.unwrap());
        assert_eq!(cache.get("lock").await.unwrap(), Some(b"a".to_vec()));

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(cache.add("lock", b"c", TTL).await.unwrap());
        assert_eq!(cache.get("lock").await.unwrap(), Some(b"c".to_vec()));
    }

    #[tokio::test(start_paused = true)]
    async fn purge_removes_only_expired() {
        let cache = MemoryCache::new();
        cache.set("short", b"1", Duration::from_secs(1)).await.unwrap();
        cache.set("long", b"2", Duration::from_secs(100)).await.unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.has("long").await.unwrap());
    }
}
