//! Ephemeral shared state for wabuffer.
//!
//! A small TTL key-value [`Cache`] abstraction (in-memory or Redis) and the
//! per-conversation structures built on it: the [`BufferStore`], the
//! [`ConversationLock`] and the [`ArmRegistry`] of debounce markers.  Every
//! gateway process talks to the same cache, so these are the only
//! coordination points between them.

pub mod arm;
pub mod buffer;
pub mod error;
pub mod lock;
pub mod memory;
pub mod redis_backend;

use std::time::Duration;

use async_trait::async_trait;

pub use arm::ArmRegistry;
pub use buffer::BufferStore;
pub use error::{BufferError, CacheError};
pub use lock::{ConversationLock, LockGuard};
pub use memory::MemoryCache;
pub use redis_backend::RedisCache;

/// TTL key-value store shared by all gateway processes.
///
/// Absent and expired keys are indistinguishable: both read as `None`.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<(), CacheError>;

    /// Remove a key.  Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn has(&self, key: &str) -> Result<bool, CacheError>;

    /// Store `value` only if `key` is absent.  Returns whether it was stored.
    async fn add(&self, key: &str, value: &[u8], ttl: Duration) -> Result<bool, CacheError>;
}
