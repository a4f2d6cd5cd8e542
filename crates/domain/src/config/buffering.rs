use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Buffering / debounce
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Timing knobs of the buffer-and-flush pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferingConfig {
    /// Quiet period after the last fragment before the flush fires.
    #[serde(default = "d_debounce")]
    pub debounce_delay_secs: u64,
    /// Expiry of a conversation buffer, refreshed on every append.  Only a
    /// backstop for flushes that never fire.
    #[serde(default = "d_buffer_ttl")]
    pub buffer_ttl_secs: u64,
    /// Expiry of the per-conversation flush lock.  Must exceed the worst
    /// case processing time of one flush.
    #[serde(default = "d_lock_ttl")]
    pub lock_ttl_secs: u64,
    /// How long a provider message id is remembered for de-duplication of
    /// redelivered webhooks.
    #[serde(default = "d_dedupe_ttl")]
    pub dedupe_ttl_secs: u64,
    /// Maximum number of flush jobs executing concurrently.
    #[serde(default = "d_workers")]
    pub workers: usize,
}

impl Default for BufferingConfig {
    fn default() -> Self {
        Self {
            debounce_delay_secs: d_debounce(),
            buffer_ttl_secs: d_buffer_ttl(),
            lock_ttl_secs: d_lock_ttl(),
            dedupe_ttl_secs: d_dedupe_ttl(),
            workers: d_workers(),
        }
    }
}

impl BufferingConfig {
    pub fn debounce_delay(&self) -> Duration {
        Duration::from_secs(self.debounce_delay_secs)
    }

    pub fn buffer_ttl(&self) -> Duration {
        Duration::from_secs(self.buffer_ttl_secs)
    }

    pub fn lock_ttl(&self) -> Duration {
        Duration::from_secs(self.lock_ttl_secs)
    }

    pub fn dedupe_ttl(&self) -> Duration {
        Duration::from_secs(self.dedupe_ttl_secs)
    }
}

fn d_debounce() -> u64 {
    5
}
fn d_buffer_ttl() -> u64 {
    300
}
fn d_lock_ttl() -> u64 {
    60
}
fn d_dedupe_ttl() -> u64 {
    86_400
}
fn d_workers() -> usize {
    4
}
