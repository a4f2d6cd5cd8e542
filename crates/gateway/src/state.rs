use std::sync::Arc;

use wb_cache::{ArmRegistry, BufferStore, Cache, ConversationLock, MemoryCache};
use wb_domain::config::Config;

use crate::runtime::{
    DebounceScheduler, FlushCoordinator, Ingress, JobScheduler, TokioJobScheduler,
};

/// Shared application state passed to all API handlers.
///
/// Fields are grouped by concern: core (config and the shared cache),
/// the buffering runtime, and secrets computed at startup.
#[derive(Clone)]
pub struct AppState {
    // ── Core ──────────────────────────────────────────────────────────
    pub config: Arc<Config>,
    pub cache: Arc<dyn Cache>,
    /// Set when the cache backend is in-process, so the sweeper can purge it.
    pub memory_cache: Option<Arc<MemoryCache>>,

    // ── Buffering ─────────────────────────────────────────────────────
    pub buffers: Arc<BufferStore>,
    pub locks: Arc<ConversationLock>,
    pub arms: Arc<ArmRegistry>,
    pub scheduler: Arc<TokioJobScheduler>,
    pub debounce: Arc<DebounceScheduler>,
    pub coordinator: Arc<FlushCoordinator>,
    pub ingress: Arc<Ingress>,

    // ── Security (startup-computed) ───────────────────────────────────
    /// SHA-256 hash of the API bearer token (read once at startup).
    /// `None` = dev mode (no auth enforced).
    pub api_token_hash: Option<Vec<u8>>,
    /// Token expected in the webhook subscription handshake.
    pub verify_token: Option<String>,
    /// App secret for `X-Hub-Signature-256`.  `None` = signatures unchecked.
    pub app_secret: Option<String>,
}

impl AppState {
    /// The scheduler through its trait, as ingress and diagnostics see it.
    pub fn jobs(&self) -> Arc<dyn JobScheduler> {
        self.scheduler.clone()
    }
}
