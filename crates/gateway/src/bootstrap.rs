//! AppState construction and background-task spawning extracted from `main.rs`.

use std::sync::Arc;

use anyhow::Context;
use sha2::{Digest, Sha256};

use wb_cache::{ArmRegistry, BufferStore, Cache, ConversationLock, MemoryCache, RedisCache};
use wb_domain::config::{CacheBackend, Config, ConfigSeverity, DispatchBackend, ProcessingBackend};

use crate::runtime::{
    DebounceScheduler, EchoProcessor, FlushCoordinator, HistoryStore, HttpProcessor, Ingress,
    LogSender, MemoryHistoryStore, Processor, ReplySender, TokioJobScheduler, WhatsAppCloudSender,
};
use crate::state::AppState;

/// Validate config, initialize every subsystem and return a fully-wired
/// [`AppState`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Cache backend ────────────────────────────────────────────────
    let (cache, memory_cache): (Arc<dyn Cache>, Option<Arc<MemoryCache>>) =
        match config.cache.backend {
            CacheBackend::Memory => {
                let mem = Arc::new(MemoryCache::new());
                tracing::info!("in-memory cache ready (single process only)");
                (mem.clone(), Some(mem))
            }
            CacheBackend::Redis => {
                let url = config
                    .cache
                    .redis_url
                    .as_deref()
                    .context("cache.redis_url is required for the redis backend")?;
                let redis = RedisCache::connect(url)
                    .await
                    .context("connecting to redis")?;
                (Arc::new(redis), None)
            }
        };

    // ── Downstream processing ────────────────────────────────────────
    let processor: Arc<dyn Processor> = match config.processing.backend {
        ProcessingBackend::Echo => {
            tracing::info!("echo processor ready (development)");
            Arc::new(EchoProcessor)
        }
        ProcessingBackend::Http => {
            let p = HttpProcessor::from_config(&config.processing)
                .context("initializing http processor")?;
            tracing::info!(
                endpoint = config.processing.endpoint.as_deref().unwrap_or_default(),
                "http processor ready"
            );
            Arc::new(p)
        }
    };

    // ── Reply dispatch ───────────────────────────────────────────────
    let sender: Arc<dyn ReplySender> = match config.dispatch.backend {
        DispatchBackend::Log => {
            tracing::info!("log dispatch ready (replies are not sent)");
            Arc::new(LogSender)
        }
        DispatchBackend::WhatsApp => {
            let s = WhatsAppCloudSender::from_config(&config.whatsapp, config.dispatch.timeout())
                .context("initializing whatsapp sender")?;
            tracing::info!(url = %s.messages_url(), "whatsapp sender ready");
            Arc::new(s)
        }
    };

    let history: Arc<dyn HistoryStore> =
        Arc::new(MemoryHistoryStore::new(config.processing.history_limit));

    let mut state = wire_state(config.clone(), cache, memory_cache, processor, sender, history);

    // ── Secrets (read once) ──────────────────────────────────────────
    state.api_token_hash = read_env(&config.server.api_token_env)
        .map(|t| Sha256::digest(t.as_bytes()).to_vec());
    if state.api_token_hash.is_none() {
        tracing::warn!(
            env = %config.server.api_token_env,
            "API token not set, operator endpoints are unauthenticated"
        );
    }
    state.verify_token = read_env(&config.whatsapp.verify_token_env);
    if state.verify_token.is_none() {
        tracing::warn!(
            env = %config.whatsapp.verify_token_env,
            "webhook verify token not set, subscription handshake will be refused"
        );
    }
    state.app_secret = read_env(&config.whatsapp.app_secret_env);
    if state.app_secret.is_none() {
        tracing::warn!(
            env = %config.whatsapp.app_secret_env,
            "app secret not set, webhook signatures are not verified"
        );
    }

    tracing::info!(
        debounce_secs = config.buffering.debounce_delay_secs,
        workers = config.buffering.workers,
        "buffering runtime ready"
    );
    Ok(state)
}

/// Wire the runtime from already-built collaborators.  Secrets are left
/// unset.
pub fn wire_state(
    config: Arc<Config>,
    cache: Arc<dyn Cache>,
    memory_cache: Option<Arc<MemoryCache>>,
    processor: Arc<dyn Processor>,
    sender: Arc<dyn ReplySender>,
    history: Arc<dyn HistoryStore>,
) -> AppState {
    let buffering = &config.buffering;

    let buffers = Arc::new(BufferStore::new(cache.clone(), buffering.buffer_ttl()));
    let locks = Arc::new(ConversationLock::new(cache.clone(), buffering.lock_ttl()));
    let arms = Arc::new(ArmRegistry::new(cache.clone(), buffering.buffer_ttl()));

    let coordinator = Arc::new(
        FlushCoordinator::new(
            buffers.clone(),
            locks.clone(),
            arms.clone(),
            processor,
            sender,
            history,
        )
        .with_history_limit(config.processing.history_limit)
        .with_processing_timeout(config.processing.timeout())
        .with_retry_delay(buffering.debounce_delay()),
    );
    let scheduler = Arc::new(TokioJobScheduler::new(
        coordinator.clone(),
        buffering.workers,
    ));
    let debounce = Arc::new(DebounceScheduler::new(
        scheduler.clone(),
        arms.clone(),
        buffering.debounce_delay(),
    ));
    let ingress = Arc::new(Ingress::new(
        cache.clone(),
        buffers.clone(),
        debounce.clone(),
        buffering.dedupe_ttl(),
    ));

    AppState {
        config,
        cache,
        memory_cache,
        buffers,
        locks,
        arms,
        scheduler,
        debounce,
        coordinator,
        ingress,
        api_token_hash: None,
        verify_token: None,
        app_secret: None,
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Spawn the long-running background tokio tasks.
///
/// Call this **after** [`build_app_state`] when running the HTTP server.
pub fn spawn_background_tasks(state: &AppState) {
    // ── Periodic in-memory cache sweep ───────────────────────────────
    if let Some(cache) = state.memory_cache.clone() {
        let every = std::time::Duration::from_secs(state.config.cache.sweep_interval_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                match cache.purge_expired() {
                    0 => {}
                    n => tracing::debug!(removed = n, remaining = cache.len(), "cache sweep"),
                }
            }
        });
    }
    tracing::info!("background tasks spawned");
}
