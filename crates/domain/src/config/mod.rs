mod buffering;
mod cache;
mod observability;
mod processing;
mod server;
mod whatsapp;

pub use buffering::*;
pub use cache::*;
pub use observability::*;
pub use processing::*;
pub use server::*;
pub use whatsapp::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process configuration.  Loaded once at startup and shared read-only
/// (`Arc<Config>`); each subsystem receives the section it needs when it is
/// constructed.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub buffering: BufferingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }

        // ── Buffering ────────────────────────────────────────────────
        let b = &self.buffering;
        if b.debounce_delay_secs == 0 {
            errors.push(ConfigError::error(
                "buffering.debounce_delay_secs",
                "debounce delay must be greater than 0",
            ));
        }
        if b.buffer_ttl_secs <= b.debounce_delay_secs {
            errors.push(ConfigError::error(
                "buffering.buffer_ttl_secs",
                format!(
                    "buffer TTL ({}s) must exceed the debounce delay ({}s) or buffers expire before they flush",
                    b.buffer_ttl_secs, b.debounce_delay_secs
                ),
            ));
        }
        if b.lock_ttl_secs == 0 {
            errors.push(ConfigError::error(
                "buffering.lock_ttl_secs",
                "lock TTL must be greater than 0",
            ));
        } else {
            let flush_budget = self.processing.timeout_secs + self.dispatch.timeout_secs;
            if b.lock_ttl_secs <= flush_budget {
                errors.push(ConfigError::warning(
                    "buffering.lock_ttl_secs",
                    format!(
                        "lock TTL ({}s) does not exceed processing.timeout_secs + dispatch.timeout_secs ({}s); a slow run may lose its lock mid-flush",
                        b.lock_ttl_secs, flush_budget
                    ),
                ));
            }
        }
        if b.workers == 0 {
            errors.push(ConfigError::error(
                "buffering.workers",
                "at least one flush worker is required",
            ));
        }

        // ── Cache ────────────────────────────────────────────────────
        if self.cache.backend == CacheBackend::Redis
            && self.cache.redis_url.as_deref().map_or(true, str::is_empty)
        {
            errors.push(ConfigError::error(
                "cache.redis_url",
                "redis backend selected but no redis_url configured",
            ));
        }
        if self.cache.backend == CacheBackend::Memory {
            errors.push(ConfigError::warning(
                "cache.backend",
                "in-memory cache is process-local; run a single gateway process or use redis",
            ));
        }

        // ── Collaborators ────────────────────────────────────────────
        if self.processing.backend == ProcessingBackend::Http
            && self.processing.endpoint.as_deref().map_or(true, str::is_empty)
        {
            errors.push(ConfigError::error(
                "processing.endpoint",
                "http processing backend requires an endpoint",
            ));
        }
        if self.dispatch.backend == DispatchBackend::WhatsApp
            && self.whatsapp.phone_number_id.is_empty()
        {
            errors.push(ConfigError::error(
                "whatsapp.phone_number_id",
                "whatsapp dispatch requires a phone_number_id",
            ));
        }

        errors
    }
}
