use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Shared cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Process-local map.  Fine for a single gateway process and tests.
    #[default]
    Memory,
    /// Redis, shared by every gateway process.
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    /// e.g. `redis://127.0.0.1:6379/0`.
    #[serde(default)]
    pub redis_url: Option<String>,
    /// Interval of the expired-entry sweep for the memory backend.
    #[serde(default = "d_sweep")]
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            redis_url: None,
            sweep_interval_secs: d_sweep(),
        }
    }
}

fn d_sweep() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_redis_backend() {
        let cfg: CacheConfig = toml::from_str(
            r#"
            backend = "redis"
            redis_url = "redis://cache:6379/2"
        "#,
        )
        .unwrap();
        assert_eq!(cfg.backend, CacheBackend::Redis);
        assert_eq!(cfg.redis_url.as_deref(), Some("redis://cache:6379/2"));
        assert_eq!(cfg.sweep_interval_secs, 60);
    }
}
