use std::time::Duration;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Downstream processing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingBackend {
    /// Replies with the coalesced messages.  Development only.
    #[default]
    Echo,
    /// POSTs the conversation context to an external assistant service.
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default)]
    pub backend: ProcessingBackend,
    /// Assistant endpoint for the `http` backend.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Environment variable holding a bearer token for the endpoint.
    #[serde(default)]
    pub token_env: Option<String>,
    /// Upper bound on one processing call.
    #[serde(default = "d_timeout")]
    pub timeout_secs: u64,
    /// Number of prior history entries handed to the processor.
    #[serde(default = "d_history_limit")]
    pub history_limit: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            backend: ProcessingBackend::Echo,
            endpoint: None,
            token_env: None,
            timeout_secs: d_timeout(),
            history_limit: d_history_limit(),
        }
    }
}

impl ProcessingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn d_timeout() -> u64 {
    30
}
fn d_history_limit() -> usize {
    20
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Reply dispatch
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DispatchBackend {
    /// Log replies instead of sending them.
    #[default]
    Log,
    /// WhatsApp Cloud API.
    #[serde(rename = "whatsapp")]
    WhatsApp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default)]
    pub backend: DispatchBackend,
    /// Upper bound on one send request.  Long replies are sent in several
    /// requests.
    #[serde(default = "d_dispatch_timeout")]
    pub timeout_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            backend: DispatchBackend::Log,
            timeout_secs: d_dispatch_timeout(),
        }
    }
}

impl DispatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn d_dispatch_timeout() -> u64 {
    10
}
