use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// WhatsApp Cloud API
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// WhatsApp Cloud API settings.  Secrets are never stored in the config
/// file; each `*_env` field names the environment variable holding them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    #[serde(default = "d_api_base")]
    pub api_base_url: String,
    #[serde(default = "d_api_version")]
    pub api_version: String,
    /// Business phone number id replies are sent from.
    #[serde(default)]
    pub phone_number_id: String,
    /// Graph API access token.
    #[serde(default = "d_access_token_env")]
    pub access_token_env: String,
    /// Token echoed back during the webhook subscription handshake.
    #[serde(default = "d_verify_token_env")]
    pub verify_token_env: String,
    /// App secret used to verify `X-Hub-Signature-256`.  When the variable
    /// is unset, signatures are not checked.
    #[serde(default = "d_app_secret_env")]
    pub app_secret_env: String,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            api_base_url: d_api_base(),
            api_version: d_api_version(),
            phone_number_id: String::new(),
            access_token_env: d_access_token_env(),
            verify_token_env: d_verify_token_env(),
            app_secret_env: d_app_secret_env(),
        }
    }
}

fn d_api_base() -> String {
    "https://graph.facebook.com".into()
}
fn d_api_version() -> String {
    "v20.0".into()
}
fn d_access_token_env() -> String {
    "WB_WHATSAPP_TOKEN".into()
}
fn d_verify_token_env() -> String {
    "WB_WHATSAPP_VERIFY_TOKEN".into()
}
fn d_app_secret_env() -> String {
    "WB_WHATSAPP_APP_SECRET".into()
}
