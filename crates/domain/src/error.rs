/// Shared error type used across all wabuffer crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid conversation id {id:?}: {reason}")]
    InvalidConversationId { id: String, reason: &'static str },

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
