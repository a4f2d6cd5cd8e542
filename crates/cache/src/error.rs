/// Failure talking to the cache backend.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("redis: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Errors from the buffer store.
#[derive(thiserror::Error, Debug)]
pub enum BufferError {
    #[error(transparent)]
    Cache(#[from] CacheError),

    /// The stored buffer could not be decoded as a fragment list.
    #[error("corrupt buffer under {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("encoding buffer: {0}")]
    Encode(#[source] serde_json::Error),
}
