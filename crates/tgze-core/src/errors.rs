/// Core error type for the relay.
///
/// Adapter crates map their specific errors into this type so the dispatcher
/// can decide what a failure means: fatal at startup, fatal for the current
/// batch, or reported back to the originating chat.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(String),

    /// The transport answered that the addressed chat does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    #[error("extraction error: {0}")]
    Extraction(String),

    #[error("transfer error: {0}")]
    Transfer(String),

    #[error("ledger persist error: {0}")]
    LedgerPersist(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
