use thiserror::Error;

/// Result alias carrying the crate [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors surfaced by session and storage operations.
///
/// Capacity rejections are not errors: creation operations return `None`
/// and queue a [`Notice`](crate::session::Notice) instead.
#[derive(Debug, Error)]
pub enum Error {
    /// A piece (or its settings record) does not exist.
    #[error("piece '{0}' not found")]
    PieceNotFound(String),

    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("document encoding failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config parse failed: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("config encoding failed: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("wav codec failed: {0}")]
    Wav(#[from] hound::Error),

    /// The background store writer has shut down.
    #[error("store writer is no longer running")]
    WriterClosed,
}
