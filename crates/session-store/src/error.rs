//! Error types for credential persistence

/// Errors from a key-value backend.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("store parse error: {0}")]
    Parse(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, Error>;
