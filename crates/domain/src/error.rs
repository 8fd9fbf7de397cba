/// Shared error type used across all RunTrail crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("metadata store: {0}")]
    Storage(String),

    #[error("log store: {0}")]
    LogStore(String),

    /// Opaque authentication failure. Deliberately carries no detail that
    /// would distinguish an unknown token from a malformed one.
    #[error("authentication failed")]
    Auth,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("protocol: {0}")]
    Protocol(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Rejected state transition (e.g. finalizing a non-running run).
    #[error("invalid transition: {0}")]
    Transition(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("model: {0}")]
    Model(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, Error>;
