//! Top-level error types for Threadbot.

/// Crate-wide result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error enum wrapping domain-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error(transparent)]
    Matrix(#[from] MatrixError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required config key: {0}")]
    MissingKey(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Command parse failures. These produce a help reply, not a crash.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandError {
    #[error("not a command: {0}")]
    NotACommand(String),

    #[error("prompt is empty")]
    EmptyPrompt,

    #[error("unknown command: {0}")]
    UnknownCommand(String),
}

/// Thread store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to open thread store: {0}")]
    Open(#[from] redb::DatabaseError),

    #[error("store transaction failed: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("store operation failed: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("store table access failed: {0}")]
    Table(#[from] redb::TableError),

    #[error("store commit failed: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("failed to encode thread: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode thread: {0}")]
    Decode(#[source] serde_json::Error),
}

/// Completion provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    /// The provider rejected the request as invalid. The message is shown
    /// to the user verbatim.
    #[error("{0}")]
    InvalidRequest(String),

    #[error("provider request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("provider returned an unexpected response: {0}")]
    Api(String),

    #[error("image download failed: {0}")]
    Download(String),
}

/// Matrix adapter errors.
#[derive(Debug, thiserror::Error)]
pub enum MatrixError {
    #[error("matrix client error: {0}")]
    Client(#[from] matrix_sdk::Error),

    #[error("matrix http error: {0}")]
    Http(#[from] matrix_sdk::HttpError),

    #[error("could not resolve thread root: {0}")]
    RootResolutionFailed(String),

    #[error("media fetch failed: {0}")]
    Media(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
