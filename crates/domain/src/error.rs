/// Shared error type used across all mfasrv crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store: {0}")]
    Store(String),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A challenge or session is in a terminal state that rejects the
    /// requested transition. The message is a stable reason string.
    #[error("{0}")]
    Terminal(String),

    /// MAC or AEAD verification failed. Deliberately carries no detail so
    /// callers cannot distinguish which check rejected the input.
    #[error("verification failed")]
    Integrity,

    #[error("method {method}: {message}")]
    Method { method: String, message: String },

    #[error("attempts exhausted")]
    AttemptsExhausted,

    #[error("certificate: {0}")]
    Certificate(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the error is transient infrastructure trouble (store or peer
    /// unavailable) that a caller may retry or fold into a degraded-mode
    /// decision, as opposed to a definitive client error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Io(_) | Error::Store(_) | Error::Http(_) | Error::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
