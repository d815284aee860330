/// Shared error type used across all relay crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("kv: {0}")]
    Kv(String),

    #[error("store: {0}")]
    Store(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("tool {tool}: {message}")]
    Tool { tool: String, message: String },

    #[error("lock not acquired: {0}")]
    LockNotAcquired(String),

    #[error("config: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether a retry at the call site could plausibly succeed.
    ///
    /// Only infrastructure timeouts and transport-level kv/store failures
    /// qualify; logical errors never do.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Kv(_) | Error::Store(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Error codes surfaced to clients in `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Shutdown,
    AlreadyClaimed,
    InsufficientCredits,
    PipelineError,
    ThreadLimitExceeded,
    ProjectLimitExceeded,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::Shutdown => "SHUTDOWN",
            ErrorCode::AlreadyClaimed => "ALREADY_CLAIMED",
            ErrorCode::InsufficientCredits => "INSUFFICIENT_CREDITS",
            ErrorCode::PipelineError => "PIPELINE_ERROR",
            ErrorCode::ThreadLimitExceeded => "THREAD_LIMIT_EXCEEDED",
            ErrorCode::ProjectLimitExceeded => "PROJECT_LIMIT_EXCEEDED",
        }
    }
}
