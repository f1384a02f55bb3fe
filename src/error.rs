use thiserror::Error;

/// Main error type for the match watcher
#[derive(Error, Debug)]
pub enum GoalwatchError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {}", .0.join("; "))]
    InvalidConfig(Vec<String>),

    // Network errors
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Live feed error: {0}")]
    Fetch(#[from] FetchError),

    // Serialization errors
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    // State errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    // Validation errors
    #[error("Validation failed: {0}")]
    Validation(String),

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Shutdown in progress, cycle not committed")]
    ShuttingDown,

    // Generic errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias for GoalwatchError
pub type Result<T> = std::result::Result<T, GoalwatchError>;

/// Failures talking to the live-event provider. All of them are transient from
/// the driver's point of view: the cycle is skipped and state is left alone.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode provider response: {0}")]
    Decode(String),

    #[error("provider rejected request: {0}")]
    Rejected(String),

    #[error("provider not configured: {0}")]
    NotConfigured(String),
}

impl FetchError {
    /// Whether another attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Transport(_) => true,
            FetchError::Status { status, .. } => *status == 429 || *status >= 500,
            FetchError::Decode(_) | FetchError::Rejected(_) | FetchError::NotConfigured(_) => {
                false
            }
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout { elapsed_ms: 0 }
        } else if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else {
            FetchError::Transport(err.to_string())
        }
    }
}

/// A single raw provider record that could not be turned into a snapshot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("missing field: {0}")]
    MissingField(&'static str),

    #[error("invalid score {home:?}-{away:?}")]
    InvalidScore { home: Option<i64>, away: Option<i64> },
}

/// A snapshot rejected by the reconciliation engine. Only that snapshot is
/// skipped; the rest of the cycle carries on.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot has empty {0}")]
    EmptyIdentity(&'static str),

    #[error("reliability {0} outside 0..=5")]
    ReliabilityOutOfRange(u8),
}

/// Durable state could not be written.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("invalid state layout: {0}")]
    InvalidLayout(String),
}

impl StorageError {
    pub(crate) fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.display().to_string(),
            source,
        }
    }
}

/// Outbound message could not be delivered.
#[derive(Error, Debug)]
pub enum NotifyError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("channel rejected message (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        NotifyError::Transport(err.to_string())
    }
}
