use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Core error type for aisentiment.
/// Internally, modules can use `anyhow::Result<T>` for convenience,
/// but public boundaries should expose `CoreResult<T>` with this error.
#[derive(Debug, Error)]
pub enum SentimentError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("outbound call timed out after {after_ms}ms")]
    Timeout { after_ms: u64 },

    #[error("transport error{}: {message}", .status.map(|s| format!(" (status {s})")).unwrap_or_default())]
    Transport {
        status: Option<u16>,
        message: String,
    },

    #[error("malformed response envelope: {0}")]
    MalformedEnvelope(String),

    #[error("call cancelled before completion")]
    Cancelled,

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type CoreResult<T> = std::result::Result<T, SentimentError>;

/// Failure classification carried by a failed `Outcome`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    Transport,
    MalformedEnvelope,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Transport => "transport",
            ErrorKind::MalformedEnvelope => "malformed_envelope",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// HTTP status the (external) routing layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorKind::Timeout => 504,
            ErrorKind::Transport | ErrorKind::MalformedEnvelope => 502,
            // nginx's "client closed request"
            ErrorKind::Cancelled => 499,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl SentimentError {
    /// Classify an error raised around the outbound call.
    ///
    /// Anything that is not a timeout, an envelope problem or a cancellation
    /// happened on the way to or from the provider and counts as transport.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SentimentError::Timeout { .. } => ErrorKind::Timeout,
            SentimentError::MalformedEnvelope(_) => ErrorKind::MalformedEnvelope,
            SentimentError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Transport,
        }
    }

    /// Status for the inbound answer. Bad input is the caller's fault (400);
    /// everything else follows [`ErrorKind::http_status`].
    pub fn http_status(&self) -> u16 {
        match self {
            SentimentError::Validation(_) => 400,
            other => other.kind().http_status(),
        }
    }
}
