//! Errors raised while talking to the replay service

use std::any::Any;
use std::time::Duration;
use thiserror::Error;

/// Failure of a single search or fetch attempt.
///
/// Every variant except [`SourceError::Panicked`] is treated as transient:
/// the request is retried under the active
/// [`RetryPolicy`](crate::RetryPolicy) and only reported once the attempts
/// are exhausted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("request timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("unexpected HTTP status {status}")]
    Status { status: u16 },

    #[error("malformed response body: {0}")]
    Decode(String),

    #[error("replay {id} is unusable: {reason}")]
    InvalidRecord { id: String, reason: String },

    /// The request task panicked; no further attempts are made.
    #[error("worker panicked: {0}")]
    Panicked(String),
}

impl SourceError {
    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Transport(_) => "transport",
            Self::Status { .. } => "status",
            Self::Decode(_) => "decode",
            Self::InvalidRecord { .. } => "invalid_record",
            Self::Panicked(_) => "panicked",
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "unknown panic payload".to_string()
        };
        Self::Panicked(message)
    }

    pub(crate) fn from_reqwest(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout)
        } else if let Some(status) = err.status() {
            Self::Status {
                status: status.as_u16(),
            }
        } else if err.is_decode() {
            Self::Decode(err.to_string())
        } else {
            Self::Transport(err.to_string())
        }
    }
}
