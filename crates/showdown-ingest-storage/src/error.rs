//! Error types for the replay store

use thiserror::Error;

/// Error codes for programmatic handling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// S001: Database could not be opened or created
    S001OpenFailed,
    /// S002: Replay table could not be created
    S002SchemaFailed,
    /// S003: Reading stored replays failed
    S003ReadFailed,
    /// S004: Writing a batch failed
    S004WriteFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S001OpenFailed => "S001",
            Self::S002SchemaFailed => "S002",
            Self::S003ReadFailed => "S003",
            Self::S004WriteFailed => "S004",
        }
    }
}

/// Errors that can occur while reading or writing the replay store
#[derive(Debug, Error)]
pub enum StorageError {
    /// Database could not be opened
    #[error("[{code}] Failed to open replay database '{path}': {reason}\n\nTroubleshooting:\n  • Check the parent directory exists and is writable\n  • Make sure no other process holds an exclusive lock")]
    Open {
        code: &'static str,
        path: String,
        reason: String,
    },

    /// Schema creation failed
    #[error("[{code}] Failed to prepare replay table: {reason}")]
    Schema { code: &'static str, reason: String },

    /// Read failed
    #[error("[{code}] Failed to read replays: {reason}")]
    Read { code: &'static str, reason: String },

    /// Batch write failed; nothing from the batch was committed
    #[error("[{code}] Failed to write batch of {rows} replays: {reason}")]
    Write {
        code: &'static str,
        rows: usize,
        reason: String,
    },

    /// The blocking worker running the statement panicked or was cancelled
    #[error("Storage worker failed: {0}")]
    Worker(String),
}

impl StorageError {
    pub fn open(path: String, reason: String) -> Self {
        Self::Open {
            code: ErrorCode::S001OpenFailed.as_str(),
            path,
            reason,
        }
    }

    pub fn schema(reason: String) -> Self {
        Self::Schema {
            code: ErrorCode::S002SchemaFailed.as_str(),
            reason,
        }
    }

    pub fn read(reason: String) -> Self {
        Self::Read {
            code: ErrorCode::S003ReadFailed.as_str(),
            reason,
        }
    }

    pub fn write_failure(rows: usize, reason: String) -> Self {
        Self::Write {
            code: ErrorCode::S004WriteFailed.as_str(),
            rows,
            reason,
        }
    }

    /// Stable code, `None` for worker failures.
    pub fn code(&self) -> Option<&'static str> {
        match self {
            Self::Open { code, .. }
            | Self::Schema { code, .. }
            | Self::Read { code, .. }
            | Self::Write { code, .. } => Some(code),
            Self::Worker(_) => None,
        }
    }
}

/// Result type alias for StorageError
pub type Result<T> = std::result::Result<T, StorageError>;
