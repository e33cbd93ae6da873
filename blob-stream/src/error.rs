use std::io;

use thiserror::Error;

use crate::types::RowKey;

/// Error type handed back by session adapters. Kept boxed so that any driver
/// error can cross the session seam without translation.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Result of a call into a [`BlobSession`](crate::session::BlobSession) or its cursor.
pub type SessionResult<T> = Result<T, BoxError>;

pub type StreamResult<T> = Result<T, StreamError>;

#[derive(Debug, Error)]
pub enum StreamError {
    /// A required source or destination stream was not supplied.
    #[error("{0} stream is required")]
    MissingStream(&'static str),

    #[error("invalid column accessor `{accessor}`: {reason}")]
    InvalidAccessor { accessor: String, reason: String },

    #[error("type {table} has no primary key defined")]
    NoKeyDefined { table: String },

    #[error("type {table} has {count} primary keys defined, but only one is supported")]
    AmbiguousKey { table: String, count: usize },

    #[error("identifier {0:?} cannot be used in a statement")]
    InvalidIdentifier(String),

    #[error("record with key {key} not found")]
    RecordNotFound { key: RowKey },

    #[error("invalid range: {start} - {end}")]
    InvalidRange { start: i64, end: i64 },

    #[error("transfer was cancelled")]
    Cancelled,

    #[error("invalid transfer settings: {0}")]
    InvalidSettings(String),

    #[error("stream I/O failed")]
    Io(#[from] io::Error),

    #[error("database operation failed: {0}")]
    Database(#[source] BoxError),
}

impl StreamError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StreamError::RecordNotFound { .. })
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, StreamError::Cancelled)
    }
}
