//! Chunked streaming of large binary objects into and out of one column of a
//! relational table.
//!
//! The database is only asked for three things: run a parameterized
//! positional write, open a cursor over a stored value, and read from that
//! cursor at an offset. [`StreamEngine`] turns a byte stream into a sequence
//! of such writes, and a stored value back into a byte stream, never holding
//! more than one chunk in memory.
//!
//! ```no_run
//! use blob_stream::{column, BlobEntity, ColumnDescriptor, TableDescriptor};
//! use blob_stream::{DownloadRequest, SqliteSession, StreamEngine, TransferSettings, UploadRequest};
//!
//! struct File { id: i64, data: Vec<u8> }
//!
//! impl BlobEntity for File {
//!     fn table() -> TableDescriptor {
//!         TableDescriptor::new("files")
//!             .column(ColumnDescriptor::key("id", "id"))
//!             .column(ColumnDescriptor::new("data", "data"))
//!     }
//! }
//!
//! # async fn run(session: SqliteSession, payload: &[u8]) -> Result<(), blob_stream::StreamError> {
//! let engine = StreamEngine::new(TransferSettings::default())?;
//!
//! let request = UploadRequest::new::<File>(column!(File, data), 1).source(payload);
//! let chunks = engine.upload(&session, request).await?;
//!
//! let mut out = Vec::new();
//! let request = DownloadRequest::new::<File>(column!(File, data), 1)
//!     .range(0, 99)
//!     .destination(&mut out);
//! engine.download(&session, request).await?;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod config;
pub mod dialect;
pub mod engine;
pub mod error;
pub mod memory;
pub mod metadata;
pub mod session;
pub mod sqlite;
pub mod types;

pub use buffer::{BufferPool, ChunkBuffer, PoolStats};
pub use config::TransferSettings;
pub use dialect::Dialect;
pub use engine::{DownloadRequest, StreamEngine, UploadRequest};
pub use error::{BoxError, SessionResult, StreamError, StreamResult};
pub use memory::MemorySession;
pub use metadata::{Accessor, BlobColumn, BlobEntity, ColumnDescriptor, TableDescriptor};
pub use session::{BlobCursor, BlobSession, SqlParam, SqlValue};
pub use sqlite::SqliteSession;
pub use types::{ByteRange, ReadWindow, RowKey, TransferTarget};

pub use tokio_util::sync::CancellationToken;
