//! The chunked transfer engine.
//!
//! An upload reads the source stream one chunk at a time and issues one
//! positional write per chunk. A download opens a cursor over the stored value
//! and copies it out one positional read at a time. Each chunk is one buffer
//! fill plus one database round trip, strictly in order.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::buffer::{BufferPool, ChunkBuffer};
use crate::config::TransferSettings;
use crate::dialect::{PARAM_CHUNK, PARAM_ID, PARAM_LENGTH, PARAM_OFFSET};
use crate::error::{StreamError, StreamResult};
use crate::metadata::{Accessor, BlobColumn, BlobEntity, TableDescriptor};
use crate::session::{BlobCursor, BlobSession, SqlParam, SqlValue};
use crate::types::{ByteRange, ReadWindow, RowKey, TransferTarget};

/// Where a request points: an already resolved column, or a row description
/// plus accessor that is resolved when the transfer starts.
#[derive(Debug, Clone)]
enum TargetSpec {
    Resolved(BlobColumn),
    Described { table: TableDescriptor, accessor: Accessor },
}

impl TargetSpec {
    fn resolve(self, key: RowKey) -> StreamResult<TransferTarget> {
        let column = match self {
            TargetSpec::Resolved(column) => column,
            TargetSpec::Described { table, accessor } => table.resolve(&accessor)?,
        };
        Ok(TransferTarget { column, key })
    }
}

/// Everything one upload needs. The source stream is required; an upload
/// without one fails with [`StreamError::MissingStream`].
pub struct UploadRequest<R> {
    target: TargetSpec,
    key: RowKey,
    source: Option<R>,
    cancel: CancellationToken,
}

impl<R> UploadRequest<R> {
    /// Upload into the `accessor` member of the `E` row keyed by `key`.
    pub fn new<E: BlobEntity>(accessor: Accessor, key: impl Into<RowKey>) -> Self {
        Self::targeting(TargetSpec::Described { table: E::table(), accessor }, key.into())
    }

    pub fn for_target(target: TransferTarget) -> Self {
        Self::targeting(TargetSpec::Resolved(target.column), target.key)
    }

    fn targeting(target: TargetSpec, key: RowKey) -> Self {
        Self { target, key, source: None, cancel: CancellationToken::new() }
    }

    pub fn source(mut self, source: R) -> Self {
        self.source = Some(source);
        self
    }

    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Everything one download needs. The destination stream is required.
pub struct DownloadRequest<W> {
    target: TargetSpec,
    key: RowKey,
    destination: Option<W>,
    window: ReadWindow,
    cancel: CancellationToken,
}

impl<W> DownloadRequest<W> {
    /// Download the `accessor` member of the `E` row keyed by `key`.
    pub fn new<E: BlobEntity>(accessor: Accessor, key: impl Into<RowKey>) -> Self {
        Self::targeting(TargetSpec::Described { table: E::table(), accessor }, key.into())
    }

    pub fn for_target(target: TransferTarget) -> Self {
        Self::targeting(TargetSpec::Resolved(target.column), target.key)
    }

    fn targeting(target: TargetSpec, key: RowKey) -> Self {
        Self {
            target,
            key,
            destination: None,
            window: ReadWindow::Full,
            cancel: CancellationToken::new(),
        }
    }

    pub fn destination(mut self, destination: W) -> Self {
        self.destination = Some(destination);
        self
    }

    /// Only copy the inclusive range `start..=end`.
    pub fn range(mut self, start: i64, end: i64) -> Self {
        self.window = ReadWindow::Range(ByteRange::new(start, end));
        self
    }

    /// Copy from `start` to the end of the stored value.
    pub fn starting_at(mut self, start: i64) -> Self {
        self.window = ReadWindow::From(start);
        self
    }

    pub fn window(mut self, window: ReadWindow) -> Self {
        self.window = window;
        self
    }

    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Bytes and chunks moved so far by one transfer.
#[derive(Debug, Default, Clone, Copy)]
struct Progress {
    bytes: u64,
    chunks: u64,
}

#[derive(Debug)]
pub struct StreamEngine {
    settings: TransferSettings,
    pool: Arc<BufferPool>,
}

impl StreamEngine {
    pub fn new(settings: TransferSettings) -> StreamResult<Self> {
        Self::with_pool(settings, BufferPool::shared())
    }

    /// Builds an engine drawing its buffers from `pool`, which may be shared
    /// with other engines.
    pub fn with_pool(settings: TransferSettings, pool: Arc<BufferPool>) -> StreamResult<Self> {
        settings.validate()?;
        Ok(Self { settings, pool })
    }

    pub fn settings(&self) -> &TransferSettings {
        &self.settings
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    fn buffer(&self, len: usize) -> ChunkBuffer {
        if self.settings.use_pooled_buffers {
            self.pool.rent(len)
        } else {
            ChunkBuffer::fresh(len)
        }
    }

    /// Streams the request's source into the data column of an existing row
    /// and returns the number of chunks written.
    ///
    /// No transaction is opened here. Run row creation and the upload inside
    /// one transaction on `session`: a failure part way through leaves the
    /// column partially written and only a rollback undoes it.
    pub async fn upload<S, R>(&self, session: &S, request: UploadRequest<R>) -> StreamResult<u64>
    where
        S: BlobSession + ?Sized,
        R: AsyncRead + Unpin,
    {
        let UploadRequest { target, key, source, cancel } = request;
        let mut source = source.ok_or(StreamError::MissingStream("source"))?;
        let target = target.resolve(key)?;

        let sql = session.dialect().write_chunk(&target.column);
        let mut buffer = self.buffer(self.settings.upload_chunk_size);
        let mut progress = Progress::default();

        loop {
            if cancel.is_cancelled() {
                tracing::warn!(
                    "upload to {} key {} cancelled after {} chunks",
                    target.column.table(),
                    target.key,
                    progress.chunks
                );
                return Err(StreamError::Cancelled);
            }

            let read = fill(&mut source, &mut buffer).await?;
            if read == 0 {
                break;
            }

            let params = [
                SqlParam::new(PARAM_CHUNK, SqlValue::Bytes(&buffer[..read])),
                SqlParam::new(PARAM_OFFSET, SqlValue::Int64(progress.bytes as i64)),
                SqlParam::new(PARAM_LENGTH, SqlValue::Int32(read as i32)),
                SqlParam::new(PARAM_ID, SqlValue::from(&target.key)),
            ];
            let affected = session.execute(&sql, &params).await.map_err(StreamError::Database)?;
            if affected == 0 {
                return Err(StreamError::RecordNotFound { key: target.key });
            }

            progress.bytes += read as u64;
            progress.chunks += 1;
            tracing::debug!("{}: bytes read: {}", progress.chunks, read);
        }

        tracing::info!(
            "uploaded {} bytes in {} chunks to {}.{} key {}",
            progress.bytes,
            progress.chunks,
            target.column.table(),
            target.column.data_column(),
            target.key
        );
        Ok(progress.chunks)
    }

    /// Copies the stored value (or the requested part of it) into the
    /// request's destination and returns the number of bytes written.
    ///
    /// Cancellation is checked before every chunk. Whether an observed
    /// cancellation fails the call is governed by
    /// [`TransferSettings::suppress_cancellation_faults`]; chunks already
    /// written to the destination stay written either way.
    pub async fn download<S, W>(&self, session: &S, request: DownloadRequest<W>) -> StreamResult<u64>
    where
        S: BlobSession + ?Sized,
        W: AsyncWrite + Unpin,
    {
        let DownloadRequest { target, key, destination, window, cancel } = request;
        let mut destination = destination.ok_or(StreamError::MissingStream("destination"))?;
        let target = target.resolve(key)?;
        window.validate()?;

        let sql = session.dialect().select_blob(&target.column);
        let params = [SqlParam::new(PARAM_ID, SqlValue::from(&target.key))];
        let mut cursor = session
            .open_cursor(&sql, &params, &target.column)
            .await
            .map_err(StreamError::Database)?
            .ok_or_else(|| StreamError::RecordNotFound { key: target.key.clone() })?;

        let mut buffer = self.buffer(self.settings.download_chunk_size);
        let mut progress = Progress::default();

        let copied = match window {
            ReadWindow::Range(range) => {
                copy_range(cursor.as_mut(), &mut destination, &mut buffer, range, &cancel, &mut progress)
                    .await
            }
            ReadWindow::From(start) => {
                copy_to_end(cursor.as_mut(), &mut destination, &mut buffer, start as u64, &cancel, &mut progress)
                    .await
            }
            ReadWindow::Full => {
                copy_to_end(cursor.as_mut(), &mut destination, &mut buffer, 0, &cancel, &mut progress).await
            }
        };

        match copied {
            Ok(()) => {
                destination.flush().await?;
                tracing::info!(
                    "downloaded {} bytes in {} chunks from {} key {}",
                    progress.bytes,
                    progress.chunks,
                    target.column.table(),
                    target.key
                );
                Ok(progress.bytes)
            }
            Err(StreamError::Cancelled) if self.settings.suppress_cancellation_faults => {
                tracing::info!(
                    "download from {} key {} cancelled after {} bytes",
                    target.column.table(),
                    target.key,
                    progress.bytes
                );
                Ok(progress.bytes)
            }
            Err(err) => Err(err),
        }
    }
}

/// Reads from `source` until `buffer` is full or the stream ends.
async fn fill<R>(source: &mut R, buffer: &mut [u8]) -> StreamResult<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buffer.len() {
        let read = source.read(&mut buffer[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

async fn copy_range<W>(
    cursor: &mut (dyn BlobCursor + '_),
    destination: &mut W,
    buffer: &mut [u8],
    range: ByteRange,
    cancel: &CancellationToken,
    progress: &mut Progress,
) -> StreamResult<()>
where
    W: AsyncWrite + Unpin,
{
    let total = range.byte_count();
    let mut position = range.start as u64;

    while progress.bytes < total {
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }

        let remaining = total - progress.bytes;
        let want = buffer.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let read = cursor.read_at(position, &mut buffer[..want]).await.map_err(StreamError::Database)?;
        if read == 0 {
            break;
        }

        destination.write_all(&buffer[..read]).await?;
        position += read as u64;
        progress.bytes += read as u64;
        progress.chunks += 1;
    }
    Ok(())
}

async fn copy_to_end<W>(
    cursor: &mut (dyn BlobCursor + '_),
    destination: &mut W,
    buffer: &mut [u8],
    start: u64,
    cancel: &CancellationToken,
    progress: &mut Progress,
) -> StreamResult<()>
where
    W: AsyncWrite + Unpin,
{
    let mut position = start;
    loop {
        if cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }

        let read = cursor.read_at(position, buffer).await.map_err(StreamError::Database)?;
        if read == 0 {
            return Ok(());
        }

        destination.write_all(&buffer[..read]).await?;
        position += read as u64;
        progress.bytes += read as u64;
        progress.chunks += 1;
    }
}
