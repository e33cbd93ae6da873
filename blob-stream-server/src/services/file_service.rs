use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::time::Duration;

use blob_stream::{
    column, BlobEntity, BlobSession, CancellationToken, ColumnDescriptor, DownloadRequest, ReadWindow,
    SqliteSession, StreamEngine, StreamError, TableDescriptor, UploadRequest,
};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::errors::ServerErr;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS files (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    data BLOB NOT NULL DEFAULT X'',
    sha256 TEXT,
    size INTEGER
);";

/// Row layout of the files table, as far as transfers are concerned.
#[allow(dead_code)]
struct StoredFile {
    id: i64,
    data: Vec<u8>,
}

impl BlobEntity for StoredFile {
    fn table() -> TableDescriptor {
        TableDescriptor::new("files")
            .column(ColumnDescriptor::key("id", "id"))
            .column(ColumnDescriptor::new("data", "data"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    pub id: i64,
    pub name: String,
    pub size: u64,
    pub sha256: String,
}

#[derive(Debug, Clone)]
pub struct UploadOutcome {
    pub info: FileInfo,
    pub chunks: u64,
}

/// Passes reads through while hashing and counting every byte.
struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    bytes: u64,
}

impl<R> HashingReader<R> {
    fn new(inner: R) -> Self {
        Self { inner, hasher: Sha256::new(), bytes: 0 }
    }

    fn finish(self) -> (u64, String) {
        let digest = self.hasher.finalize();
        (self.bytes, digest.iter().map(|byte| format!("{:02x}", byte)).collect())
    }
}

impl<R: AsyncRead + Unpin> AsyncRead for HashingReader<R> {
    fn poll_read(mut self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        ready!(Pin::new(&mut self.inner).poll_read(cx, buf))?;
        let read = &buf.filled()[before..];
        self.hasher.update(read);
        self.bytes += read.len() as u64;
        Poll::Ready(Ok(()))
    }
}

/// Files stored as BLOBs in one SQLite database. Every upload and download
/// runs on its own connection.
pub struct FileService {
    database: PathBuf,
    engine: StreamEngine,
}

impl FileService {
    pub fn open(database: impl Into<PathBuf>, engine: StreamEngine) -> Result<Self, ServerErr> {
        let service = Self { database: database.into(), engine };
        service.connect()?.execute_batch(SCHEMA)?;
        Ok(service)
    }

    pub fn engine(&self) -> &StreamEngine {
        &self.engine
    }

    fn connect(&self) -> Result<Connection, ServerErr> {
        let conn = Connection::open(&self.database)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(conn)
    }

    fn session(&self) -> Result<SqliteSession, ServerErr> {
        Ok(SqliteSession::from_connection(self.connect()?))
    }

    /// Stores `source` as a new file. The row insert, the chunked upload and
    /// the final hash update form one transaction; nothing is left behind
    /// when any step fails.
    pub async fn upload<R>(&self, name: &str, source: R) -> Result<UploadOutcome, ServerErr>
    where
        R: AsyncRead + Unpin,
    {
        let session = self.session()?;
        session.begin().await.map_err(StreamError::Database)?;

        match self.upload_in_transaction(&session, name, source).await {
            Ok(outcome) => {
                session.commit().await.map_err(StreamError::Database)?;
                tracing::info!(
                    "stored {} as file {} ({} bytes, {} chunks)",
                    outcome.info.name,
                    outcome.info.id,
                    outcome.info.size,
                    outcome.chunks
                );
                Ok(outcome)
            }
            Err(err) => {
                if let Err(rollback) = session.rollback().await {
                    tracing::error!("rollback after failed upload of {} failed: {}", name, rollback);
                }
                Err(err)
            }
        }
    }

    async fn upload_in_transaction<R>(
        &self,
        session: &SqliteSession,
        name: &str,
        source: R,
    ) -> Result<UploadOutcome, ServerErr>
    where
        R: AsyncRead + Unpin,
    {
        let id = session
            .with_connection(|conn| {
                conn.execute("INSERT INTO files (name) VALUES (?1)", [name])?;
                Ok::<_, rusqlite::Error>(conn.last_insert_rowid())
            })
            .await?;

        let mut source = HashingReader::new(source);
        let request = UploadRequest::new::<StoredFile>(column!(StoredFile, data), id).source(&mut source);
        let chunks = self.engine.upload(session, request).await?;

        let (size, sha256) = source.finish();
        if size == 0 {
            return Err(ServerErr::EmptyFile);
        }
        session
            .with_connection(|conn| {
                conn.execute(
                    "UPDATE files SET size = ?1, sha256 = ?2 WHERE id = ?3",
                    params![size as i64, sha256, id],
                )
            })
            .await?;

        Ok(UploadOutcome { info: FileInfo { id, name: name.to_string(), size, sha256 }, chunks })
    }

    pub fn info(&self, id: i64) -> Result<FileInfo, ServerErr> {
        self.connect()?
            .query_row("SELECT id, name, size, sha256 FROM files WHERE id = ?1", [id], |row| {
                Ok(FileInfo {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    size: row.get::<_, Option<i64>>(2)?.unwrap_or(0).max(0) as u64,
                    sha256: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
                })
            })
            .optional()?
            .ok_or(ServerErr::FileNotFound(id))
    }

    /// Streams the stored file (or `window` of it) into `destination`.
    pub async fn download<W>(
        &self,
        id: i64,
        window: ReadWindow,
        destination: W,
        cancel: CancellationToken,
    ) -> Result<u64, ServerErr>
    where
        W: AsyncWrite + Unpin,
    {
        let session = self.session()?;
        let request = DownloadRequest::new::<StoredFile>(column!(StoredFile, data), id)
            .window(window)
            .destination(destination)
            .cancel_token(cancel);
        Ok(self.engine.download(&session, request).await?)
    }
}
