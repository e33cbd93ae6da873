use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use blob_stream::{
    column, BlobEntity, BlobSession, ColumnDescriptor, DownloadRequest, SqliteSession, StreamEngine,
    StreamError, TableDescriptor, TransferSettings, UploadRequest,
};
use tokio::io::{AsyncRead, ReadBuf};

#[allow(dead_code)]
struct Document {
    id: i64,
    body: Vec<u8>,
}

impl BlobEntity for Document {
    fn table() -> TableDescriptor {
        TableDescriptor::new("documents")
            .column(ColumnDescriptor::key("id", "id"))
            .column(ColumnDescriptor::new("body", "body"))
    }
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 256) as u8).collect()
}

async fn open(dir: &tempfile::TempDir) -> SqliteSession {
    let session = SqliteSession::open(dir.path().join("documents.db")).unwrap();
    session
        .with_connection(|conn| {
            conn.execute_batch(
                "CREATE TABLE documents (id INTEGER PRIMARY KEY, body BLOB NOT NULL DEFAULT X'')",
            )
        })
        .await
        .unwrap();
    session
}

async fn insert_empty(session: &SqliteSession) -> i64 {
    session
        .with_connection(|conn| {
            conn.execute("INSERT INTO documents (body) VALUES (X'')", [])?;
            Ok::<_, rusqlite::Error>(conn.last_insert_rowid())
        })
        .await
        .unwrap()
}

async fn row_count(session: &SqliteSession) -> i64 {
    session
        .with_connection(|conn| conn.query_row("SELECT count(*) FROM documents", [], |row| row.get(0)))
        .await
        .unwrap()
}

/// Yields `good` bytes of data, then fails.
struct Broken {
    good: usize,
}

impl AsyncRead for Broken {
    fn poll_read(mut self: Pin<&mut Self>, _cx: &mut Context<'_>, buf: &mut ReadBuf<'_>) -> Poll<io::Result<()>> {
        if self.good == 0 {
            return Poll::Ready(Err(io::Error::new(io::ErrorKind::ConnectionReset, "client went away")));
        }
        let count = self.good.min(buf.remaining());
        buf.put_slice(&vec![b'x'; count]);
        self.good -= count;
        Poll::Ready(Ok(()))
    }
}

#[tokio::test]
async fn test_round_trip_through_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let session = open(&dir).await;
    let settings = TransferSettings::default().with_upload_chunk_size(4096).with_download_chunk_size(1000);
    let engine = StreamEngine::new(settings).unwrap();
    let source = payload(50_000);

    session.begin().await.unwrap();
    let id = insert_empty(&session).await;
    let request = UploadRequest::new::<Document>(column!(Document, body), id).source(source.as_slice());
    let chunks = engine.upload(&session, request).await.unwrap();
    session.commit().await.unwrap();
    assert_eq!(chunks, 13);

    let mut out = Vec::new();
    let request = DownloadRequest::new::<Document>(column!(Document, body), id).destination(&mut out);
    assert_eq!(engine.download(&session, request).await.unwrap(), 50_000);
    assert_eq!(out, source);

    let mut out = Vec::new();
    let request = DownloadRequest::new::<Document>(column!(Document, body), id)
        .range(100, 199)
        .destination(&mut out);
    engine.download(&session, request).await.unwrap();
    assert_eq!(out, &source[100..200]);

    let mut out = Vec::new();
    let request = DownloadRequest::new::<Document>(column!(Document, body), id)
        .starting_at(49_990)
        .destination(&mut out);
    engine.download(&session, request).await.unwrap();
    assert_eq!(out, &source[49_990..]);
}

#[tokio::test]
async fn test_failed_upload_rolls_back_the_row() {
    let dir = tempfile::tempdir().unwrap();
    let session = open(&dir).await;
    let engine = StreamEngine::new(TransferSettings::default().with_upload_chunk_size(100)).unwrap();

    session.begin().await.unwrap();
    let id = insert_empty(&session).await;
    let request =
        UploadRequest::new::<Document>(column!(Document, body), id).source(Broken { good: 250 });
    let err = engine.upload(&session, request).await.unwrap_err();
    assert!(matches!(err, StreamError::Io(_)));
    session.rollback().await.unwrap();

    assert_eq!(row_count(&session).await, 0);
    assert_eq!(engine.pool().stats().outstanding(), 0);
}

#[tokio::test]
async fn test_missing_document_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let session = open(&dir).await;
    let engine = StreamEngine::new(TransferSettings::default()).unwrap();

    let mut out = Vec::new();
    let request = DownloadRequest::new::<Document>(column!(Document, body), 12).destination(&mut out);
    assert!(engine.download(&session, request).await.unwrap_err().is_not_found());

    let request = UploadRequest::new::<Document>(column!(Document, body), 12).source(&b"abc"[..]);
    assert!(engine.upload(&session, request).await.unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_upload_into_null_column_fails() {
    let session = SqliteSession::open_in_memory().unwrap();
    session
        .with_connection(|conn| {
            conn.execute_batch(
                "CREATE TABLE documents (id INTEGER PRIMARY KEY, body BLOB);
                 INSERT INTO documents (id, body) VALUES (1, NULL);",
            )
        })
        .await
        .unwrap();
    let engine = StreamEngine::new(TransferSettings::default().with_upload_chunk_size(4)).unwrap();

    let request = UploadRequest::new::<Document>(column!(Document, body), 1).source(&b"hello world"[..]);
    let err = engine.upload(&session, request).await.unwrap_err();
    assert!(err.is_not_found());

    let body: Option<Vec<u8>> = session
        .with_connection(|conn| conn.query_row("SELECT body FROM documents WHERE id = 1", [], |row| row.get(0)))
        .await
        .unwrap();
    assert_eq!(body, None);
    assert_eq!(engine.pool().stats().outstanding(), 0);
}
