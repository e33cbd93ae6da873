use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use rusqlite::types::{ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, DatabaseName, OptionalExtension, ToSql};
use tokio::sync::Mutex;

use crate::dialect::Dialect;
use crate::error::SessionResult;
use crate::metadata::BlobColumn;
use crate::session::{BlobCursor, BlobSession, SqlParam, SqlValue};

impl ToSql for SqlValue<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Bytes(v) => ToSqlOutput::Borrowed(ValueRef::Blob(v)),
            SqlValue::Int64(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            SqlValue::Int32(v) => ToSqlOutput::Owned(Value::Integer((*v).into())),
            SqlValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
        })
    }
}

fn named<'a>(params: &'a [SqlParam<'_>]) -> Vec<(&'a str, &'a dyn ToSql)> {
    params.iter().map(|p| (p.name, &p.value as &dyn ToSql)).collect()
}

fn database_name(schema: Option<&str>) -> DatabaseName<'_> {
    match schema {
        None | Some("main") => DatabaseName::Main,
        Some("temp") => DatabaseName::Temp,
        Some(attached) => DatabaseName::Attached(attached),
    }
}

/// [`BlobSession`] over one SQLite connection.
///
/// Writes splice the chunk into the stored value with `substr`. Reads go
/// through SQLite's incremental BLOB I/O, so only one chunk of the value is
/// in memory at a time. The table must be a rowid table.
///
/// The data column must hold a non-NULL value (usually `X''`) before an
/// upload starts. A write into a NULL value matches no row, so the upload
/// fails with [`StreamError::RecordNotFound`](crate::StreamError::RecordNotFound).
///
/// SQLite cannot write into a stored value in place. Every chunk rewrites the
/// whole value inside SQLite, so upload cost grows quadratically with the
/// value's size and the full value is loaded by SQLite on each write. Values
/// are also capped by `SQLITE_MAX_LENGTH` (1 000 000 000 bytes by default).
/// Multi-gigabyte uploads are out of reach for this session.
#[derive(Clone)]
pub struct SqliteSession {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSession {
    pub fn open<P: AsRef<Path>>(path: P) -> rusqlite::Result<Self> {
        Ok(Self::from_connection(Connection::open(path)?))
    }

    pub fn open_in_memory() -> rusqlite::Result<Self> {
        Ok(Self::from_connection(Connection::open_in_memory()?))
    }

    pub fn from_connection(conn: Connection) -> Self {
        Self { conn: Arc::new(Mutex::new(conn)) }
    }

    /// Runs `f` with exclusive use of the underlying connection, for the
    /// statements that are not part of a transfer (schema setup, inserts).
    pub async fn with_connection<T, F>(&self, f: F) -> T
    where
        F: FnOnce(&Connection) -> T,
    {
        let conn = self.conn.lock().await;
        f(&conn)
    }
}

#[async_trait]
impl BlobSession for SqliteSession {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn begin(&self) -> SessionResult<()> {
        self.conn.lock().await.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    async fn commit(&self) -> SessionResult<()> {
        self.conn.lock().await.execute_batch("COMMIT")?;
        Ok(())
    }

    async fn rollback(&self) -> SessionResult<()> {
        self.conn.lock().await.execute_batch("ROLLBACK")?;
        Ok(())
    }

    async fn execute(&self, sql: &str, params: &[SqlParam<'_>]) -> SessionResult<u64> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare_cached(sql)?;
        let affected = stmt.execute(named(params).as_slice())?;
        Ok(affected as u64)
    }

    async fn open_cursor<'s>(
        &'s self,
        sql: &str,
        params: &[SqlParam<'_>],
        column: &BlobColumn,
    ) -> SessionResult<Option<Box<dyn BlobCursor + 's>>> {
        let conn = self.conn.lock().await;
        let located = conn
            .prepare_cached(sql)?
            .query_row(named(params).as_slice(), |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, Option<i64>>(1)?))
            })
            .optional()?;

        let Some((rowid, length)) = located else {
            return Ok(None);
        };
        Ok(Some(Box::new(SqliteCursor {
            conn: self.conn.clone(),
            schema: column.schema().map(String::from),
            table: column.table().to_string(),
            column: column.data_column().to_string(),
            rowid,
            length: length.unwrap_or(0).max(0) as u64,
        })))
    }
}

struct SqliteCursor {
    conn: Arc<Mutex<Connection>>,
    schema: Option<String>,
    table: String,
    column: String,
    rowid: i64,
    length: u64,
}

#[async_trait]
impl BlobCursor for SqliteCursor {
    async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> SessionResult<usize> {
        if offset >= self.length || buf.is_empty() {
            return Ok(0);
        }
        let count = buf.len().min((self.length - offset) as usize);

        let conn = self.conn.lock().await;
        let blob = conn.blob_open(
            database_name(self.schema.as_deref()),
            &self.table,
            &self.column,
            self.rowid,
            true,
        )?;
        blob.read_at_exact(&mut buf[..count], offset as usize)?;
        Ok(count)
    }
}
