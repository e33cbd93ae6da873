use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use crate::dialect::{Dialect, PARAM_CHUNK, PARAM_ID, PARAM_LENGTH, PARAM_OFFSET};
use crate::error::SessionResult;
use crate::metadata::BlobColumn;
use crate::session::{BlobCursor, BlobSession, SqlParam, SqlValue};
use crate::types::RowKey;

type Rows = BTreeMap<RowKey, Option<Arc<Vec<u8>>>>;
type Tables = HashMap<BlobColumn, Rows>;

/// A statement seen by [`MemorySession::execute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedStatement {
    pub sql: String,
    pub key: Option<RowKey>,
    pub offset: Option<i64>,
    pub length: Option<i32>,
    /// Length of the bound chunk parameter.
    pub chunk_len: Option<usize>,
}

#[derive(Debug, Default)]
struct State {
    tables: Tables,
    snapshot: Option<Tables>,
}

/// In-process implementation of [`BlobSession`] with SQL Server `.WRITE`
/// semantics.
///
/// Statements are matched against what the session's [`Dialect`] renders for
/// the registered tables, so anything the engine sends that a real database
/// would not understand is rejected. Supports transactions (rollback restores
/// the state at `begin`), fault injection and a log of executed statements.
#[derive(Debug)]
pub struct MemorySession {
    dialect: Dialect,
    state: Mutex<State>,
    log: Mutex<Vec<ExecutedStatement>>,
    fail_write_at: Mutex<Option<u64>>,
    fail_read_at: Mutex<Option<u64>>,
    writes: AtomicU64,
    reads: AtomicU64,
    cursors: AtomicU64,
}

impl Default for MemorySession {
    fn default() -> Self {
        Self::new(Dialect::SqlServer)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemorySession {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            state: Mutex::new(State::default()),
            log: Mutex::new(Vec::new()),
            fail_write_at: Mutex::new(None),
            fail_read_at: Mutex::new(None),
            writes: AtomicU64::new(0),
            reads: AtomicU64::new(0),
            cursors: AtomicU64::new(0),
        }
    }

    pub fn create_table(&self, column: &BlobColumn) {
        lock(&self.state).tables.entry(column.clone()).or_default();
    }

    /// Inserts (or replaces) a row. `None` stores a NULL data value.
    pub fn insert_row(&self, column: &BlobColumn, key: impl Into<RowKey>, data: Option<Vec<u8>>) {
        lock(&self.state)
            .tables
            .entry(column.clone())
            .or_default()
            .insert(key.into(), data.map(Arc::new));
    }

    pub fn contains_row(&self, column: &BlobColumn, key: &RowKey) -> bool {
        lock(&self.state).tables.get(column).map_or(false, |rows| rows.contains_key(key))
    }

    /// Stored data of a row; `None` if the row is missing or NULL.
    pub fn stored(&self, column: &BlobColumn, key: &RowKey) -> Option<Vec<u8>> {
        let state = lock(&self.state);
        let data = state.tables.get(column)?.get(key)?.as_ref()?;
        Some(data.as_ref().clone())
    }

    /// Makes the write with index `index` (zero based, counted over the
    /// session's lifetime) fail.
    pub fn fail_write_at(&self, index: u64) {
        *lock(&self.fail_write_at) = Some(index);
    }

    /// Makes the cursor read with index `index` fail.
    pub fn fail_read_at(&self, index: u64) {
        *lock(&self.fail_read_at) = Some(index);
    }

    pub fn statements(&self) -> Vec<ExecutedStatement> {
        lock(&self.log).clone()
    }

    pub fn cursors_opened(&self) -> u64 {
        self.cursors.load(Ordering::Relaxed)
    }

    pub fn cursor_reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    pub fn in_transaction(&self) -> bool {
        lock(&self.state).snapshot.is_some()
    }

    fn table_for(&self, sql: &str, render: impl Fn(&BlobColumn) -> String) -> SessionResult<BlobColumn> {
        lock(&self.state)
            .tables
            .keys()
            .find(|column| render(column) == sql)
            .cloned()
            .ok_or_else(|| format!("unsupported statement: {}", sql).into())
    }
}

fn param<'p, 'v>(params: &'p [SqlParam<'v>], name: &str) -> SessionResult<&'p SqlValue<'v>> {
    params
        .iter()
        .find(|p| p.name == name)
        .map(|p| &p.value)
        .ok_or_else(|| format!("parameter {} is not bound", name).into())
}

fn key_param(params: &[SqlParam<'_>]) -> SessionResult<RowKey> {
    match param(params, PARAM_ID)? {
        SqlValue::Int64(v) => Ok(RowKey::Int(*v)),
        SqlValue::Int32(v) => Ok(RowKey::Int((*v).into())),
        SqlValue::Text(v) => Ok(RowKey::Text(v.to_string())),
        SqlValue::Bytes(_) => Err("binary key values are not supported".into()),
    }
}

#[async_trait]
impl BlobSession for MemorySession {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn begin(&self) -> SessionResult<()> {
        let mut state = lock(&self.state);
        if state.snapshot.is_some() {
            return Err("a transaction is already open".into());
        }
        state.snapshot = Some(state.tables.clone());
        Ok(())
    }

    async fn commit(&self) -> SessionResult<()> {
        lock(&self.state)
            .snapshot
            .take()
            .map(|_| ())
            .ok_or_else(|| "no transaction is open".into())
    }

    async fn rollback(&self) -> SessionResult<()> {
        let mut state = lock(&self.state);
        let snapshot = state.snapshot.take().ok_or("no transaction is open")?;
        state.tables = snapshot;
        Ok(())
    }

    async fn execute(&self, sql: &str, params: &[SqlParam<'_>]) -> SessionResult<u64> {
        let column = self.table_for(sql, |c| self.dialect.write_chunk(c))?;

        let chunk = match param(params, PARAM_CHUNK)? {
            SqlValue::Bytes(chunk) => *chunk,
            other => return Err(format!("{} must be binary, got {:?}", PARAM_CHUNK, other).into()),
        };
        let offset = match param(params, PARAM_OFFSET)? {
            SqlValue::Int64(v) => *v,
            other => return Err(format!("{} must be an int64, got {:?}", PARAM_OFFSET, other).into()),
        };
        let length = match param(params, PARAM_LENGTH)? {
            SqlValue::Int32(v) => *v,
            other => return Err(format!("{} must be an int32, got {:?}", PARAM_LENGTH, other).into()),
        };
        let key = key_param(params)?;

        lock(&self.log).push(ExecutedStatement {
            sql: sql.to_string(),
            key: Some(key.clone()),
            offset: Some(offset),
            length: Some(length),
            chunk_len: Some(chunk.len()),
        });

        let index = self.writes.fetch_add(1, Ordering::Relaxed);
        if *lock(&self.fail_write_at) == Some(index) {
            return Err(format!("injected fault on write {}", index).into());
        }

        let mut state = lock(&self.state);
        let rows = state.tables.entry(column).or_default();
        let Some(value) = rows.get_mut(&key) else {
            return Ok(0);
        };
        let data = value.as_mut().ok_or("cannot .WRITE into a NULL value")?;
        if offset < 0 || length < 0 {
            return Err("offset and length must not be negative".into());
        }
        let (offset, length) = (offset as usize, length as usize);
        if offset > data.len() {
            return Err(format!("offset {} is beyond the stored length {}", offset, data.len()).into());
        }
        let end = (offset + length).min(data.len());
        Arc::make_mut(data).splice(offset..end, chunk.iter().copied());
        Ok(1)
    }

    async fn open_cursor<'s>(
        &'s self,
        sql: &str,
        params: &[SqlParam<'_>],
        column: &BlobColumn,
    ) -> SessionResult<Option<Box<dyn BlobCursor + 's>>> {
        let located = self.table_for(sql, |c| self.dialect.select_blob(c))?;
        if &located != column {
            return Err(format!("query does not select {}", column.data_column()).into());
        }
        let key = key_param(params)?;
        self.cursors.fetch_add(1, Ordering::Relaxed);

        let state = lock(&self.state);
        let Some(value) = state.tables.get(column).and_then(|rows| rows.get(&key)) else {
            return Ok(None);
        };
        let data = value.clone().unwrap_or_default();
        Ok(Some(Box::new(MemoryCursor { data, session: self })))
    }
}

struct MemoryCursor<'s> {
    data: Arc<Vec<u8>>,
    session: &'s MemorySession,
}

#[async_trait]
impl BlobCursor for MemoryCursor<'_> {
    async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> SessionResult<usize> {
        let index = self.session.reads.fetch_add(1, Ordering::Relaxed);
        if *lock(&self.session.fail_read_at) == Some(index) {
            return Err(format!("injected fault on read {}", index).into());
        }

        let len = self.data.len() as u64;
        if offset >= len {
            return Ok(0);
        }
        let start = offset as usize;
        let count = buf.len().min(self.data.len() - start);
        buf[..count].copy_from_slice(&self.data[start..start + count]);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files() -> BlobColumn {
        BlobColumn::new(None, "Files", "Id", "FileData").unwrap()
    }

    async fn write(session: &MemorySession, key: i64, offset: i64, chunk: &[u8]) -> SessionResult<u64> {
        let sql = session.dialect().write_chunk(&files());
        let params = [
            SqlParam::new(PARAM_CHUNK, SqlValue::Bytes(chunk)),
            SqlParam::new(PARAM_OFFSET, SqlValue::Int64(offset)),
            SqlParam::new(PARAM_LENGTH, SqlValue::Int32(chunk.len() as i32)),
            SqlParam::new(PARAM_ID, SqlValue::Int64(key)),
        ];
        session.execute(&sql, &params).await
    }

    #[tokio::test]
    async fn test_write_semantics() {
        let session = MemorySession::default();
        session.insert_row(&files(), 1, Some(Vec::new()));

        assert_eq!(write(&session, 1, 0, b"hello").await.unwrap(), 1);
        assert_eq!(write(&session, 1, 5, b" world").await.unwrap(), 1);
        assert_eq!(write(&session, 1, 0, b"J").await.unwrap(), 1);
        assert_eq!(session.stored(&files(), &RowKey::Int(1)).unwrap(), b"Jello world");

        assert!(write(&session, 1, 100, b"x").await.is_err());
        assert_eq!(write(&session, 2, 0, b"x").await.unwrap(), 0);

        session.insert_row(&files(), 3, None);
        assert!(write(&session, 3, 0, b"x").await.is_err());
    }

    #[tokio::test]
    async fn test_rejects_foreign_statements() {
        let session = MemorySession::default();
        session.create_table(&files());
        let err = session.execute("DELETE FROM [Files]", &[]).await.unwrap_err();
        assert!(err.to_string().contains("unsupported statement"));
    }

    #[tokio::test]
    async fn test_rollback_restores_state() {
        let session = MemorySession::default();
        session.insert_row(&files(), 1, Some(b"keep".to_vec()));

        session.begin().await.unwrap();
        assert!(session.in_transaction());
        session.insert_row(&files(), 2, Some(Vec::new()));
        write(&session, 1, 0, b"gone").await.unwrap();
        session.rollback().await.unwrap();

        assert!(!session.in_transaction());
        assert!(!session.contains_row(&files(), &RowKey::Int(2)));
        assert_eq!(session.stored(&files(), &RowKey::Int(1)).unwrap(), b"keep");
        assert!(session.commit().await.is_err());
    }

    #[tokio::test]
    async fn test_cursor_reads_positionally() {
        let session = MemorySession::default();
        session.insert_row(&files(), 1, Some(b"0123456789".to_vec()));

        let column = files();
        let sql = session.dialect().select_blob(&column);
        let params = [SqlParam::new(PARAM_ID, SqlValue::Int64(1))];
        let mut cursor = session.open_cursor(&sql, &params, &column).await.unwrap().unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(cursor.read_at(8, &mut buf).await.unwrap(), 2);
        assert_eq!(&buf[..2], b"89");
        assert_eq!(cursor.read_at(10, &mut buf).await.unwrap(), 0);

        let missing = [SqlParam::new(PARAM_ID, SqlValue::Int64(9))];
        assert!(session.open_cursor(&sql, &missing, &column).await.unwrap().is_none());
        assert_eq!(session.cursors_opened(), 2);
        assert_eq!(session.cursor_reads(), 2);
    }
}
