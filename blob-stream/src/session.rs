use async_trait::async_trait;

use crate::dialect::Dialect;
use crate::error::SessionResult;
use crate::metadata::BlobColumn;
use crate::types::RowKey;

/// Value bound to a statement parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlValue<'a> {
    Bytes(&'a [u8]),
    Int64(i64),
    Int32(i32),
    Text(&'a str),
}

impl<'a> From<&'a RowKey> for SqlValue<'a> {
    fn from(key: &'a RowKey) -> Self {
        match key {
            RowKey::Int(v) => SqlValue::Int64(*v),
            RowKey::Text(v) => SqlValue::Text(v),
        }
    }
}

/// A named statement parameter. `name` carries its prefix, e.g. `@chunk`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlParam<'a> {
    pub name: &'static str,
    pub value: SqlValue<'a>,
}

impl<'a> SqlParam<'a> {
    pub fn new(name: &'static str, value: SqlValue<'a>) -> Self {
        Self { name, value }
    }
}

/// Forward-only reader over one stored BLOB value.
#[async_trait]
pub trait BlobCursor: Send {
    /// Copies up to `buf.len()` bytes starting at `offset` into `buf` and
    /// returns how many were copied. Zero means there is no data at `offset`.
    async fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> SessionResult<usize>;
}

/// The part of a database session the transfer engine consumes.
///
/// One session is one open connection. Timeouts, isolation and locking are
/// whatever the session is configured with.
#[async_trait]
pub trait BlobSession: Send + Sync {
    /// Dialect used to render statements for this session.
    fn dialect(&self) -> Dialect;

    async fn begin(&self) -> SessionResult<()>;

    async fn commit(&self) -> SessionResult<()>;

    async fn rollback(&self) -> SessionResult<()>;

    /// Executes a parameterized statement and returns the affected row count.
    async fn execute(&self, sql: &str, params: &[SqlParam<'_>]) -> SessionResult<u64>;

    /// Runs the locator query rendered by [`Dialect::select_blob`] and opens a
    /// sequential-access cursor over `column` of the matching row. Returns
    /// `None` when no row matches.
    async fn open_cursor<'s>(
        &'s self,
        sql: &str,
        params: &[SqlParam<'_>],
        column: &BlobColumn,
    ) -> SessionResult<Option<Box<dyn BlobCursor + 's>>>;
}
