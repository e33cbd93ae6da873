//! Statement text for the positional write and the cursor query.
//!
//! Only identifiers coming from a validated [`BlobColumn`] are spliced into the
//! text; every value travels as a named parameter.

use crate::metadata::BlobColumn;

pub const PARAM_CHUNK: &str = "@chunk";
pub const PARAM_OFFSET: &str = "@offset";
pub const PARAM_LENGTH: &str = "@length";
pub const PARAM_ID: &str = "@id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    /// `UPDATE ... SET col.WRITE(...)` and sequential-access readers.
    SqlServer,
    /// substr splicing for writes, incremental BLOB handles for reads.
    Sqlite,
}

impl Dialect {
    pub fn quote_identifier(&self, name: &str) -> String {
        match self {
            Dialect::SqlServer => format!("[{}]", name.replace(']', "]]")),
            Dialect::Sqlite => format!("\"{}\"", name.replace('"', "\"\"")),
        }
    }

    pub fn qualified_table(&self, column: &BlobColumn) -> String {
        match column.schema() {
            Some(schema) => format!(
                "{}.{}",
                self.quote_identifier(schema),
                self.quote_identifier(column.table())
            ),
            None => self.quote_identifier(column.table()),
        }
    }

    /// Statement overwriting `@length` bytes of the data column at `@offset`
    /// with `@chunk`, for the row whose key equals `@id`.
    ///
    /// Neither dialect writes into a NULL value: `.WRITE` fails, and the SQLite
    /// statement matches no row (concatenating onto NULL yields NULL).
    pub fn write_chunk(&self, column: &BlobColumn) -> String {
        let table = self.qualified_table(column);
        let data = self.quote_identifier(column.data_column());
        let key = self.quote_identifier(column.key_column());
        match self {
            Dialect::SqlServer => format!(
                "UPDATE {table} SET {data}.WRITE({PARAM_CHUNK}, {PARAM_OFFSET}, {PARAM_LENGTH}) \
                 WHERE {key} = {PARAM_ID}"
            ),
            Dialect::Sqlite => format!(
                "UPDATE {table} SET {data} = CAST(substr({data}, 1, {PARAM_OFFSET}) || {PARAM_CHUNK} \
                 || substr({data}, {PARAM_OFFSET} + {PARAM_LENGTH} + 1) AS BLOB) \
                 WHERE {key} = {PARAM_ID} AND {data} IS NOT NULL"
            ),
        }
    }

    /// Query locating the data column of the row whose key equals `@id`.
    ///
    /// SQL Server selects the column itself for a sequential-access reader.
    /// SQLite selects the rowid and the stored length so the value can be
    /// opened as an incremental BLOB handle.
    pub fn select_blob(&self, column: &BlobColumn) -> String {
        let table = self.qualified_table(column);
        let data = self.quote_identifier(column.data_column());
        let key = self.quote_identifier(column.key_column());
        match self {
            Dialect::SqlServer => format!("SELECT {data} FROM {table} WHERE {key} = {PARAM_ID}"),
            Dialect::Sqlite => {
                format!("SELECT rowid, length({data}) FROM {table} WHERE {key} = {PARAM_ID}")
            }
        }
    }
}
