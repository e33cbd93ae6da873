//! Mapping from a row type and one of its members onto the table and column
//! names a transfer needs.
//!
//! Row types describe themselves once through [`BlobEntity`]; a transfer then
//! resolves an [`Accessor`] against that description into a [`BlobColumn`].

use std::borrow::Cow;

use serde::{Deserialize, Serialize};

use crate::error::{StreamError, StreamResult};

/// One mapped member of a row type.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct ColumnDescriptor {
    /// Name of the member on the Rust type.
    pub member: String,
    /// Name of the column in the table.
    pub name: String,
    pub primary_key: bool,
}

impl ColumnDescriptor {
    pub fn new(member: impl Into<String>, name: impl Into<String>) -> Self {
        Self { member: member.into(), name: name.into(), primary_key: false }
    }

    pub fn key(member: impl Into<String>, name: impl Into<String>) -> Self {
        Self { primary_key: true, ..Self::new(member, name) }
    }
}

/// Table-level description of a row type.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TableDescriptor {
    pub schema: Option<String>,
    pub name: String,
    pub columns: Vec<ColumnDescriptor>,
}

impl TableDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self { schema: None, name: name.into(), columns: Vec::new() }
    }

    pub fn schema(mut self, schema: impl Into<String>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn column(mut self, column: ColumnDescriptor) -> Self {
        self.columns.push(column);
        self
    }

    /// Resolves `accessor` into the column descriptor used by a transfer.
    pub fn resolve(&self, accessor: &Accessor) -> StreamResult<BlobColumn> {
        let member = accessor.member()?;

        let data_column = self
            .columns
            .iter()
            .find(|c| c.member == member)
            .ok_or_else(|| StreamError::InvalidAccessor {
                accessor: accessor.to_string(),
                reason: format!("member {} is not mapped to a column of {}", member, self.name),
            })?;

        let keys: Vec<&ColumnDescriptor> = self.columns.iter().filter(|c| c.primary_key).collect();
        let key_column = match keys.as_slice() {
            [] => return Err(StreamError::NoKeyDefined { table: self.name.clone() }),
            [key] => *key,
            _ => {
                return Err(StreamError::AmbiguousKey { table: self.name.clone(), count: keys.len() })
            }
        };

        BlobColumn::new(
            self.schema.clone(),
            self.name.clone(),
            key_column.name.clone(),
            data_column.name.clone(),
        )
    }
}

/// A row type whose table layout is known up front.
pub trait BlobEntity {
    fn table() -> TableDescriptor;
}

/// Names the member holding the BLOB. Only a direct, single-level member is
/// accepted; anything else fails resolution with
/// [`StreamError::InvalidAccessor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accessor {
    path: Cow<'static, str>,
}

impl Accessor {
    pub fn new(path: impl Into<Cow<'static, str>>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn member(&self) -> StreamResult<&str> {
        let invalid = |reason: &str| StreamError::InvalidAccessor {
            accessor: self.path.to_string(),
            reason: reason.to_string(),
        };

        let path = self.path.trim();
        if path.is_empty() {
            return Err(invalid("accessor is empty"));
        }
        if path.contains('.') {
            return Err(invalid("accessor must be a direct member access, not a chain"));
        }
        let mut chars = path.chars();
        let head_ok = chars.next().map_or(false, |c| c == '_' || c.is_alphabetic());
        if !head_ok || !chars.all(|c| c == '_' || c.is_alphanumeric()) {
            return Err(invalid("accessor must be a plain member name"));
        }
        Ok(path)
    }
}

impl std::fmt::Display for Accessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.path)
    }
}

/// Builds an [`Accessor`] for `field` of `Type`, refusing to compile when the
/// field does not exist.
///
/// ```
/// use blob_stream::column;
///
/// struct File { id: i64, data: Vec<u8> }
///
/// let accessor = column!(File, data);
/// assert_eq!(accessor.path(), "data");
/// ```
#[macro_export]
macro_rules! column {
    ($entity:ty, $field:ident) => {{
        let _ = |e: &$entity| {
            let _ = &e.$field;
        };
        $crate::metadata::Accessor::new(stringify!($field))
    }};
}

/// Schema, table, key column and data column of one BLOB column. All names
/// have passed [`validate_identifier`].
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobColumn {
    schema: Option<String>,
    table: String,
    key_column: String,
    data_column: String,
}

impl BlobColumn {
    pub fn new(
        schema: Option<String>,
        table: impl Into<String>,
        key_column: impl Into<String>,
        data_column: impl Into<String>,
    ) -> StreamResult<Self> {
        let column = Self {
            schema: schema.filter(|s| !s.is_empty()),
            table: table.into(),
            key_column: key_column.into(),
            data_column: data_column.into(),
        };
        if let Some(schema) = &column.schema {
            validate_identifier(schema)?;
        }
        validate_identifier(&column.table)?;
        validate_identifier(&column.key_column)?;
        validate_identifier(&column.data_column)?;
        Ok(column)
    }

    /// Resolves `accessor` against the table of `E`.
    pub fn of<E: BlobEntity>(accessor: &Accessor) -> StreamResult<Self> {
        E::table().resolve(accessor)
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn key_column(&self) -> &str {
        &self.key_column
    }

    pub fn data_column(&self) -> &str {
        &self.data_column
    }
}

/// Rejects names that cannot be quoted into statement text.
pub fn validate_identifier(name: &str) -> StreamResult<()> {
    if name.trim().is_empty() || name.len() > 128 || name.chars().any(char::is_control) {
        return Err(StreamError::InvalidIdentifier(name.to_string()));
    }
    Ok(())
}
