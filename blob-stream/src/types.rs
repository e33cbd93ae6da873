use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{StreamError, StreamResult};
use crate::metadata::BlobColumn;

/// Value of the key column identifying the row a transfer works on.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(untagged)]
pub enum RowKey {
    Int(i64),
    Text(String),
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Int(v) => write!(f, "{}", v),
            RowKey::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for RowKey {
    fn from(v: i64) -> Self {
        RowKey::Int(v)
    }
}

impl From<i32> for RowKey {
    fn from(v: i32) -> Self {
        RowKey::Int(v.into())
    }
}

impl From<&str> for RowKey {
    fn from(v: &str) -> Self {
        RowKey::Text(v.to_string())
    }
}

impl From<String> for RowKey {
    fn from(v: String) -> Self {
        RowKey::Text(v)
    }
}

/// The resolved location of one BLOB value: which column of which table, and
/// which row inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTarget {
    pub column: BlobColumn,
    pub key: RowKey,
}

impl TransferTarget {
    pub fn new(column: BlobColumn, key: impl Into<RowKey>) -> Self {
        Self { column, key: key.into() }
    }
}

/// Inclusive byte range for a download. Bounds are signed so that a negative
/// start coming from a caller can be represented and rejected.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: i64,
    pub end: i64,
}

impl ByteRange {
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    pub fn validate(&self) -> StreamResult<()> {
        if self.start < 0 || self.end < self.start {
            return Err(StreamError::InvalidRange { start: self.start, end: self.end });
        }
        Ok(())
    }

    /// Number of bytes covered, assuming the range is valid.
    pub fn byte_count(&self) -> u64 {
        (self.end - self.start) as u64 + 1
    }
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Which part of the stored value a download copies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadWindow {
    /// The whole value.
    #[default]
    Full,
    /// An inclusive range.
    Range(ByteRange),
    /// Everything from the given offset to the end of data.
    From(i64),
}

impl ReadWindow {
    pub fn validate(&self) -> StreamResult<()> {
        match *self {
            ReadWindow::Full => Ok(()),
            ReadWindow::Range(range) => range.validate(),
            ReadWindow::From(start) if start < 0 => {
                Err(StreamError::InvalidRange { start, end: i64::MAX })
            }
            ReadWindow::From(_) => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_validation() {
        assert!(ByteRange::new(0, 0).validate().is_ok());
        assert!(ByteRange::new(100, 199).validate().is_ok());
        assert_eq!(ByteRange::new(100, 199).byte_count(), 100);

        for (start, end) in [(-1, 10), (-5, -5), (10, 9), (1, 0)] {
            match ByteRange::new(start, end).validate() {
                Err(StreamError::InvalidRange { start: s, end: e }) => {
                    assert_eq!((s, e), (start, end));
                }
                other => panic!("expected InvalidRange for {start}-{end}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_open_ended_window_rejects_negative_start() {
        assert!(ReadWindow::From(0).validate().is_ok());
        assert!(ReadWindow::From(-1).validate().is_err());
        assert!(ReadWindow::Full.validate().is_ok());
    }

    #[test]
    fn test_row_key_conversions() {
        assert_eq!(RowKey::from(5_i32), RowKey::Int(5));
        assert_eq!(RowKey::from("abc").to_string(), "abc");
        let json = serde_json::to_string(&RowKey::Int(42)).unwrap();
        assert_eq!(json, "42");
    }
}
