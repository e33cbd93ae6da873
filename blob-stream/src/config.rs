use serde::{Deserialize, Serialize};

use crate::error::{StreamError, StreamResult};

pub const DEFAULT_UPLOAD_CHUNK_SIZE: usize = 10_000_000;
/// Stays below the size at which most allocators switch to dedicated mappings.
pub const DEFAULT_DOWNLOAD_CHUNK_SIZE: usize = 81_920;

/// Settings shared by every transfer run through one
/// [`StreamEngine`](crate::engine::StreamEngine).
///
/// The value is fixed once the engine is built; change it by building a new
/// engine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct TransferSettings {
    /// Bytes read from the source stream and sent with each positional write.
    /// Smaller chunks mean more round trips to the database.
    pub upload_chunk_size: usize,

    /// Bytes read from the cursor and written to the destination per chunk.
    pub download_chunk_size: usize,

    /// When set, a download that observes cancellation returns normally
    /// instead of failing with [`StreamError::Cancelled`].
    pub suppress_cancellation_faults: bool,

    /// Borrow chunk buffers from the shared pool instead of allocating one per call.
    pub use_pooled_buffers: bool,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            upload_chunk_size: DEFAULT_UPLOAD_CHUNK_SIZE,
            download_chunk_size: DEFAULT_DOWNLOAD_CHUNK_SIZE,
            suppress_cancellation_faults: false,
            use_pooled_buffers: true,
        }
    }
}

impl TransferSettings {
    pub fn with_upload_chunk_size(mut self, size: usize) -> Self {
        self.upload_chunk_size = size;
        self
    }

    pub fn with_download_chunk_size(mut self, size: usize) -> Self {
        self.download_chunk_size = size;
        self
    }

    pub fn with_suppressed_cancellation(mut self, suppress: bool) -> Self {
        self.suppress_cancellation_faults = suppress;
        self
    }

    pub fn with_pooled_buffers(mut self, pooled: bool) -> Self {
        self.use_pooled_buffers = pooled;
        self
    }

    pub fn validate(&self) -> StreamResult<()> {
        if self.upload_chunk_size == 0 {
            return Err(StreamError::InvalidSettings("upload chunk size must be positive".into()));
        }
        if self.download_chunk_size == 0 {
            return Err(StreamError::InvalidSettings("download chunk size must be positive".into()));
        }
        // the chunk length travels as a 32-bit statement parameter
        if self.upload_chunk_size > i32::MAX as usize {
            return Err(StreamError::InvalidSettings(format!(
                "upload chunk size {} exceeds {}",
                self.upload_chunk_size,
                i32::MAX
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = TransferSettings::default();
        assert_eq!(settings.upload_chunk_size, 10_000_000);
        assert_eq!(settings.download_chunk_size, 81_920);
        assert!(!settings.suppress_cancellation_faults);
        assert!(settings.use_pooled_buffers);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_json_falls_back_to_defaults() {
        let settings: TransferSettings =
            serde_json::from_str(r#"{"upload_chunk_size": 11000000, "use_pooled_buffers": false}"#).unwrap();
        assert_eq!(settings.upload_chunk_size, 11_000_000);
        assert_eq!(settings.download_chunk_size, DEFAULT_DOWNLOAD_CHUNK_SIZE);
        assert!(!settings.use_pooled_buffers);
    }

    #[test]
    fn test_upload_chunk_must_fit_the_length_parameter() {
        let at_limit = TransferSettings::default().with_upload_chunk_size(i32::MAX as usize);
        assert!(at_limit.validate().is_ok());
        let err = TransferSettings::default()
            .with_upload_chunk_size(i32::MAX as usize + 1)
            .validate()
            .unwrap_err();
        assert!(matches!(err, StreamError::InvalidSettings(_)));
    }

    #[test]
    fn test_zero_chunk_sizes_are_rejected() {
        let err = TransferSettings::default().with_upload_chunk_size(0).validate().unwrap_err();
        assert!(matches!(err, StreamError::InvalidSettings(_)));
        let err = TransferSettings::default().with_download_chunk_size(0).validate().unwrap_err();
        assert!(matches!(err, StreamError::InvalidSettings(_)));
    }
}
