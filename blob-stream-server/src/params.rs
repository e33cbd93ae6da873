use std::path::PathBuf;

use blob_stream::TransferSettings;
use clap::Parser;

#[derive(Parser, Debug)]
pub struct Args {
    #[clap(long, env = "BLOB_STREAM_HTTP_ADDR", default_value = "127.0.0.1:8080")]
    pub(crate) http_addr: String,
    /// SQLite database file holding the files table.
    #[clap(long, env = "BLOB_STREAM_DATABASE", default_value = "files.db")]
    pub(crate) database: PathBuf,
    #[clap(long, env = "BLOB_STREAM_UPLOAD_CHUNK_SIZE", default_value_t = 10_000_000)]
    pub(crate) upload_chunk_size: usize,
    #[clap(long, env = "BLOB_STREAM_DOWNLOAD_CHUNK_SIZE", default_value_t = 81_920)]
    pub(crate) download_chunk_size: usize,
    /// Finish a cancelled download quietly instead of reporting an error.
    #[clap(long, env = "BLOB_STREAM_SUPPRESS_CANCELLATION_FAULTS")]
    pub(crate) suppress_cancellation_faults: bool,
    /// Allocate a fresh buffer per transfer instead of borrowing from the pool.
    #[clap(long, env = "BLOB_STREAM_NO_POOLED_BUFFERS")]
    pub(crate) no_pooled_buffers: bool,
}

impl Args {
    pub(crate) fn transfer_settings(&self) -> TransferSettings {
        TransferSettings::default()
            .with_upload_chunk_size(self.upload_chunk_size)
            .with_download_chunk_size(self.download_chunk_size)
            .with_suppressed_cancellation(self.suppress_cancellation_faults)
            .with_pooled_buffers(!self.no_pooled_buffers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_map_onto_settings() {
        let args = Args::parse_from([
            "blob-stream-server",
            "--database",
            "/tmp/files.db",
            "--upload-chunk-size",
            "4096",
            "--suppress-cancellation-faults",
            "--no-pooled-buffers",
        ]);
        let settings = args.transfer_settings();
        assert_eq!(settings.upload_chunk_size, 4096);
        assert_eq!(settings.download_chunk_size, 81_920);
        assert!(settings.suppress_cancellation_faults);
        assert!(!settings.use_pooled_buffers);
    }
}
