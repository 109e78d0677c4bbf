//! Defaults shared across crates.

pub const DEFAULT_COMPRESSION_THRESHOLD_BYTES: u64 = 1024 * 1024;
pub const DEFAULT_COMPRESSION_QUALITY: u8 = 80;
pub const DEFAULT_MAX_WIDTH: u32 = 1920;
pub const DEFAULT_MAX_HEIGHT: u32 = 1080;

/// A derivative must come in under this fraction of the original to win outright.
pub const PRIMARY_RATIO_CUTOFF: f64 = 0.95;

pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 20;
pub const DEFAULT_MAX_UPLOAD_SIZE_MB: u64 = 50;
pub const DEFAULT_FOLDER_SWEEP_INTERVAL_SECS: u64 = 3600;
pub const DEFAULT_SHUTDOWN_DRAIN_SECS: u64 = 10;
pub const DEFAULT_ARCHIVE_DIR_NAME: &str = "archives";
pub const DEFAULT_ARCHIVE_NAME: &str = "files";

/// Suffix of files still being written. Readers and sweepers ignore them.
pub const PARTIAL_SUFFIX: &str = "partial";
