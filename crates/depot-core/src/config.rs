//! Runtime configuration.
//!
//! The storage root is injected here once at process start and handed to every
//! component at construction; nothing reads the environment after `from_env`.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::*;

/// Knobs consumed by the eligibility predicate and the transcoder.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionConfig {
    /// Master switch. When off, nothing enters the pipeline.
    pub enabled: bool,
    pub compress_images: bool,
    /// Reserved. Documents are never eligible regardless of this value.
    pub compress_pdfs: bool,
    pub threshold_bytes: u64,
    pub quality: u8,
    pub max_width: u32,
    pub max_height: u32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            compress_images: true,
            compress_pdfs: false,
            threshold_bytes: DEFAULT_COMPRESSION_THRESHOLD_BYTES,
            quality: DEFAULT_COMPRESSION_QUALITY,
            max_width: DEFAULT_MAX_WIDTH,
            max_height: DEFAULT_MAX_HEIGHT,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DepotConfig {
    pub environment: String,
    pub storage_root: PathBuf,
    pub archive_dir: PathBuf,
    pub public_base_url: String,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub max_upload_size_bytes: u64,
    pub compression: CompressionConfig,
    /// 0 keeps the base contract: every eligible upload gets its own task immediately.
    pub max_concurrent_compressions: usize,
    pub folder_sweep_interval_secs: u64,
    pub expired_sweep_interval_secs: u64,
    pub shutdown_drain_secs: u64,
}

fn parse_or<T: std::str::FromStr>(value: Option<String>, default: T) -> T {
    value
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn parse_bool_or(value: Option<String>, default: bool) -> bool {
    value
        .map(|v| v.trim().to_lowercase())
        .and_then(|v| match v.as_str() {
            "true" | "1" | "yes" => Some(true),
            "false" | "0" | "no" => Some(false),
            _ => None,
        })
        .unwrap_or(default)
}

impl DepotConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Build from any key lookup. `from_env` passes the process environment.
    pub fn from_vars<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let storage_root = lookup("STORAGE_ROOT")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .ok_or_else(|| anyhow::anyhow!("STORAGE_ROOT must be set"))?;

        let archive_dir = lookup("ARCHIVE_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| storage_root.join(DEFAULT_ARCHIVE_DIR_NAME));

        let compression = CompressionConfig {
            enabled: parse_bool_or(lookup("ENABLE_COMPRESSION"), true),
            compress_images: parse_bool_or(lookup("COMPRESS_IMAGES"), true),
            compress_pdfs: parse_bool_or(lookup("COMPRESS_PDFS"), false),
            threshold_bytes: parse_or(
                lookup("COMPRESSION_THRESHOLD_BYTES"),
                DEFAULT_COMPRESSION_THRESHOLD_BYTES,
            ),
            quality: parse_or(lookup("COMPRESSION_QUALITY"), DEFAULT_COMPRESSION_QUALITY),
            max_width: parse_or(lookup("COMPRESSION_MAX_WIDTH"), DEFAULT_MAX_WIDTH),
            max_height: parse_or(lookup("COMPRESSION_MAX_HEIGHT"), DEFAULT_MAX_HEIGHT),
        };

        let config = DepotConfig {
            environment: lookup("ENVIRONMENT").unwrap_or_else(|| "development".to_string()),
            storage_root,
            archive_dir,
            public_base_url: lookup("PUBLIC_BASE_URL").unwrap_or_default(),
            database_url: lookup("DATABASE_URL").filter(|s| !s.trim().is_empty()),
            db_max_connections: parse_or(lookup("DB_MAX_CONNECTIONS"), DEFAULT_DB_MAX_CONNECTIONS),
            max_upload_size_bytes: parse_or(lookup("MAX_UPLOAD_SIZE_MB"), DEFAULT_MAX_UPLOAD_SIZE_MB)
                * 1024
                * 1024,
            compression,
            max_concurrent_compressions: parse_or(lookup("MAX_CONCURRENT_COMPRESSIONS"), 0),
            folder_sweep_interval_secs: parse_or(
                lookup("FOLDER_SWEEP_INTERVAL_SECS"),
                DEFAULT_FOLDER_SWEEP_INTERVAL_SECS,
            ),
            expired_sweep_interval_secs: parse_or(lookup("EXPIRED_SWEEP_INTERVAL_SECS"), 0),
            shutdown_drain_secs: parse_or(
                lookup("SHUTDOWN_DRAIN_SECS"),
                DEFAULT_SHUTDOWN_DRAIN_SECS,
            ),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !(1..=100).contains(&self.compression.quality) {
            return Err(anyhow::anyhow!(
                "COMPRESSION_QUALITY must be between 1 and 100, got {}",
                self.compression.quality
            ));
        }

        if self.compression.max_width == 0 || self.compression.max_height == 0 {
            return Err(anyhow::anyhow!(
                "COMPRESSION_MAX_WIDTH and COMPRESSION_MAX_HEIGHT must be greater than 0"
            ));
        }

        if self.max_upload_size_bytes == 0 {
            return Err(anyhow::anyhow!("MAX_UPLOAD_SIZE_MB must be greater than 0"));
        }

        if let Some(url) = &self.database_url {
            if !(url.starts_with("postgres://") || url.starts_with("postgresql://")) {
                return Err(anyhow::anyhow!(
                    "DATABASE_URL must be a valid PostgreSQL connection string"
                ));
            }
        }

        if self.compression.compress_pdfs {
            tracing::warn!("COMPRESS_PDFS is set but document compression is disabled; ignoring");
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        matches!(self.environment.to_lowercase().as_str(), "production" | "prod")
    }

    pub fn shutdown_drain(&self) -> Duration {
        Duration::from_secs(self.shutdown_drain_secs)
    }

    pub fn folder_sweep_interval(&self) -> Option<Duration> {
        (self.folder_sweep_interval_secs > 0)
            .then(|| Duration::from_secs(self.folder_sweep_interval_secs))
    }

    pub fn expired_sweep_interval(&self) -> Option<Duration> {
        (self.expired_sweep_interval_secs > 0)
            .then(|| Duration::from_secs(self.expired_sweep_interval_secs))
    }
}
