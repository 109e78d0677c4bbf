use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

/// Lifecycle of the background compression for one record.
///
/// `Processing` is the only non-terminal state. A record leaves it exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionStatus {
    Processing,
    Completed,
    NotNeeded,
    Failed,
}

impl CompressionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CompressionStatus::Processing => "processing",
            CompressionStatus::Completed => "completed",
            CompressionStatus::NotNeeded => "not_needed",
            CompressionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, CompressionStatus::Processing)
    }

    /// Only `processing -> terminal` is allowed; terminal states never move.
    pub fn can_transition_to(self, next: CompressionStatus) -> bool {
        self == CompressionStatus::Processing && next.is_terminal()
    }
}

impl Display for CompressionStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(CompressionStatus::Processing),
            "completed" => Ok(CompressionStatus::Completed),
            "not_needed" => Ok(CompressionStatus::NotNeeded),
            "failed" => Ok(CompressionStatus::Failed),
            _ => Err(anyhow::anyhow!("Invalid compression status: {}", s)),
        }
    }
}

/// Which derivative is served by default.
///
/// `Both` is accepted on the wire for records written by older producers. It
/// names no single primary, so such records are served from the original.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    Png,
    Webp,
    Both,
    None,
}

impl CompressionType {
    pub fn as_str(self) -> &'static str {
        match self {
            CompressionType::Png => "png",
            CompressionType::Webp => "webp",
            CompressionType::Both => "both",
            CompressionType::None => "none",
        }
    }

    /// File extension of the derivative, if this names a single format.
    pub fn extension(self) -> Option<&'static str> {
        match self {
            CompressionType::Png => Some("png"),
            CompressionType::Webp => Some("webp"),
            CompressionType::Both | CompressionType::None => None,
        }
    }

    pub fn mime_type(self) -> Option<&'static str> {
        match self {
            CompressionType::Png => Some("image/png"),
            CompressionType::Webp => Some("image/webp"),
            CompressionType::Both | CompressionType::None => None,
        }
    }
}

impl Display for CompressionType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompressionType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "png" => Ok(CompressionType::Png),
            "webp" => Ok(CompressionType::Webp),
            "both" => Ok(CompressionType::Both),
            "none" => Ok(CompressionType::None),
            _ => Err(anyhow::anyhow!("Invalid compression type: {}", s)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressionInfo {
    pub status: CompressionStatus,
    pub compressed: bool,
    pub original_size: i64,
    pub compressed_size: Option<i64>,
    pub savings_percentage: Option<f64>,
    pub compression_type: CompressionType,
    /// Co-location key of the original and its derivatives. Never changes once set.
    pub folder_id: Option<String>,
    pub png_size: Option<i64>,
    pub webp_size: Option<i64>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl CompressionInfo {
    /// Initial state for an upload entering the pipeline.
    pub fn processing(original_size: i64, folder_id: Option<String>) -> Self {
        Self {
            status: CompressionStatus::Processing,
            compressed: false,
            original_size,
            compressed_size: None,
            savings_percentage: None,
            compression_type: CompressionType::None,
            folder_id,
            png_size: None,
            webp_size: None,
            completed_at: None,
        }
    }

    /// Initial state for an upload that skips the pipeline.
    pub fn not_needed(original_size: i64, folder_id: Option<String>) -> Self {
        Self {
            status: CompressionStatus::NotNeeded,
            ..Self::processing(original_size, folder_id)
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == CompressionStatus::Completed && self.compressed
    }

    /// Primary derivative format when compression completed.
    pub fn primary(&self) -> Option<CompressionType> {
        if !self.is_completed() {
            return None;
        }
        match self.compression_type {
            CompressionType::Png | CompressionType::Webp => Some(self.compression_type),
            CompressionType::Both | CompressionType::None => None,
        }
    }
}
