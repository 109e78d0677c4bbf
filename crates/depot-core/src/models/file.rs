use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::path::Path;
use std::str::FromStr;
use uuid::Uuid;

use super::compression::{CompressionInfo, CompressionType};
use super::metadata::Metadata;

/// Kind of domain entity a file is attached to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EntityType {
    KpiEntry,
    UserProfile,
    Department,
    Template,
    #[default]
    Other,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::KpiEntry => "kpi-entry",
            EntityType::UserProfile => "user-profile",
            EntityType::Department => "department",
            EntityType::Template => "template",
            EntityType::Other => "other",
        }
    }
}

impl Display for EntityType {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "kpi-entry" => Ok(EntityType::KpiEntry),
            "user-profile" => Ok(EntityType::UserProfile),
            "department" => Ok(EntityType::Department),
            "template" => Ok(EntityType::Template),
            "other" => Ok(EntityType::Other),
            _ => Err(anyhow::anyhow!("Invalid entity type: {}", s)),
        }
    }
}

/// Persisted description of one uploaded file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: Uuid,
    pub original_name: String,
    /// `{ownerId}_{id}.{ext}` once organizing completes.
    pub stored_filename: String,
    /// Path of the original bytes relative to the storage root.
    pub storage_path: String,
    pub mimetype: String,
    pub size: i64,
    pub owner_id: String,
    pub entity_id: Option<String>,
    pub entity_type: EntityType,
    pub is_public: bool,
    pub tags: BTreeSet<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub compression: CompressionInfo,
    pub metadata: Metadata,
}

impl FileRecord {
    pub fn folder_id(&self) -> Option<&str> {
        self.compression.folder_id.as_deref()
    }

    /// Lower-cased extension of the original display name, if any.
    pub fn extension(&self) -> Option<String> {
        Path::new(&self.original_name)
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .map(|e| e.to_lowercase())
    }

    pub fn is_image(&self) -> bool {
        self.mimetype.starts_with("image/")
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at < now).unwrap_or(false)
    }

    /// Display name to hand out when serving the primary derivative instead of the original.
    pub fn served_name(&self) -> String {
        match self.compression.primary().and_then(CompressionType::extension) {
            Some(ext) => {
                let stem = Path::new(&self.original_name)
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .unwrap_or("file");
                format!("{}.{}", stem, ext)
            }
            None => self.original_name.clone(),
        }
    }
}

/// Fields supplied when persisting a new record. The store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewFileRecord {
    pub original_name: String,
    pub stored_filename: String,
    pub storage_path: String,
    pub mimetype: String,
    pub size: i64,
    pub owner_id: String,
    pub entity_id: Option<String>,
    pub entity_type: EntityType,
    pub is_public: bool,
    pub tags: BTreeSet<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub compression: CompressionInfo,
    pub metadata: Metadata,
}

impl NewFileRecord {
    pub fn into_record(self, id: Uuid, now: DateTime<Utc>) -> FileRecord {
        FileRecord {
            id,
            original_name: self.original_name,
            stored_filename: self.stored_filename,
            storage_path: self.storage_path,
            mimetype: self.mimetype,
            size: self.size,
            owner_id: self.owner_id,
            entity_id: self.entity_id,
            entity_type: self.entity_type,
            is_public: self.is_public,
            tags: self.tags,
            expires_at: self.expires_at,
            created_at: now,
            updated_at: now,
            compression: self.compression,
            metadata: self.metadata,
        }
    }
}

/// Aggregate storage usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStats {
    pub file_count: i64,
    pub total_original_bytes: i64,
    pub compressed_count: i64,
    pub total_compressed_bytes: i64,
    pub processing_count: i64,
}

impl FileStats {
    pub fn add(&mut self, record: &FileRecord) {
        self.file_count += 1;
        self.total_original_bytes += record.size;
        if record.compression.is_completed() {
            self.compressed_count += 1;
            self.total_compressed_bytes += record.compression.compressed_size.unwrap_or(record.size);
        }
        if !record.compression.status.is_terminal() {
            self.processing_count += 1;
        }
    }

    /// Savings over compressed files only, in percent.
    pub fn savings_percentage(&self) -> Option<f64> {
        if self.compressed_count == 0 || self.total_original_bytes == 0 {
            return None;
        }
        let saved = self.total_original_bytes - self.total_compressed_bytes;
        Some(saved as f64 / self.total_original_bytes as f64 * 100.0)
    }
}
