use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depot_core::models::{CompressionInfo, EntityType, FileRecord, NewFileRecord};
use depot_core::AppError;
use uuid::Uuid;

use crate::query::BoundingBox;

/// Persistence for file records.
///
/// Field updates are last-writer-wins. Compression state is written through
/// its own method so a metadata update can never move a terminal status back.
#[async_trait]
pub trait FileRepository: Send + Sync {
    /// Persist a new record; the store assigns the id and timestamps.
    async fn insert(&self, record: NewFileRecord) -> Result<FileRecord, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<FileRecord>, AppError>;

    /// Records for the given ids, in no particular order. Missing ids are skipped.
    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<FileRecord>, AppError>;

    /// Record where organizing placed the original.
    async fn set_location(
        &self,
        id: Uuid,
        stored_filename: &str,
        storage_path: &str,
    ) -> Result<FileRecord, AppError>;

    /// Write the user-mutable fields: visibility, tags, expiry, entity link, metadata.
    async fn update(&self, record: &FileRecord) -> Result<FileRecord, AppError>;

    /// Move compression out of `processing`. Returns `false` (and writes nothing)
    /// when the stored status is already terminal.
    async fn complete_compression(
        &self,
        id: Uuid,
        info: &CompressionInfo,
    ) -> Result<bool, AppError>;

    async fn delete(&self, id: Uuid) -> Result<bool, AppError>;

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>, AppError>;

    async fn list_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Vec<FileRecord>, AppError>;

    async fn list_public(&self) -> Result<Vec<FileRecord>, AppError>;

    /// Records whose `expires_at` is strictly before `now`.
    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<FileRecord>, AppError>;

    /// Records carrying at least one of `tags`.
    async fn list_by_tags(&self, tags: &BTreeSet<String>) -> Result<Vec<FileRecord>, AppError>;

    /// Records with a location inside `bbox`.
    async fn list_in_bounding_box(&self, bbox: BoundingBox)
        -> Result<Vec<FileRecord>, AppError>;

    /// Records still `processing` that were created before `created_before`.
    async fn list_stuck_processing(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<FileRecord>, AppError>;

    async fn list_all(&self) -> Result<Vec<FileRecord>, AppError>;
}
