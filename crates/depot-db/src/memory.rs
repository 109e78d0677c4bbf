use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use depot_core::models::{CompressionInfo, CompressionStatus, EntityType, FileRecord, NewFileRecord};
use depot_core::AppError;
use uuid::Uuid;

use crate::query::BoundingBox;
use crate::repository::FileRepository;

/// Process-local store. Also serves as the test double, with failure injection
/// for deletes.
#[derive(Clone, Default)]
pub struct InMemoryFileRepository {
    records: Arc<Mutex<HashMap<Uuid, FileRecord>>>,
    failing_deletes: Arc<Mutex<HashSet<Uuid>>>,
}

fn poisoned<T>(_: T) -> AppError {
    AppError::Internal("In-memory store lock poisoned".to_string())
}

impl InMemoryFileRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `delete(id)` fail until cleared.
    pub fn fail_delete_for(&self, id: Uuid) {
        if let Ok(mut failing) = self.failing_deletes.lock() {
            failing.insert(id);
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut failing) = self.failing_deletes.lock() {
            failing.clear();
        }
    }

    /// Insert a fully formed record, bypassing id assignment.
    pub fn put(&self, record: FileRecord) -> Result<(), AppError> {
        self.lock()?.insert(record.id, record);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Uuid, FileRecord>>, AppError> {
        self.records.lock().map_err(poisoned)
    }

    fn filtered<F>(&self, predicate: F) -> Result<Vec<FileRecord>, AppError>
    where
        F: Fn(&FileRecord) -> bool,
    {
        let mut out: Vec<FileRecord> = self
            .lock()?
            .values()
            .filter(|r| predicate(r))
            .cloned()
            .collect();
        out.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(out)
    }
}

#[async_trait]
impl FileRepository for InMemoryFileRepository {
    async fn insert(&self, record: NewFileRecord) -> Result<FileRecord, AppError> {
        let record = record.into_record(Uuid::new_v4(), Utc::now());
        self.lock()?.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get(&self, id: Uuid) -> Result<Option<FileRecord>, AppError> {
        Ok(self.lock()?.get(&id).cloned())
    }

    async fn get_many(&self, ids: &[Uuid]) -> Result<Vec<FileRecord>, AppError> {
        let records = self.lock()?;
        Ok(ids.iter().filter_map(|id| records.get(id).cloned()).collect())
    }

    async fn set_location(
        &self,
        id: Uuid,
        stored_filename: &str,
        storage_path: &str,
    ) -> Result<FileRecord, AppError> {
        let mut records = self.lock()?;
        let record = records
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("File {} not found", id)))?;
        record.stored_filename = stored_filename.to_string();
        record.storage_path = storage_path.to_string();
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn update(&self, update: &FileRecord) -> Result<FileRecord, AppError> {
        let mut records = self.lock()?;
        let record = records
            .get_mut(&update.id)
            .ok_or_else(|| AppError::not_found(format!("File {} not found", update.id)))?;
        record.is_public = update.is_public;
        record.tags = update.tags.clone();
        record.expires_at = update.expires_at;
        record.entity_type = update.entity_type;
        record.entity_id = update.entity_id.clone();
        record.metadata = update.metadata.clone();
        record.updated_at = Utc::now();
        Ok(record.clone())
    }

    async fn complete_compression(
        &self,
        id: Uuid,
        info: &CompressionInfo,
    ) -> Result<bool, AppError> {
        let mut records = self.lock()?;
        let Some(record) = records.get_mut(&id) else {
            return Ok(false);
        };
        if !record.compression.status.can_transition_to(info.status) {
            return Ok(false);
        }
        record.compression = info.clone();
        record.updated_at = Utc::now();
        Ok(true)
    }

    async fn delete(&self, id: Uuid) -> Result<bool, AppError> {
        if self
            .failing_deletes
            .lock()
            .map_err(poisoned)?
            .contains(&id)
        {
            return Err(AppError::Internal(format!(
                "Injected delete failure for {}",
                id
            )));
        }
        Ok(self.lock()?.remove(&id).is_some())
    }

    async fn list_by_owner(&self, owner_id: &str) -> Result<Vec<FileRecord>, AppError> {
        self.filtered(|r| r.owner_id == owner_id)
    }

    async fn list_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
    ) -> Result<Vec<FileRecord>, AppError> {
        self.filtered(|r| r.entity_type == entity_type && r.entity_id.as_deref() == Some(entity_id))
    }

    async fn list_public(&self) -> Result<Vec<FileRecord>, AppError> {
        self.filtered(|r| r.is_public)
    }

    async fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<FileRecord>, AppError> {
        self.filtered(|r| r.is_expired(now))
    }

    async fn list_by_tags(&self, tags: &BTreeSet<String>) -> Result<Vec<FileRecord>, AppError> {
        self.filtered(|r| !r.tags.is_disjoint(tags))
    }

    async fn list_in_bounding_box(
        &self,
        bbox: BoundingBox,
    ) -> Result<Vec<FileRecord>, AppError> {
        self.filtered(|r| {
            r.metadata
                .location
                .as_ref()
                .map(|loc| bbox.contains(loc.latitude, loc.longitude))
                .unwrap_or(false)
        })
    }

    async fn list_stuck_processing(
        &self,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<FileRecord>, AppError> {
        self.filtered(|r| {
            r.compression.status == CompressionStatus::Processing && r.created_at < created_before
        })
    }

    async fn list_all(&self) -> Result<Vec<FileRecord>, AppError> {
        self.filtered(|_| true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use depot_core::models::{CompressionType, Location, Metadata};

    fn new_record(owner: &str) -> NewFileRecord {
        NewFileRecord {
            original_name: "report.pdf".to_string(),
            stored_filename: String::new(),
            storage_path: String::new(),
            mimetype: "application/pdf".to_string(),
            size: 10,
            owner_id: owner.to_string(),
            entity_id: None,
            entity_type: EntityType::Other,
            is_public: false,
            tags: BTreeSet::new(),
            expires_at: None,
            compression: CompressionInfo::processing(10, Some("f1".to_string())),
            metadata: Metadata::default(),
        }
    }

    #[tokio::test]
    async fn test_insert_get_delete() {
        let repo = InMemoryFileRepository::new();
        let record = repo.insert(new_record("u1")).await.unwrap();
        assert_eq!(repo.get(record.id).await.unwrap().unwrap().owner_id, "u1");
        assert!(repo.delete(record.id).await.unwrap());
        assert!(!repo.delete(record.id).await.unwrap());
        assert!(repo.get(record.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_compression_written_once() {
        let repo = InMemoryFileRepository::new();
        let record = repo.insert(new_record("u1")).await.unwrap();

        let mut done = record.compression.clone();
        done.status = CompressionStatus::Completed;
        done.compressed = true;
        done.compression_type = CompressionType::Webp;
        assert!(repo.complete_compression(record.id, &done).await.unwrap());

        let mut failed = record.compression.clone();
        failed.status = CompressionStatus::Failed;
        assert!(!repo.complete_compression(record.id, &failed).await.unwrap());

        let stored = repo.get(record.id).await.unwrap().unwrap();
        assert_eq!(stored.compression.status, CompressionStatus::Completed);
    }

    #[tokio::test]
    async fn test_update_leaves_compression_alone() {
        let repo = InMemoryFileRepository::new();
        let record = repo.insert(new_record("u1")).await.unwrap();

        let mut done = record.compression.clone();
        done.status = CompressionStatus::NotNeeded;
        repo.complete_compression(record.id, &done).await.unwrap();

        // A stale copy still says `processing`.
        let mut stale = record.clone();
        stale.is_public = true;
        let updated = repo.update(&stale).await.unwrap();
        assert!(updated.is_public);
        assert_eq!(updated.compression.status, CompressionStatus::NotNeeded);
    }

    #[tokio::test]
    async fn test_query_shapes() {
        let repo = InMemoryFileRepository::new();
        let now = Utc::now();

        let mut tagged = new_record("u1");
        tagged.tags = ["q3".to_string(), "finance".to_string()].into();
        tagged.entity_type = EntityType::KpiEntry;
        tagged.entity_id = Some("k1".to_string());
        let tagged = repo.insert(tagged).await.unwrap();

        let mut public = new_record("u2");
        public.is_public = true;
        public.expires_at = Some(now - Duration::hours(1));
        public.metadata.location = Some(Location::new(48.85, 2.35));
        let public = repo.insert(public).await.unwrap();

        assert_eq!(repo.list_by_owner("u1").await.unwrap().len(), 1);
        assert_eq!(
            repo.list_by_entity(EntityType::KpiEntry, "k1").await.unwrap()[0].id,
            tagged.id
        );
        assert_eq!(repo.list_public().await.unwrap()[0].id, public.id);
        assert_eq!(repo.list_expired(now).await.unwrap()[0].id, public.id);

        let wanted: BTreeSet<String> = ["finance".to_string(), "other".to_string()].into();
        assert_eq!(repo.list_by_tags(&wanted).await.unwrap()[0].id, tagged.id);

        let bbox = BoundingBox::around(48.85, 2.35, 5.0);
        assert_eq!(repo.list_in_bounding_box(bbox).await.unwrap()[0].id, public.id);

        let stuck = repo
            .list_stuck_processing(Utc::now() + Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(stuck.len(), 2);
        assert!(repo
            .list_stuck_processing(now - Duration::hours(1))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_injected_delete_failure() {
        let repo = InMemoryFileRepository::new();
        let record = repo.insert(new_record("u1")).await.unwrap();
        repo.fail_delete_for(record.id);
        assert!(repo.delete(record.id).await.is_err());
        repo.clear_failures();
        assert!(repo.delete(record.id).await.unwrap());
    }
}
