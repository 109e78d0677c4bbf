use chrono::{DateTime, Utc};
use depot_core::models::CompressionInfo;
use depot_core::AppError;
use depot_db::FileRepository;
use depot_processing::{CompressionJob, CompressionPipeline};

/// Settle records left `processing` by a previous run.
///
/// Jobs abandoned at shutdown never report back, so their records would stay
/// `processing` forever. A record whose derivatives were both published is
/// promoted to `completed`; any other becomes `not_needed` and keeps serving
/// its original. Only records created before `created_before` are touched.
#[tracing::instrument(skip(repository, pipeline), fields(created_before = %created_before))]
pub async fn normalize_stuck_processing(
    repository: &dyn FileRepository,
    pipeline: &CompressionPipeline,
    created_before: DateTime<Utc>,
) -> Result<usize, AppError> {
    let stuck = repository.list_stuck_processing(created_before).await?;
    let mut normalized = 0;

    for record in &stuck {
        let info = match pipeline.recover(&CompressionJob::from_record(record)).await {
            Some(info) => {
                tracing::info!(file_id = %record.id, "Derivatives found, promoting to completed");
                info
            }
            None => CompressionInfo::not_needed(
                record.compression.original_size,
                record.compression.folder_id.clone(),
            ),
        };
        match repository.complete_compression(record.id, &info).await {
            Ok(true) => normalized += 1,
            Ok(false) => {
                tracing::debug!(file_id = %record.id, "Record left processing concurrently");
            }
            Err(e) => {
                tracing::warn!(file_id = %record.id, error = %e, "Failed to normalize stuck record");
            }
        }
    }

    tracing::info!(
        found = stuck.len(),
        normalized,
        "Stuck compression records normalized"
    );

    Ok(normalized)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use depot_core::models::{CompressionStatus, EntityType, FileRecord, Metadata};
    use depot_core::CompressionConfig;
    use depot_db::InMemoryFileRepository;
    use depot_storage::LocalStorage;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
    use std::collections::BTreeSet;
    use std::io::Cursor;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn pipeline(storage: &LocalStorage) -> CompressionPipeline {
        CompressionPipeline::new(storage.clone(), &CompressionConfig::default())
    }

    fn record(created_at: DateTime<Utc>, compression: CompressionInfo) -> FileRecord {
        FileRecord {
            id: Uuid::new_v4(),
            original_name: "scan.png".to_string(),
            stored_filename: "u1_x.png".to_string(),
            storage_path: "f1/u1_x.png".to_string(),
            mimetype: "image/png".to_string(),
            size: 2048,
            owner_id: "u1".to_string(),
            entity_id: None,
            entity_type: EntityType::Other,
            is_public: false,
            tags: BTreeSet::new(),
            expires_at: None,
            created_at,
            updated_at: created_at,
            compression,
            metadata: Metadata::default(),
        }
    }

    #[tokio::test]
    async fn test_only_old_processing_records_are_normalized() {
        let repo = InMemoryFileRepository::new();
        let now = Utc::now();
        let old = record(
            now - Duration::hours(2),
            CompressionInfo::processing(2048, Some("f1".into())),
        );
        let fresh = record(now, CompressionInfo::processing(2048, Some("f2".into())));
        let done = record(
            now - Duration::hours(3),
            CompressionInfo::not_needed(2048, Some("f3".into())),
        );
        for r in [&old, &fresh, &done] {
            repo.put(r.clone()).unwrap();
        }

        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        let cutoff = now - Duration::hours(1);
        let count = normalize_stuck_processing(&repo, &pipeline(&storage), cutoff)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let old = repo.get(old.id).await.unwrap().unwrap();
        assert_eq!(old.compression.status, CompressionStatus::NotNeeded);
        assert_eq!(old.compression.folder_id.as_deref(), Some("f1"));

        let fresh = repo.get(fresh.id).await.unwrap().unwrap();
        assert_eq!(fresh.compression.status, CompressionStatus::Processing);
    }

    #[tokio::test]
    async fn test_nothing_stuck() {
        let repo = InMemoryFileRepository::new();
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        assert_eq!(
            normalize_stuck_processing(&repo, &pipeline(&storage), Utc::now())
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_published_derivatives_are_promoted() {
        let dir = tempdir().unwrap();
        let storage = LocalStorage::new(dir.path()).await.unwrap();
        let pipeline = pipeline(&storage);
        let repo = InMemoryFileRepository::new();

        let img = DynamicImage::ImageRgb8(ImageBuffer::from_fn(64, 48, |x, y| {
            Rgb([x as u8, y as u8, 90])
        }));
        let mut data = Vec::new();
        img.write_to(&mut Cursor::new(&mut data), ImageFormat::Jpeg)
            .unwrap();

        let mut stuck = record(
            Utc::now() - Duration::hours(2),
            CompressionInfo::processing(data.len() as i64, Some("f1".into())),
        );
        stuck.mimetype = "image/jpeg".to_string();
        stuck.stored_filename = format!("u1_{}.jpg", stuck.id);
        let temp = storage.stage_upload(&data).await.unwrap();
        stuck.storage_path = storage
            .move_into_place(&temp, "f1", &stuck.stored_filename)
            .await
            .unwrap();
        repo.put(stuck.clone()).unwrap();

        // Derivatives published by a run that never reported back.
        let job = CompressionJob::from_record(&stuck);
        assert_eq!(pipeline.run(&job).await.status, CompressionStatus::Completed);

        let count = normalize_stuck_processing(&repo, &pipeline, Utc::now())
            .await
            .unwrap();
        assert_eq!(count, 1);

        let settled = repo.get(stuck.id).await.unwrap().unwrap();
        assert_eq!(settled.compression.status, CompressionStatus::Completed);
        assert!(settled.compression.compressed);
        assert_eq!(settled.compression.folder_id.as_deref(), Some("f1"));
        assert!(storage.exists(&stuck.storage_path).await.unwrap());
    }
}
