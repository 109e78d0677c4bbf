use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use depot_core::models::{CompressionInfo, Metadata, NewFileRecord, Requester};
use depot_core::{AppError, AppResult, FileView, UploadOptions, UploadOptionsInput};
use depot_processing::{extract_image_metadata, should_compress, CompressionJob};
use depot_storage::{new_folder_id, stored_filename, validate_owner_id};

use super::service::FileService;

/// An upload whose bytes are already persisted at `temp_path`.
#[derive(Debug, Clone)]
pub struct Upload {
    pub temp_path: PathBuf,
    pub original_name: String,
    pub mimetype: String,
    pub size: u64,
    pub options: UploadOptionsInput,
}

impl FileService {
    /// Stage raw bytes, then run [`FileService::upload`].
    pub async fn upload_bytes(
        &self,
        requester: &Requester,
        original_name: &str,
        mimetype: &str,
        data: &[u8],
        options: UploadOptionsInput,
    ) -> AppResult<FileView> {
        let temp_path = self.storage.stage_upload(data).await?;
        self.upload(
            requester,
            Upload {
                temp_path,
                original_name: original_name.to_string(),
                mimetype: mimetype.to_string(),
                size: data.len() as u64,
                options,
            },
        )
        .await
    }

    /// Organize an upload into its folder and record it.
    ///
    /// Returns once the bytes sit at `{folderId}/{ownerId}_{recordId}.{ext}`.
    /// Compression, when eligible, is dispatched detached and the returned view
    /// still reports `processing`. A failed move deletes the record again and
    /// discards the staged bytes.
    #[tracing::instrument(
        skip(self, requester, upload),
        fields(owner_id = %requester.id, mimetype = %upload.mimetype, size = upload.size)
    )]
    pub async fn upload(&self, requester: &Requester, upload: Upload) -> AppResult<FileView> {
        let start = Instant::now();

        let options = match self.check_upload(requester, &upload) {
            Ok(options) => options,
            Err(e) => {
                self.storage.discard_temp(&upload.temp_path).await;
                return Err(e);
            }
        };

        let folder_id = new_folder_id();
        if let Err(e) = self.storage.ensure_folder(&folder_id).await {
            self.storage.discard_temp(&upload.temp_path).await;
            return Err(e.into());
        }

        let eligible = options.enable_compression
            && should_compress(&upload.mimetype, upload.size, &self.config.compression);
        let size = upload.size as i64;
        let compression = if eligible {
            CompressionInfo::processing(size, Some(folder_id.clone()))
        } else {
            CompressionInfo::not_needed(size, Some(folder_id.clone()))
        };

        let metadata = if upload.mimetype.starts_with("image/") {
            image_metadata(&upload.temp_path).await
        } else {
            Metadata::default()
        };

        let record = self
            .repository
            .insert(NewFileRecord {
                original_name: upload.original_name.clone(),
                stored_filename: String::new(),
                storage_path: String::new(),
                mimetype: upload.mimetype.clone(),
                size,
                owner_id: requester.id.clone(),
                entity_id: options.entity_id,
                entity_type: options.entity_type,
                is_public: options.is_public,
                tags: options.tags,
                expires_at: options.expires_at,
                compression,
                metadata,
            })
            .await;
        let record = match record {
            Ok(record) => record,
            Err(e) => {
                self.storage.discard_temp(&upload.temp_path).await;
                self.remove_folder_quietly(&folder_id).await;
                return Err(e);
            }
        };

        let filename = stored_filename(&record.owner_id, record.id, record.extension().as_deref());
        let key = match self
            .storage
            .move_into_place(&upload.temp_path, &folder_id, &filename)
            .await
        {
            Ok(key) => key,
            Err(e) => {
                tracing::error!(
                    file_id = %record.id,
                    folder_id = %folder_id,
                    error = %e,
                    "Failed to move upload into place, rolling back record"
                );
                self.rollback(record.id, &upload.temp_path, &folder_id).await;
                return Err(e.into());
            }
        };

        let mut record = match self.repository.set_location(record.id, &filename, &key).await {
            Ok(record) => record,
            Err(e) => {
                tracing::error!(file_id = %record.id, error = %e, "Failed to record file location");
                if let Err(e) = self.storage.remove_file(&key).await {
                    tracing::warn!(key = %key, error = %e, "Failed to remove organized file");
                }
                self.rollback(record.id, &upload.temp_path, &folder_id).await;
                return Err(e);
            }
        };

        if eligible && !self.dispatcher.dispatch(CompressionJob::from_record(&record)) {
            let info = CompressionInfo::not_needed(size, Some(folder_id.clone()));
            if self.repository.complete_compression(record.id, &info).await? {
                record.compression = info;
            }
        }

        tracing::info!(
            file_id = %record.id,
            folder_id = %folder_id,
            storage_path = %record.storage_path,
            compression = %record.compression.status,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Upload stored"
        );

        Ok(self.view(record, requester))
    }

    fn check_upload(&self, requester: &Requester, upload: &Upload) -> AppResult<UploadOptions> {
        validate_owner_id(&requester.id)?;

        if upload.original_name.trim().is_empty() {
            return Err(AppError::validation("File name is required"));
        }
        if upload.mimetype.trim().is_empty() {
            return Err(AppError::validation("Content type is required"));
        }
        if upload.size > self.config.max_upload_size_bytes {
            return Err(AppError::validation(format!(
                "File too large: {} bytes exceeds the {} byte limit",
                upload.size, self.config.max_upload_size_bytes
            )));
        }

        UploadOptions::parse(&upload.options, Utc::now())
    }

    async fn rollback(&self, file_id: uuid::Uuid, temp_path: &Path, folder_id: &str) {
        match self.repository.delete(file_id).await {
            Ok(_) => tracing::debug!(file_id = %file_id, "Upload record rolled back"),
            Err(e) => {
                tracing::error!(file_id = %file_id, error = %e, "Failed to roll back upload record")
            }
        }
        self.storage.discard_temp(temp_path).await;
        self.remove_folder_quietly(folder_id).await;
    }

    async fn remove_folder_quietly(&self, folder_id: &str) {
        if let Err(e) = self.storage.remove_folder_if_empty(folder_id).await {
            tracing::warn!(folder_id = %folder_id, error = %e, "Failed to remove upload folder");
        }
    }
}

/// Dimensions, EXIF and GPS location. Failures only lose the enrichment.
async fn image_metadata(path: &Path) -> Metadata {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Could not read upload for metadata");
            return Metadata::default();
        }
    };

    match tokio::task::spawn_blocking(move || extract_image_metadata(&data)).await {
        Ok(Ok(extracted)) => Metadata {
            location: extracted.location,
            image: Some(extracted.image),
            ..Metadata::default()
        },
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Image metadata extraction failed");
            Metadata::default()
        }
        Err(e) => {
            tracing::warn!(error = %e, "Image metadata task failed");
            Metadata::default()
        }
    }
}
