use std::sync::Arc;

use depot_core::access::{ensure_can_download, ensure_can_modify, ensure_can_view};
use depot_core::models::{CompressionType, EntityType, FileRecord, FileStats, Requester};
use depot_core::{AppError, AppResult, CompressionConfig, DepotConfig, FileView, UrlBuilder};
use depot_db::FileRepository;
use depot_storage::{LocalStorage, OpenedFile};
use depot_worker::CompressionDispatcher;
use uuid::Uuid;

use super::layout::{derivative_key, remove_stored_files, serve_key};

#[derive(Debug, Clone)]
pub struct FileServiceConfig {
    pub public_base_url: String,
    pub max_upload_size_bytes: u64,
    pub compression: CompressionConfig,
}

impl From<&DepotConfig> for FileServiceConfig {
    fn from(config: &DepotConfig) -> Self {
        Self {
            public_base_url: config.public_base_url.clone(),
            max_upload_size_bytes: config.max_upload_size_bytes,
            compression: config.compression.clone(),
        }
    }
}

/// Bytes resolved for a serve or download request.
#[derive(Debug)]
pub struct ServedFile {
    pub file_id: Uuid,
    /// Name to present to the client, with the extension of whatever is served.
    pub filename: String,
    pub mimetype: String,
    pub file: OpenedFile,
}

#[derive(Clone)]
pub struct FileService {
    pub(super) repository: Arc<dyn FileRepository>,
    pub(super) storage: LocalStorage,
    pub(super) dispatcher: CompressionDispatcher,
    pub(super) urls: UrlBuilder,
    pub(super) config: FileServiceConfig,
}

impl FileService {
    pub fn new(
        repository: Arc<dyn FileRepository>,
        storage: LocalStorage,
        dispatcher: CompressionDispatcher,
        config: FileServiceConfig,
    ) -> Self {
        Self {
            repository,
            storage,
            dispatcher,
            urls: UrlBuilder::new(config.public_base_url.clone()),
            config,
        }
    }

    pub fn url_builder(&self) -> &UrlBuilder {
        &self.urls
    }

    pub(super) async fn fetch(&self, id: Uuid) -> AppResult<FileRecord> {
        self.repository
            .get(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("File {} not found", id)))
    }

    pub(super) fn view(&self, record: FileRecord, requester: &Requester) -> FileView {
        FileView::new(&self.urls, record, requester)
    }

    pub(super) fn views(&self, records: Vec<FileRecord>, requester: &Requester) -> Vec<FileView> {
        records
            .into_iter()
            .map(|record| self.view(record, requester))
            .collect()
    }

    /// Single-record read: denial is an explicit authorization failure.
    #[tracing::instrument(skip(self, requester), fields(file_id = %id, requester_id = %requester.id))]
    pub async fn get(&self, id: Uuid, requester: &Requester) -> AppResult<FileView> {
        let record = self.fetch(id).await?;
        ensure_can_view(&record, requester)?;
        Ok(self.view(record, requester))
    }

    /// Bytes behind the default serve URL.
    #[tracing::instrument(skip(self, requester), fields(file_id = %id, requester_id = %requester.id))]
    pub async fn serve(&self, id: Uuid, requester: &Requester) -> AppResult<ServedFile> {
        let record = self.fetch(id).await?;
        ensure_can_view(&record, requester)?;
        self.open_served(&record).await
    }

    #[tracing::instrument(skip(self, requester), fields(file_id = %id, requester_id = %requester.id))]
    pub async fn download(&self, id: Uuid, requester: &Requester) -> AppResult<ServedFile> {
        let record = self.fetch(id).await?;
        ensure_can_download(&record, requester)?;
        self.open_served(&record).await
    }

    /// One specific derivative. Not found unless compression completed.
    #[tracing::instrument(skip(self, requester), fields(file_id = %id, format = %format))]
    pub async fn compressed(
        &self,
        id: Uuid,
        format: CompressionType,
        requester: &Requester,
    ) -> AppResult<ServedFile> {
        let record = self.fetch(id).await?;
        ensure_can_view(&record, requester)?;

        let key = derivative_key(&record, format).ok_or_else(|| {
            AppError::not_found(format!("No {} derivative for file {}", format, id))
        })?;
        let mimetype = format.mime_type().unwrap_or("application/octet-stream");
        let stem = std::path::Path::new(&record.original_name)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("file");
        let filename = match format.extension() {
            Some(ext) => format!("{}.{}", stem, ext),
            None => record.original_name.clone(),
        };

        Ok(ServedFile {
            file_id: record.id,
            filename,
            mimetype: mimetype.to_string(),
            file: self.storage.open(&key).await?,
        })
    }

    async fn open_served(&self, record: &FileRecord) -> AppResult<ServedFile> {
        let (key, mimetype) = serve_key(record);
        let file = self.storage.open(&key).await.map_err(|e| {
            tracing::warn!(file_id = %record.id, key = %key, error = %e, "Stored bytes unavailable");
            AppError::from(e)
        })?;

        Ok(ServedFile {
            file_id: record.id,
            filename: record.served_name(),
            mimetype,
            file,
        })
    }

    pub async fn list_by_owner(
        &self,
        owner_id: &str,
        requester: &Requester,
    ) -> AppResult<Vec<FileView>> {
        let records = self.repository.list_by_owner(owner_id).await?;
        Ok(self.views(records, requester))
    }

    pub async fn list_by_entity(
        &self,
        entity_type: EntityType,
        entity_id: &str,
        requester: &Requester,
    ) -> AppResult<Vec<FileView>> {
        let records = self.repository.list_by_entity(entity_type, entity_id).await?;
        Ok(self.views(records, requester))
    }

    pub async fn list_public(&self, requester: &Requester) -> AppResult<Vec<FileView>> {
        let records = self.repository.list_public().await?;
        Ok(self.views(records, requester))
    }

    /// Remove the bytes, both derivatives and the record.
    #[tracing::instrument(skip(self, requester), fields(file_id = %id, requester_id = %requester.id))]
    pub async fn delete(&self, id: Uuid, requester: &Requester) -> AppResult<()> {
        let record = self.fetch(id).await?;
        ensure_can_modify(&record, requester)?;

        remove_stored_files(&self.storage, &record).await;

        if !self.repository.delete(id).await? {
            return Err(AppError::not_found(format!("File {} not found", id)));
        }

        tracing::info!(file_id = %id, owner_id = %record.owner_id, "File deleted");
        Ok(())
    }

    /// Usage for one owner, or for everyone when `owner_id` is `None` (admins only).
    pub async fn stats(&self, owner_id: Option<&str>, requester: &Requester) -> AppResult<FileStats> {
        let records = match owner_id {
            Some(owner) => {
                if owner != requester.id && !requester.is_admin() {
                    return Err(AppError::authorization(
                        "Only the owner or an admin may read these statistics",
                    ));
                }
                self.repository.list_by_owner(owner).await?
            }
            None => {
                if !requester.is_admin() {
                    return Err(AppError::authorization(
                        "Only an admin may read global statistics",
                    ));
                }
                self.repository.list_all().await?
            }
        };

        let mut stats = FileStats::default();
        for record in &records {
            stats.add(record);
        }
        Ok(stats)
    }
}
