//! Background compression of one upload.
//!
//! The pipeline never surfaces an error to its caller: every outcome is a
//! terminal [`CompressionInfo`], and failures are logged here.

use std::path::Path;
use std::time::Instant;

use chrono::Utc;
use depot_core::models::{CompressionInfo, CompressionStatus, FileRecord};
use depot_core::CompressionConfig;
use depot_storage::{derivative_filename, folder_key, LocalStorage};
use uuid::Uuid;

use crate::error::ProcessingError;
use crate::selection::select_primary;
use crate::transcode::ImageTranscoder;

/// Everything the pipeline needs to know about one upload.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionJob {
    pub file_id: Uuid,
    pub owner_id: String,
    pub folder_id: Option<String>,
    /// Storage key of the original bytes.
    pub storage_path: String,
    pub original_size: i64,
}

impl CompressionJob {
    pub fn from_record(record: &FileRecord) -> Self {
        Self {
            file_id: record.id,
            owner_id: record.owner_id.clone(),
            folder_id: record.folder_id().map(str::to_string),
            storage_path: record.storage_path.clone(),
            original_size: record.size,
        }
    }

    /// The job's folder, or the folder holding the original when none was recorded.
    fn resolve_folder(&self) -> Result<String, ProcessingError> {
        if let Some(folder) = &self.folder_id {
            return Ok(folder.clone());
        }
        Path::new(&self.storage_path)
            .parent()
            .and_then(|p| p.to_str())
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                ProcessingError::InvalidJob(format!(
                    "File {} has no folder to place derivatives in",
                    self.file_id
                ))
            })
    }

    fn derivative_keys(&self, folder_id: &str) -> (String, String) {
        let key = |ext: &str| {
            folder_key(
                folder_id,
                &derivative_filename(&self.owner_id, self.file_id, ext),
            )
        };
        (key("png"), key("webp"))
    }

    fn failed(&self) -> CompressionInfo {
        CompressionInfo {
            status: CompressionStatus::Failed,
            ..CompressionInfo::processing(self.original_size, self.folder_id.clone())
        }
    }
}

fn completed_info(
    original_size: u64,
    folder_id: String,
    png_size: u64,
    webp_size: u64,
) -> CompressionInfo {
    let selection = select_primary(original_size, png_size, webp_size);
    CompressionInfo {
        status: CompressionStatus::Completed,
        compressed: true,
        original_size: original_size as i64,
        compressed_size: Some(selection.chosen_size as i64),
        savings_percentage: Some(selection.savings_percentage),
        compression_type: selection.compression_type,
        folder_id: Some(folder_id),
        png_size: Some(png_size as i64),
        webp_size: Some(webp_size as i64),
        completed_at: Some(Utc::now()),
    }
}

#[derive(Debug, Clone)]
pub struct CompressionPipeline {
    storage: LocalStorage,
    transcoder: ImageTranscoder,
}

impl CompressionPipeline {
    pub fn new(storage: LocalStorage, config: &CompressionConfig) -> Self {
        Self {
            storage,
            transcoder: ImageTranscoder::new(config),
        }
    }

    /// Run the job to a terminal state. Errors become `failed`, keeping the folder id.
    /// The original is left in place; see [`CompressionPipeline::release_original`].
    #[tracing::instrument(skip(self, job), fields(file_id = %job.file_id))]
    pub async fn run(&self, job: &CompressionJob) -> CompressionInfo {
        let start = Instant::now();
        match self.try_run(job).await {
            Ok(info) => {
                tracing::info!(
                    file_id = %job.file_id,
                    compression_type = %info.compression_type,
                    original_size = info.original_size,
                    compressed_size = info.compressed_size.unwrap_or_default(),
                    savings_percentage = info.savings_percentage.unwrap_or_default(),
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Compression completed"
                );
                info
            }
            Err(e) => {
                tracing::error!(
                    file_id = %job.file_id,
                    error = %e,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Compression failed"
                );
                job.failed()
            }
        }
    }

    pub async fn try_run(&self, job: &CompressionJob) -> Result<CompressionInfo, ProcessingError> {
        let folder_id = job.resolve_folder()?;
        let data = self.storage.read(&job.storage_path).await?;
        let original_size = if job.original_size > 0 {
            job.original_size as u64
        } else {
            data.len() as u64
        };

        let encoded = self.transcoder.transcode(data).await?;

        let (png_key, webp_key) = job.derivative_keys(&folder_id);

        self.write_derivatives(job, &png_key, &encoded.png, &webp_key, &encoded.webp)
            .await?;

        let png_size = self.storage.size(&png_key).await?;
        let webp_size = self.storage.size(&webp_key).await?;
        if png_size != encoded.png.len() as u64 || webp_size != encoded.webp.len() as u64 {
            return Err(ProcessingError::Verify(format!(
                "expected {}/{} bytes, found {}/{}",
                encoded.png.len(),
                encoded.webp.len(),
                png_size,
                webp_size
            )));
        }

        Ok(completed_info(original_size, folder_id, png_size, webp_size))
    }

    /// Delete the original once its `completed` status is stored.
    ///
    /// Until then the original is the only bytes a `not_needed` or
    /// `processing` record can serve, so callers must not release earlier.
    #[tracing::instrument(skip(self, job), fields(file_id = %job.file_id))]
    pub async fn release_original(&self, job: &CompressionJob) {
        let Ok(folder_id) = job.resolve_folder() else {
            return;
        };
        // Organizing may already have put the original exactly where a derivative lives.
        let (png_key, webp_key) = job.derivative_keys(&folder_id);
        if job.storage_path == png_key || job.storage_path == webp_key {
            return;
        }
        if let Err(e) = self.storage.remove_file(&job.storage_path).await {
            tracing::warn!(
                file_id = %job.file_id,
                key = %job.storage_path,
                error = %e,
                "Failed to remove original after compression"
            );
        }
        if let Err(e) = self.storage.remove_folder_if_empty(&folder_id).await {
            tracing::warn!(folder_id = %folder_id, error = %e, "Folder cleanup failed");
        }
    }

    /// Rebuild the `completed` status of a job whose derivatives were both
    /// published but whose status never reached the store.
    pub async fn recover(&self, job: &CompressionJob) -> Option<CompressionInfo> {
        let folder_id = job.resolve_folder().ok()?;
        let (png_key, webp_key) = job.derivative_keys(&folder_id);
        let png_size = self.storage.size(&png_key).await.ok()?;
        let webp_size = self.storage.size(&webp_key).await.ok()?;
        if png_size == 0 || webp_size == 0 {
            return None;
        }
        Some(completed_info(
            job.original_size.max(0) as u64,
            folder_id,
            png_size,
            webp_size,
        ))
    }

    /// Write both derivatives to partial files concurrently, then publish both.
    /// On any failure nothing half-written is left behind.
    async fn write_derivatives(
        &self,
        job: &CompressionJob,
        png_key: &str,
        png: &[u8],
        webp_key: &str,
        webp: &[u8],
    ) -> Result<(), ProcessingError> {
        let written = tokio::try_join!(
            self.storage.write_partial(png_key, png),
            self.storage.write_partial(webp_key, webp),
        );
        if let Err(e) = written {
            self.discard_partials(&[png_key, webp_key]).await;
            return Err(e.into());
        }

        for (index, key) in [png_key, webp_key].into_iter().enumerate() {
            if let Err(e) = self.storage.commit_partial(key).await {
                self.discard_partials(&[png_key, webp_key]).await;
                // Roll back anything already published, but never the original's own path.
                for committed in [png_key, webp_key].into_iter().take(index) {
                    if committed == job.storage_path {
                        continue;
                    }
                    if let Err(e) = self.storage.remove_file(committed).await {
                        tracing::warn!(key = %committed, error = %e, "Failed to roll back derivative");
                    }
                }
                return Err(e.into());
            }
        }

        Ok(())
    }

    async fn discard_partials(&self, keys: &[&str]) {
        for key in keys {
            if let Ok(path) = self.storage.partial_path(key) {
                self.storage.discard_temp(&path).await;
            }
        }
    }
}
