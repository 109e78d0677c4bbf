use std::path::{Component, Path, PathBuf};
use std::pin::Pin;
use std::time::Instant;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::{StorageError, StorageResult};
use crate::keys::folder_key;

/// Staging area for uploads whose record id is not known yet.
const STAGING_DIR: &str = ".incoming";

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, StorageError>> + Send>>;

/// An open file ready to be streamed to a client.
pub struct OpenedFile {
    pub path: PathBuf,
    pub size: u64,
    pub stream: ByteStream,
}

impl std::fmt::Debug for OpenedFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedFile")
            .field("path", &self.path)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

/// Local filesystem layout rooted at an injected storage root.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    /// Top-level names that are never upload folders (e.g. the archive directory).
    reserved: Vec<String>,
}

impl LocalStorage {
    /// Create the storage root (and its staging area) if missing.
    pub async fn new(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();

        fs::create_dir_all(root.join(STAGING_DIR)).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                root.display(),
                e
            ))
        })?;

        Ok(LocalStorage {
            root,
            reserved: Vec::new(),
        })
    }

    /// Exclude a top-level directory from folder listing and sweeping.
    pub fn with_reserved_dir(mut self, name: impl Into<String>) -> Self {
        self.reserved.push(name.into());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Convert a storage key to a path under the root.
    ///
    /// Only plain relative components are accepted, so a key can never
    /// resolve outside the root.
    pub fn key_to_path(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty() || key.contains("..") || key.starts_with('/') || key.contains('\\') {
            return Err(StorageError::InvalidKey(format!(
                "Storage key '{}' contains invalid characters",
                key
            )));
        }

        let relative = Path::new(key);
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
        {
            return Err(StorageError::InvalidKey(format!(
                "Storage key '{}' resolves outside storage directory",
                key
            )));
        }

        Ok(self.root.join(relative))
    }

    pub fn folder_path(&self, folder_id: &str) -> StorageResult<PathBuf> {
        if folder_id.contains('/') {
            return Err(StorageError::InvalidKey(format!(
                "Folder id '{}' must be a single path component",
                folder_id
            )));
        }
        self.key_to_path(folder_id)
    }

    fn is_reserved(&self, name: &str) -> bool {
        name.starts_with('.') || self.reserved.iter().any(|r| r == name)
    }

    /// Persist raw upload bytes to a temporary path inside the staging area.
    pub async fn stage_upload(&self, data: &[u8]) -> StorageResult<PathBuf> {
        let path = self
            .root
            .join(STAGING_DIR)
            .join(format!("{}.upload", Uuid::new_v4().simple()));

        fs::create_dir_all(self.root.join(STAGING_DIR)).await?;

        let mut file = fs::File::create(&path).await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to create file {}: {}", path.display(), e))
        })?;
        file.write_all(data).await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to write file {}: {}", path.display(), e))
        })?;
        file.sync_all().await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to sync file {}: {}", path.display(), e))
        })?;

        tracing::debug!(path = %path.display(), size_bytes = data.len(), "Upload staged");
        Ok(path)
    }

    /// Create the folder if absent. Idempotent.
    pub async fn ensure_folder(&self, folder_id: &str) -> StorageResult<PathBuf> {
        let path = self.folder_path(folder_id)?;
        fs::create_dir_all(&path).await.map_err(|e| {
            StorageError::WriteFailed(format!(
                "Failed to create folder {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(path)
    }

    /// Move `temp` into `{folder_id}/{filename}` and return the new storage key.
    ///
    /// A same-device rename is atomic. Across devices the bytes are copied to a
    /// partial file, renamed into place, and only then is the source removed, so
    /// at no point are both the old and the new path missing.
    pub async fn move_into_place(
        &self,
        temp: &Path,
        folder_id: &str,
        filename: &str,
    ) -> StorageResult<String> {
        if filename.contains('/') || filename.contains("..") {
            return Err(StorageError::InvalidKey(format!(
                "Invalid file name '{}'",
                filename
            )));
        }

        let key = folder_key(folder_id, filename);
        let dest = self.key_to_path(&key)?;
        let start = Instant::now();

        self.ensure_folder(folder_id).await?;

        if let Err(rename_err) = fs::rename(temp, &dest).await {
            if !fs::try_exists(temp).await.unwrap_or(false) {
                return Err(StorageError::MoveFailed(format!(
                    "Failed to move {} to {}: {}",
                    temp.display(),
                    dest.display(),
                    rename_err
                )));
            }

            tracing::debug!(
                from = %temp.display(),
                to = %dest.display(),
                error = %rename_err,
                "Rename failed, falling back to copy"
            );

            let partial = dest.with_extension(format!(
                "{}.partial",
                dest.extension().and_then(|e| e.to_str()).unwrap_or("")
            ));
            if let Err(e) = fs::copy(temp, &partial).await {
                if let Err(cleanup) = fs::remove_file(&partial).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!(path = %partial.display(), error = %cleanup, "Failed to remove partial copy");
                    }
                }
                return Err(StorageError::MoveFailed(format!(
                    "Failed to copy {} to {}: {}",
                    temp.display(),
                    partial.display(),
                    e
                )));
            }
            fs::rename(&partial, &dest).await.map_err(|e| {
                StorageError::MoveFailed(format!(
                    "Failed to move {} to {}: {}",
                    partial.display(),
                    dest.display(),
                    e
                ))
            })?;
            if let Err(e) = fs::remove_file(temp).await {
                tracing::warn!(
                    path = %temp.display(),
                    error = %e,
                    "Failed to remove source after copy"
                );
            }
        }

        tracing::info!(
            key = %key,
            folder_id = %folder_id,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "File moved into place"
        );

        Ok(key)
    }

    /// Sibling path a key is written to before it is committed.
    pub fn partial_path(&self, key: &str) -> StorageResult<PathBuf> {
        let path = self.key_to_path(key)?;
        let mut name = path.as_os_str().to_owned();
        name.push(format!(".{}", depot_core::constants::PARTIAL_SUFFIX));
        Ok(PathBuf::from(name))
    }

    /// Write bytes next to `key` without making them visible under it yet.
    pub async fn write_partial(&self, key: &str, data: &[u8]) -> StorageResult<PathBuf> {
        let partial = self.partial_path(key)?;
        if let Some(parent) = partial.parent() {
            fs::create_dir_all(parent).await?;
        }

        let mut file = fs::File::create(&partial).await.map_err(|e| {
            StorageError::WriteFailed(format!(
                "Failed to create file {}: {}",
                partial.display(),
                e
            ))
        })?;
        file.write_all(data).await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to write file {}: {}", partial.display(), e))
        })?;
        file.sync_all().await.map_err(|e| {
            StorageError::WriteFailed(format!("Failed to sync file {}: {}", partial.display(), e))
        })?;

        Ok(partial)
    }

    /// Atomically publish a partial written by [`write_partial`](Self::write_partial).
    pub async fn commit_partial(&self, key: &str) -> StorageResult<()> {
        let partial = self.partial_path(key)?;
        let dest = self.key_to_path(key)?;
        fs::rename(&partial, &dest).await.map_err(|e| {
            StorageError::MoveFailed(format!(
                "Failed to commit {} to {}: {}",
                partial.display(),
                dest.display(),
                e
            ))
        })
    }

    /// Best-effort removal of a temporary path outside the key space.
    pub async fn discard_temp(&self, temp: &Path) {
        match fs::remove_file(temp).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %temp.display(), error = %e, "Failed to remove temp file")
            }
        }
    }

    pub async fn exists(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(key)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }

    pub async fn size(&self, key: &str) -> StorageResult<u64> {
        let path = self.key_to_path(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::ReadFailed(format!(
                "Failed to stat {}: {}",
                path.display(),
                e
            ))),
        }
    }

    pub async fn read(&self, key: &str) -> StorageResult<Vec<u8>> {
        let path = self.key_to_path(key)?;
        match fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => Err(StorageError::ReadFailed(format!(
                "Failed to read file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Open a file for streaming.
    pub async fn open(&self, key: &str) -> StorageResult<OpenedFile> {
        let path = self.key_to_path(key)?;

        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StorageError::NotFound(key.to_string()))
            }
            Err(e) => {
                return Err(StorageError::ReadFailed(format!(
                    "Failed to open file {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        let size = file.metadata().await?.len();

        let key_owned = key.to_string();
        let stream = tokio_util::io::ReaderStream::new(file).map(move |chunk| {
            chunk.map_err(|e| {
                tracing::error!(key = %key_owned, error = %e, "Stream read error");
                StorageError::ReadFailed(format!("Failed to read chunk: {}", e))
            })
        });

        Ok(OpenedFile {
            path,
            size,
            stream: Box::pin(stream),
        })
    }

    /// Delete a file. Returns `false` if it was already gone.
    pub async fn remove_file(&self, key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => {
                tracing::debug!(key = %key, "File removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::DeleteFailed(format!(
                "Failed to delete file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Point-in-time emptiness check.
    pub async fn is_folder_empty(&self, folder_id: &str) -> StorageResult<bool> {
        let path = self.folder_path(folder_id)?;
        let mut entries = fs::read_dir(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StorageError::NotFound(folder_id.to_string())
            } else {
                StorageError::ReadFailed(format!("Failed to read {}: {}", path.display(), e))
            }
        })?;
        Ok(entries.next_entry().await?.is_none())
    }

    /// Remove the folder if it has no entries right now.
    ///
    /// `remove_dir` refuses non-empty directories, so a writer that lands a file
    /// between the check and the removal keeps its folder.
    pub async fn remove_folder_if_empty(&self, folder_id: &str) -> StorageResult<bool> {
        match self.is_folder_empty(folder_id).await {
            Ok(true) => {}
            Ok(false) | Err(StorageError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        }

        let path = self.folder_path(folder_id)?;
        match fs::remove_dir(&path).await {
            Ok(()) => {
                tracing::debug!(folder_id = %folder_id, "Empty folder removed");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => {
                if matches!(self.is_folder_empty(folder_id).await, Ok(false)) {
                    return Ok(false);
                }
                Err(StorageError::DeleteFailed(format!(
                    "Failed to remove folder {}: {}",
                    path.display(),
                    e
                )))
            }
        }
    }

    /// Top-level upload folders, excluding hidden and reserved directories.
    pub async fn list_folders(&self) -> StorageResult<Vec<String>> {
        let mut folders = Vec::new();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if self.is_reserved(&name) {
                continue;
            }
            folders.push(name);
        }
        folders.sort();
        Ok(folders)
    }
}
