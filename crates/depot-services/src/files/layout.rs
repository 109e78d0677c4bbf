//! Where a record's bytes live on disk.

use depot_core::models::{CompressionType, FileRecord};
use depot_storage::{derivative_filename, folder_key, LocalStorage};

/// Storage key of one derivative, once compression completed.
pub(crate) fn derivative_key(record: &FileRecord, format: CompressionType) -> Option<String> {
    if !record.compression.is_completed() {
        return None;
    }
    let ext = format.extension()?;
    let folder = record.folder_id()?;
    Some(folder_key(
        folder,
        &derivative_filename(&record.owner_id, record.id, ext),
    ))
}

/// Key and content type behind the default serve URL: the primary derivative
/// when compression completed, the original otherwise.
pub(crate) fn serve_key(record: &FileRecord) -> (String, String) {
    if let Some(primary) = record.compression.primary() {
        if let (Some(key), Some(mime)) = (derivative_key(record, primary), primary.mime_type()) {
            return (key, mime.to_string());
        }
    }
    (record.storage_path.clone(), record.mimetype.clone())
}

/// Remove the original, both derivatives and the folder if it ends up empty.
/// Failures are logged and swallowed.
pub(crate) async fn remove_stored_files(storage: &LocalStorage, record: &FileRecord) {
    let mut keys = Vec::with_capacity(3);
    if !record.storage_path.is_empty() {
        keys.push(record.storage_path.clone());
    }
    if let Some(folder) = record.folder_id() {
        for format in [CompressionType::Png, CompressionType::Webp] {
            if let Some(ext) = format.extension() {
                let key = folder_key(folder, &derivative_filename(&record.owner_id, record.id, ext));
                if !keys.contains(&key) {
                    keys.push(key);
                }
            }
        }
    }

    for key in &keys {
        if let Err(e) = storage.remove_file(key).await {
            tracing::warn!(file_id = %record.id, key = %key, error = %e, "Failed to remove stored file");
        }
    }

    if let Some(folder) = record.folder_id() {
        if let Err(e) = storage.remove_folder_if_empty(folder).await {
            tracing::warn!(file_id = %record.id, folder_id = %folder, error = %e, "Failed to remove folder");
        }
    }
}
