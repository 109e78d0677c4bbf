//! Folder ids and file naming.

use uuid::Uuid;

use crate::error::{StorageError, StorageResult};

/// Extension used when the original name carries none.
const FALLBACK_EXTENSION: &str = "bin";

/// Random, unguessable folder name for one upload.
pub fn new_folder_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Owner ids become part of file names, so they may not carry path syntax.
pub fn validate_owner_id(owner_id: &str) -> StorageResult<()> {
    if owner_id.is_empty() {
        return Err(StorageError::InvalidKey("Owner id cannot be empty".to_string()));
    }
    if owner_id.contains("..")
        || owner_id.contains('/')
        || owner_id.contains('\\')
        || owner_id.chars().any(char::is_control)
    {
        return Err(StorageError::InvalidKey(format!(
            "Owner id '{}' contains path characters",
            owner_id
        )));
    }
    Ok(())
}

fn clean_extension(ext: Option<&str>) -> String {
    ext.map(|e| e.trim().trim_start_matches('.').to_lowercase())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or_else(|| FALLBACK_EXTENSION.to_string())
}

/// `{ownerId}_{recordId}.{ext}`
pub fn stored_filename(owner_id: &str, record_id: Uuid, ext: Option<&str>) -> String {
    format!("{}_{}.{}", owner_id, record_id, clean_extension(ext))
}

/// Same convention as the original, with the derivative's extension.
pub fn derivative_filename(owner_id: &str, record_id: Uuid, derivative_ext: &str) -> String {
    stored_filename(owner_id, record_id, Some(derivative_ext))
}

/// Storage key of a file inside an upload folder.
pub fn folder_key(folder_id: &str, filename: &str) -> String {
    format!("{}/{}", folder_id, filename)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stored_filename_shape() {
        let id = Uuid::new_v4();
        assert_eq!(
            stored_filename("u1", id, Some("JPG")),
            format!("u1_{}.jpg", id)
        );
        assert_eq!(stored_filename("u1", id, None), format!("u1_{}.bin", id));
        assert_eq!(
            stored_filename("u1", id, Some("tar/../x")),
            format!("u1_{}.bin", id)
        );
        assert_eq!(
            derivative_filename("u1", id, "webp"),
            format!("u1_{}.webp", id)
        );
    }

    #[test]
    fn test_folder_ids_are_unique() {
        let a = new_folder_id();
        let b = new_folder_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 32);
        assert!(!a.contains('-'));
    }

    #[test]
    fn test_owner_id_validation() {
        assert!(validate_owner_id("u1").is_ok());
        assert!(validate_owner_id("alice@example.com").is_ok());
        assert!(validate_owner_id("").is_err());
        assert!(validate_owner_id("../root").is_err());
        assert!(validate_owner_id("a/b").is_err());
    }
}
