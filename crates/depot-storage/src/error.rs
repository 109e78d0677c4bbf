use depot_core::AppError;
use thiserror::Error;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Move failed: {0}")]
    MoveFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => AppError::NotFound(format!("File bytes missing: {}", key)),
            StorageError::InvalidKey(msg) => AppError::Validation(msg),
            StorageError::IoError(e) => AppError::from(e),
            other => AppError::Storage(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_stays_not_found() {
        let err: AppError = StorageError::NotFound("abc/u1_x.png".to_string()).into();
        assert!(matches!(err, AppError::NotFound(_)));

        let err: AppError = StorageError::MoveFailed("rename".to_string()).into();
        assert!(matches!(err, AppError::Storage(_)));
    }
}
