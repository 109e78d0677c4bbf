use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProcessingError {
    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Failed to encode {format}: {message}")]
    Encode {
        format: &'static str,
        message: String,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] depot_storage::StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Derivative verification failed: {0}")]
    Verify(String),

    #[error("Invalid job: {0}")]
    InvalidJob(String),
}

impl From<ProcessingError> for depot_core::AppError {
    fn from(err: ProcessingError) -> Self {
        depot_core::AppError::Compression(err.to_string())
    }
}
