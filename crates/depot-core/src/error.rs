//! Error types module
//!
//! All failures surfaced by the file layer are unified under [`AppError`]. The
//! four domain kinds callers branch on are `Validation`, `NotFound`,
//! `Authorization` and `Compression`; the remaining variants carry
//! infrastructure failures (storage, database, internal).
//!
//! The `Database` variant wraps `sqlx::Error` when the `sqlx` feature is on and
//! falls back to a plain message otherwise.

use std::io;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Expected errors like validation failures
    Debug,
    /// Recoverable issues
    Warn,
    /// Unexpected failures
    Error,
}

/// Describes how an error is presented to a caller.
pub trait ErrorMetadata {
    /// HTTP-equivalent status code
    fn http_status_code(&self) -> u16;

    /// Stable machine-readable error code (e.g. "NOT_FOUND")
    fn error_code(&self) -> &'static str;

    /// Whether retrying the same operation may succeed
    fn is_recoverable(&self) -> bool;

    /// Client-facing message (may differ from the internal message)
    fn client_message(&self) -> String;

    /// Whether details should be hidden from clients
    fn is_sensitive(&self) -> bool;

    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not authorized: {0}")]
    Authorization(String),

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[source] SqlxError),

    #[cfg(not(feature = "sqlx"))]
    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        AppError::NotFound(msg.into())
    }

    pub fn authorization(msg: impl Into<String>) -> Self {
        AppError::Authorization(msg.into())
    }

    /// Archive and transcode failures share one generic message towards callers.
    pub fn compression(msg: impl Into<String>) -> Self {
        AppError::Compression(msg.into())
    }

    /// Get the error type name for detailed error responses
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "ValidationError",
            AppError::NotFound(_) => "NotFoundError",
            AppError::Authorization(_) => "AuthorizationError",
            AppError::Compression(_) => "CompressionError",
            AppError::Storage(_) => "StorageError",
            AppError::Database(_) => "DatabaseError",
            AppError::Internal(_) | AppError::InternalWithSource { .. } => "InternalError",
        }
    }

    /// Get detailed error information including the source chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        match err {
            SqlxError::RowNotFound => AppError::NotFound("Record not found".to_string()),
            other => AppError::Database(other),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => AppError::NotFound(format!("File bytes missing: {}", err)),
            _ => AppError::Storage(format!("IO error: {}", err)),
        }
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Validation(format!("JSON parsing error: {}", err))
    }
}

impl From<uuid::Error> for AppError {
    fn from(err: uuid::Error) -> Self {
        AppError::Validation(format!("UUID parsing error: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::Validation(err.to_string())
    }
}

/// Static metadata per variant: (http_status, error_code, recoverable, sensitive, log_level).
fn app_error_static_metadata(err: &AppError) -> (u16, &'static str, bool, bool, LogLevel) {
    match err {
        AppError::Validation(_) => (400, "VALIDATION_ERROR", false, false, LogLevel::Debug),
        AppError::NotFound(_) => (404, "NOT_FOUND", false, false, LogLevel::Debug),
        AppError::Authorization(_) => (403, "AUTHORIZATION_ERROR", false, false, LogLevel::Debug),
        AppError::Compression(_) => (500, "COMPRESSION_ERROR", true, true, LogLevel::Error),
        AppError::Storage(_) => (500, "STORAGE_ERROR", true, true, LogLevel::Error),
        AppError::Database(_) => (500, "DATABASE_ERROR", true, true, LogLevel::Error),
        AppError::Internal(_) | AppError::InternalWithSource { .. } => {
            (500, "INTERNAL_ERROR", true, true, LogLevel::Error)
        }
    }
}

impl ErrorMetadata for AppError {
    fn http_status_code(&self) -> u16 {
        app_error_static_metadata(self).0
    }

    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).1
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).2
    }

    fn is_sensitive(&self) -> bool {
        app_error_static_metadata(self).3
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).4
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Validation(ref msg) => msg.clone(),
            AppError::NotFound(ref msg) => msg.clone(),
            AppError::Authorization(ref msg) => msg.clone(),
            AppError::Compression(_) => "Failed to compress files".to_string(),
            AppError::Storage(_) => "Failed to access storage".to_string(),
            AppError::Database(_) => "Failed to access database".to_string(),
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                "Internal server error".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metadata_not_found() {
        let err = AppError::NotFound("File not found".to_string());
        assert_eq!(err.http_status_code(), 404);
        assert_eq!(err.error_code(), "NOT_FOUND");
        assert!(!err.is_recoverable());
        assert_eq!(err.client_message(), "File not found");
        assert!(!err.is_sensitive());
        assert_eq!(err.log_level(), LogLevel::Debug);
    }

    #[test]
    fn test_error_metadata_authorization() {
        let err = AppError::authorization("Access denied");
        assert_eq!(err.http_status_code(), 403);
        assert_eq!(err.error_code(), "AUTHORIZATION_ERROR");
        assert_eq!(err.error_type(), "AuthorizationError");
        assert_eq!(err.client_message(), "Access denied");
    }

    #[test]
    fn test_compression_error_hides_details() {
        let err = AppError::compression("zip writer failed at entry 3: disk full");
        assert_eq!(err.error_code(), "COMPRESSION_ERROR");
        assert!(err.is_sensitive());
        assert_eq!(err.client_message(), "Failed to compress files");
    }

    #[test]
    fn test_io_not_found_maps_to_not_found() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "gone");
        assert!(matches!(AppError::from(io_err), AppError::NotFound(_)));

        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(AppError::from(io_err), AppError::Storage(_)));
    }

    #[test]
    fn test_detailed_message_includes_source() {
        let err = AppError::from(anyhow::anyhow!("root cause").context("outer"));
        let details = err.detailed_message();
        assert!(details.starts_with("Internal error with source"));
        assert!(details.contains("Caused by: outer"));
    }
}
