//! Domain types shared by every depot crate: file records, the access policy,
//! served-URL materialization, configuration and the error taxonomy.

pub mod access;
pub mod config;
pub mod constants;
pub mod error;
pub mod models;
pub mod urls;
pub mod validation;

pub use access::{can_download, can_modify, can_view, AccessPolicy};
pub use config::{CompressionConfig, DepotConfig};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use models::*;
pub use urls::{FileUrls, FileView, ServeTarget, UrlBuilder};
pub use validation::{UploadOptions, UploadOptionsInput};

pub type AppResult<T> = Result<T, AppError>;
