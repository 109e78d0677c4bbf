//! File operations: upload, read, list, update and delete.

mod layout;
mod metadata;
mod service;
mod upload;

pub(crate) use layout::{remove_stored_files, serve_key};
pub use metadata::{MetadataUpdate, NearbyFile};
pub use service::{FileService, FileServiceConfig, ServedFile};
pub use upload::Upload;
