//! Depot Storage Library
//!
//! On-disk layout for uploaded files. Every upload gets a random folder under
//! the storage root; the original and both derivatives live side by side in it:
//!
//! - original: `{folderId}/{ownerId}_{recordId}.{ext}`
//! - derivatives: `{folderId}/{ownerId}_{recordId}.png`, `{folderId}/{ownerId}_{recordId}.webp`
//!
//! Storage keys are paths relative to the root. Keys must not contain `..` or a
//! leading `/`. Names starting with `.` and the archive directory are never
//! treated as upload folders.

pub mod error;
pub mod keys;
pub mod local;

pub use error::{StorageError, StorageResult};
pub use keys::{
    derivative_filename, folder_key, new_folder_id, stored_filename, validate_owner_id,
};
pub use local::{ByteStream, LocalStorage, OpenedFile};
