//! Domain models for stored files.
//!
//! Records are plain data. Persistence lives behind the repository trait in
//! `depot-db`, and decisions (access, eligibility, result selection) live in
//! their own modules so they stay free of storage concerns.

pub mod compression;
pub mod file;
pub mod metadata;
pub mod requester;

pub use compression::{CompressionInfo, CompressionStatus, CompressionType};
pub use file::{EntityType, FileRecord, FileStats, NewFileRecord};
pub use metadata::{CustomMetadata, DeviceInfo, ExifData, ImageInfo, Location, Metadata};
pub use requester::{Requester, Role};
