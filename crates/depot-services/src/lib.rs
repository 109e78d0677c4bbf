//! Depot services layer
//!
//! Orchestration on top of storage, the metadata store and the compression
//! workers: uploads and reads ([`FileService`]), bulk archives
//! ([`ArchiveService`]) and the cleanup sweeper ([`CleanupService`]).
//! [`Depot`] wires all of them from a [`depot_core::DepotConfig`].

pub mod archive;
pub mod cleanup;
pub mod files;
pub mod setup;

pub use archive::{ArchiveRequest, ArchiveResult, ArchiveService};
pub use cleanup::{CleanupService, FolderSweepReport};
pub use files::{FileService, FileServiceConfig, MetadataUpdate, NearbyFile, ServedFile, Upload};
pub use setup::{open_repository, Depot};
