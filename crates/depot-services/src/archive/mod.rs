mod service;

pub use service::{ArchiveRequest, ArchiveResult, ArchiveService};
