mod service;

pub use service::{CleanupService, FolderSweepReport};
