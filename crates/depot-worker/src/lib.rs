//! Background compression workers.
//!
//! Compression runs detached from the upload that triggered it. Each job
//! publishes its terminal status on a status channel; a single recorder task
//! drains the channel into the repository, writing each record at most once.

pub mod dispatcher;
pub mod maintenance;
pub mod status;

pub use dispatcher::{CompressionDispatcher, DispatcherConfig, DrainReport};
pub use maintenance::normalize_stuck_processing;
pub use status::StatusUpdate;
