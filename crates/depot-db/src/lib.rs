//! Metadata store for file records.
//!
//! [`FileRepository`] carries every query shape the file layer needs. Two
//! implementations exist: [`PgFileRepository`] on PostgreSQL and
//! [`InMemoryFileRepository`] for tests and single-process deployments.

pub mod memory;
pub mod postgres;
pub mod query;
pub mod repository;

pub use memory::InMemoryFileRepository;
pub use postgres::{connect, PgFileRepository};
pub use query::BoundingBox;
pub use repository::FileRepository;
