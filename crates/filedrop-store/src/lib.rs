//! Filedrop metadata store
//!
//! SQLite-backed implementation of the [`IMetadataStore`] port: files,
//! users, resumable sessions, the append-only audit log, and the
//! advisory reaper lease. The reserve path runs its quota check and
//! insert inside one immediate transaction so concurrent reservations
//! serialize on the database writer lock.
//!
//! [`IMetadataStore`]: filedrop_core::ports::IMetadataStore

mod pool;
mod repository;

pub use pool::DatabasePool;
pub use repository::SqliteMetadataStore;

use thiserror::Error;

/// Errors internal to the store adapter
///
/// These never cross the port boundary directly; they are mapped to
/// `CoreError::MetadataUnavailable` (or a more precise kind) before
/// leaving the crate.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to connect to database: {0}")]
    ConnectionFailed(String),

    #[error("Failed to run migrations: {0}")]
    MigrationFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Failed to serialize/deserialize data: {0}")]
    SerializationError(String),
}
