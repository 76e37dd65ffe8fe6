//! Database layer for hoster-dl
//!
//! Persists the file index used for cross-session duplicate detection.
//!
//! ## Submodules
//!
//! Methods on [`Database`] are organized by domain:
//! - [`migrations`]: Database lifecycle, schema migrations
//! - [`duplicates`]: File records and duplicate lookup

use crate::Result;
use crate::types::{Status, TaskId};
use async_trait::async_trait;
use sqlx::{FromRow, sqlite::SqlitePool};

mod duplicates;
mod migrations;

/// File record written when a task reaches a terminal state
#[derive(Debug, Clone)]
pub struct FileRecord {
    /// Task identifier
    pub id: TaskId,
    /// Package folder the file belongs to
    pub package_folder: String,
    /// File name
    pub name: String,
    /// Plugin that handled the task
    pub plugin: String,
    /// Final status
    pub status: Status,
    /// Size in bytes
    pub size: u64,
}

/// Earlier file that conflicts with a task
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct DuplicateRecord {
    /// Task identifier of the earlier file
    pub id: i64,
    /// Plugin that produced it
    pub plugin: String,
    /// File name
    pub name: String,
}

/// Persistent duplicate index covering files from past sessions
///
/// Distinct from the live [`TaskRegistry`](crate::registry::TaskRegistry): the
/// index only knows about files that reached a terminal state.
#[async_trait]
pub trait DuplicateIndex: Send + Sync {
    /// Find a finished file with the same name in the same folder, other than `id`
    async fn find_duplicates(
        &self,
        id: TaskId,
        folder: &str,
        name: &str,
    ) -> Result<Option<DuplicateRecord>>;

    /// Insert or update the record of a task
    async fn record_file(&self, record: &FileRecord) -> Result<()>;
}

/// Database handle for hoster-dl
pub struct Database {
    pool: SqlitePool,
}

#[async_trait]
impl DuplicateIndex for Database {
    async fn find_duplicates(
        &self,
        id: TaskId,
        folder: &str,
        name: &str,
    ) -> Result<Option<DuplicateRecord>> {
        self.find_finished_duplicate(id, folder, name).await
    }

    async fn record_file(&self, record: &FileRecord) -> Result<()> {
        self.upsert_file(record).await
    }
}
