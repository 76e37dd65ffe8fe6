//! File records and duplicate detection queries.

use crate::error::DatabaseError;
use crate::types::{Status, TaskId};
use crate::{Error, Result};

use super::{Database, DuplicateRecord, FileRecord};

impl Database {
    /// Insert or update the record of a task's file
    pub async fn upsert_file(&self, record: &FileRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO files (id, package_folder, name, plugin, status, size, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                package_folder = excluded.package_folder,
                name = excluded.name,
                plugin = excluded.plugin,
                status = excluded.status,
                size = excluded.size,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(record.id.get())
        .bind(&record.package_folder)
        .bind(&record.name)
        .bind(&record.plugin)
        .bind(record.status.to_i32())
        .bind(record.size as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to record file: {}",
                e
            )))
        })?;

        Ok(())
    }

    /// Find a finished file with the same name in the same package folder
    ///
    /// The task's own record (`id`) is never reported.
    pub async fn find_finished_duplicate(
        &self,
        id: TaskId,
        folder: &str,
        name: &str,
    ) -> Result<Option<DuplicateRecord>> {
        let row = sqlx::query_as::<_, DuplicateRecord>(
            r#"
            SELECT id, plugin, name
            FROM files
            WHERE package_folder = ? AND name = ? AND id != ? AND status = ?
            LIMIT 1
            "#,
        )
        .bind(folder)
        .bind(name)
        .bind(id.get())
        .bind(Status::Finished.to_i32())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            Error::Database(DatabaseError::QueryFailed(format!(
                "Failed to find duplicate file: {}",
                e
            )))
        })?;

        Ok(row)
    }

    /// Status recorded for a task, if any
    pub async fn file_status(&self, id: TaskId) -> Result<Option<Status>> {
        let status: Option<i32> = sqlx::query_scalar("SELECT status FROM files WHERE id = ?")
            .bind(id.get())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                Error::Database(DatabaseError::QueryFailed(format!(
                    "Failed to read file status: {}",
                    e
                )))
            })?;

        Ok(status.map(Status::from_i32))
    }
}
