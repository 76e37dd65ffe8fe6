//! Database lifecycle and schema migrations.

use crate::error::DatabaseError;
use crate::{Error, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool};
use sqlx::{Sqlite, Transaction};
use std::path::Path;
use std::str::FromStr;

use super::Database;

/// Schema version written by the newest migration
const SCHEMA_VERSION: i64 = 1;

fn connection_failed(context: &str) -> impl FnOnce(sqlx::Error) -> Error + '_ {
    move |e| Error::Database(DatabaseError::ConnectionFailed(format!("{}: {}", context, e)))
}

fn migration_failed(context: &str) -> impl FnOnce(sqlx::Error) -> Error + '_ {
    move |e| Error::Database(DatabaseError::MigrationFailed(format!("{}: {}", context, e)))
}

impl Database {
    /// Open (or create) the index database at `path` and bring its schema up to date
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                Error::Database(DatabaseError::ConnectionFailed(format!(
                    "Failed to create database directory {}: {}",
                    parent.display(),
                    e
                )))
            })?;
        }

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(connection_failed("Failed to parse database path"))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(connection_failed("Failed to open duplicate index"))?;

        let db = Self { pool };
        db.migrate().await?;
        tracing::debug!(path = %path.display(), "Duplicate index ready");

        Ok(db)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(migration_failed("Failed to create schema_version table"))?;

        let current: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(version), 0) FROM schema_version")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| {
                    Error::Database(DatabaseError::QueryFailed(format!(
                        "Failed to read schema version: {}",
                        e
                    )))
                })?;

        if current >= SCHEMA_VERSION {
            return Ok(());
        }

        tracing::info!(from = current, to = SCHEMA_VERSION, "Migrating duplicate index");
        // dropping the transaction without commit rolls it back
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(migration_failed("Failed to begin migration"))?;
        if current < 1 {
            create_files_table(&mut tx).await?;
        }
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?, ?)")
            .bind(SCHEMA_VERSION)
            .bind(chrono::Utc::now().timestamp())
            .execute(&mut *tx)
            .await
            .map_err(migration_failed("Failed to record schema version"))?;
        tx.commit()
            .await
            .map_err(migration_failed("Failed to commit migration"))?;

        Ok(())
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// v1: one row per task that reached a terminal status
async fn create_files_table(tx: &mut Transaction<'_, Sqlite>) -> Result<()> {
    sqlx::query(
        "CREATE TABLE files (
            id INTEGER PRIMARY KEY,
            package_folder TEXT NOT NULL,
            name TEXT NOT NULL,
            plugin TEXT NOT NULL,
            status INTEGER NOT NULL,
            size INTEGER NOT NULL DEFAULT 0,
            updated_at INTEGER NOT NULL
        )",
    )
    .execute(&mut **tx)
    .await
    .map_err(migration_failed("Failed to create files table"))?;

    sqlx::query("CREATE INDEX idx_files_folder_name ON files(package_folder, name)")
        .execute(&mut **tx)
        .await
        .map_err(migration_failed("Failed to create files index"))?;

    Ok(())
}
