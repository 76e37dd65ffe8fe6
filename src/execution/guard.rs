//! Duplicate Guard
//!
//! Keeps two tasks from producing the same file. Three sources are consulted:
//! live siblings in the [`TaskRegistry`](crate::registry::TaskRegistry), a local file
//! left by an earlier run, and the persistent [`DuplicateIndex`](crate::db::DuplicateIndex).

use super::PluginExecution;
use crate::signal::{Outcome, Signal, SkipInfo};
use crate::task::Task;
use crate::types::{Event, Status, TaskId};

pub(super) fn skip_for(conflict: &Task) -> Signal {
    Signal::Skip(SkipInfo::Task {
        plugin: conflict.plugin().to_string(),
        id: conflict.id(),
    })
}

impl PluginExecution {
    /// Skip if the same file was or is being downloaded within the same package
    ///
    /// `starting` marks the check right before the transfer; waiting and starting
    /// siblings only count then. Call it early (before content is fetched) to avoid
    /// needless work; [`download`](Self::download) always re-checks atomically.
    pub async fn check_for_same_files(&self, starting: bool) -> Outcome<()> {
        if let Some(conflict) = self.registry.find_conflict(&self.task, starting).await {
            return Err(skip_for(&conflict));
        }
        self.check_existing_files(starting).await
    }

    /// Start-of-transfer guard
    ///
    /// Runs the same checks as `check_for_same_files(true)`, then repeats the sibling
    /// scan atomically with the transition to [`Status::Downloading`].
    pub(crate) async fn claim_download(&self) -> Outcome<()> {
        self.check_for_same_files(true).await?;

        if let Err(conflict) = self.registry.claim_download(&self.task).await {
            return Err(skip_for(&conflict));
        }
        self.emit_event(Event::StatusChanged {
            id: self.task.id(),
            status: Status::Downloading,
        });
        Ok(())
    }

    /// Local file and persistent index checks
    async fn check_existing_files(&self, starting: bool) -> Outcome<()> {
        let name = self.task.name().await;
        let location = self.file_path(&name);
        let exists = tokio::fs::try_exists(&location).await.unwrap_or(false);

        if starting
            && self.config.download.skip_existing
            && let Ok(meta) = tokio::fs::metadata(&location).await
            && meta.len() >= self.task.size()
        {
            return Err(Signal::Skip(SkipInfo::FileExists));
        }

        let Some(index) = &self.index else {
            return Ok(());
        };
        let folder = &self.task.package().folder;
        match index.find_duplicates(self.task.id(), folder, &name).await {
            Ok(Some(record)) if exists => Err(Signal::Skip(SkipInfo::Record {
                plugin: record.plugin,
                id: TaskId(record.id),
            })),
            Ok(Some(_)) => {
                tracing::debug!(
                    task_id = %self.task.id(),
                    name = %name,
                    "File recorded as duplicate but not present, not skipped"
                );
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => {
                tracing::warn!(
                    task_id = %self.task.id(),
                    error = %e,
                    "Duplicate index lookup failed, continuing"
                );
                Ok(())
            }
        }
    }
}
