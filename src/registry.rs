//! Live registry of known tasks
//!
//! The registry is the only shared view of sibling tasks. Sibling scans and the
//! transition to [`Status::Downloading`] happen under one lock in
//! [`TaskRegistry::claim_download`], so at most one task per (package folder, name)
//! is ever downloading.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::task::Task;
use crate::types::{Status, TaskId};

/// Whether a sibling in `status` makes the current task redundant
///
/// Finished and downloading siblings always win. Waiting and starting siblings only
/// count when the current task is about to start its transfer.
fn sibling_conflicts(status: Status, starting: bool) -> bool {
    match status {
        Status::Finished | Status::Downloading => true,
        Status::Waiting | Status::Starting => starting,
        _ => false,
    }
}

/// Shared registry of all known tasks (cloneable, Arc-wrapped)
#[derive(Clone, Default)]
pub struct TaskRegistry {
    tasks: Arc<Mutex<HashMap<TaskId, Task>>>,
}

impl TaskRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a task (replaces a previous handle with the same id)
    pub async fn insert(&self, task: Task) {
        self.tasks.lock().await.insert(task.id(), task);
    }

    /// Add a task unless its id is already known
    pub async fn register(&self, task: &Task) {
        self.tasks
            .lock()
            .await
            .entry(task.id())
            .or_insert_with(|| task.clone());
    }

    /// Remove a task
    pub async fn remove(&self, id: TaskId) -> Option<Task> {
        self.tasks.lock().await.remove(&id)
    }

    /// Look up a task
    pub async fn get(&self, id: TaskId) -> Option<Task> {
        self.tasks.lock().await.get(&id).cloned()
    }

    /// Number of known tasks
    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Whether the registry is empty
    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }

    /// All known tasks
    pub async fn snapshot(&self) -> Vec<Task> {
        self.tasks.lock().await.values().cloned().collect()
    }

    /// Find a sibling that makes `task` redundant
    ///
    /// A sibling is another task with the same name in the same package folder.
    pub async fn find_conflict(&self, task: &Task, starting: bool) -> Option<Task> {
        let tasks = self.tasks.lock().await;
        let name = task.name().await;
        Self::scan(&tasks, task, &name, starting).await
    }

    /// Atomically check for conflicting siblings and mark `task` as downloading
    ///
    /// A task the registry does not know yet is registered first, so executions built
    /// outside [`Engine::run`](crate::Engine::run) still see each other. Returns the
    /// conflicting sibling instead when one exists; `task` is left untouched then.
    pub async fn claim_download(&self, task: &Task) -> Result<(), Task> {
        let mut tasks = self.tasks.lock().await;
        tasks.entry(task.id()).or_insert_with(|| task.clone());

        let name = task.name().await;
        if let Some(conflict) = Self::scan(&tasks, task, &name, true).await {
            return Err(conflict);
        }
        task.set_status(Status::Downloading).await;
        Ok(())
    }

    /// Rename `task` unless a finished or downloading sibling already holds `name`
    ///
    /// `apply` (typically moving the file) runs under the registry lock once `name` is
    /// known to be free, and the task takes the new name only if it succeeds. On a
    /// conflict the sibling is returned and neither `apply` nor the rename happen.
    pub async fn rename<F, Fut, E>(
        &self,
        task: &Task,
        name: &str,
        apply: F,
    ) -> Result<Option<Task>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), E>>,
    {
        let tasks = self.tasks.lock().await;
        if let Some(conflict) = Self::scan(&tasks, task, name, false).await {
            return Ok(Some(conflict));
        }
        apply().await?;
        task.set_name(name).await;
        Ok(None)
    }

    async fn scan(
        tasks: &HashMap<TaskId, Task>,
        task: &Task,
        name: &str,
        starting: bool,
    ) -> Option<Task> {
        let folder = &task.package().folder;

        for other in tasks.values() {
            if other.same_as(task) || other.id() == task.id() {
                continue;
            }
            if &other.package().folder != folder {
                continue;
            }
            let (other_name, other_status) = other.name_and_status().await;
            if other_name == name && sibling_conflicts(other_status, starting) {
                tracing::debug!(
                    task_id = %task.id(),
                    conflict_id = %other.id(),
                    status = %other_status,
                    name = %name,
                    "Found sibling task for the same file"
                );
                return Some(other.clone());
            }
        }
        None
    }
}
