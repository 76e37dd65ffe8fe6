//! Shared task handle
//!
//! A [`Task`] is created by the scheduler and shared between the scheduler, the
//! [`TaskRegistry`](crate::registry::TaskRegistry) and the execution driving it.
//! The abort flag is a [`CancellationToken`] so interval-bound loops can race it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::types::{ChecksumResult, Package, Status, TaskId};

/// Mutable task fields
#[derive(Debug)]
struct TaskState {
    name: String,
    status: Status,
    wait_until: Option<Instant>,
    message: Option<String>,
    checksum: Option<ChecksumResult>,
}

#[derive(Debug)]
struct TaskInner {
    id: TaskId,
    url: String,
    plugin: String,
    package: Package,
    state: RwLock<TaskState>,
    /// Expected (or final) size in bytes
    size: AtomicU64,
    /// Bytes transferred so far
    transferred: AtomicU64,
    abort: CancellationToken,
}

/// One unit of work: a single file to obtain
#[derive(Clone, Debug)]
pub struct Task {
    inner: Arc<TaskInner>,
}

impl Task {
    /// Create a task in the `created` state
    pub fn new(
        id: TaskId,
        url: impl Into<String>,
        name: impl Into<String>,
        plugin: impl Into<String>,
        package: Package,
    ) -> Self {
        Self {
            inner: Arc::new(TaskInner {
                id,
                url: url.into(),
                plugin: plugin.into(),
                package,
                state: RwLock::new(TaskState {
                    name: name.into(),
                    status: Status::Created,
                    wait_until: None,
                    message: None,
                    checksum: None,
                }),
                size: AtomicU64::new(0),
                transferred: AtomicU64::new(0),
                abort: CancellationToken::new(),
            }),
        }
    }

    /// Set the expected size (builder style)
    pub fn with_size(self, size: u64) -> Self {
        self.set_size(size);
        self
    }

    /// Task identifier
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    /// Source URL
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Name of the hoster plugin handling this task
    pub fn plugin(&self) -> &str {
        &self.inner.plugin
    }

    /// Owning package
    pub fn package(&self) -> &Package {
        &self.inner.package
    }

    /// Whether two handles refer to the same task
    pub fn same_as(&self, other: &Task) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Current file name
    pub async fn name(&self) -> String {
        self.inner.state.read().await.name.clone()
    }

    /// Rename the file this task produces
    pub async fn set_name(&self, name: impl Into<String>) {
        self.inner.state.write().await.name = name.into();
    }

    /// Current status
    pub async fn status(&self) -> Status {
        self.inner.state.read().await.status
    }

    /// Name and status read under one lock
    pub async fn name_and_status(&self) -> (String, Status) {
        let state = self.inner.state.read().await;
        (state.name.clone(), state.status)
    }

    /// Move to a non-terminal status
    ///
    /// Returns `false` (and leaves the status untouched) once the task is terminal.
    pub async fn set_status(&self, status: Status) -> bool {
        let mut state = self.inner.state.write().await;
        if state.status.is_terminal() {
            return false;
        }
        state.status = status;
        true
    }

    /// Move to a terminal status exactly once, recording an optional message
    pub async fn set_terminal(&self, status: Status, message: Option<String>) -> bool {
        let mut state = self.inner.state.write().await;
        if state.status.is_terminal() {
            tracing::warn!(
                task_id = %self.inner.id,
                current = %state.status,
                requested = %status,
                "Ignoring second terminal transition"
            );
            return false;
        }
        state.status = status;
        state.message = message;
        true
    }

    /// Error or skip message of the terminal outcome
    pub async fn message(&self) -> Option<String> {
        self.inner.state.read().await.message.clone()
    }

    /// Deadline of the current wait, if any
    pub async fn wait_until(&self) -> Option<Instant> {
        self.inner.state.read().await.wait_until
    }

    /// Set the wait deadline
    pub async fn set_wait_until(&self, deadline: Instant) {
        self.inner.state.write().await.wait_until = Some(deadline);
    }

    /// Final checksum result (bookkeeping, allowed after the terminal transition)
    pub async fn checksum(&self) -> Option<ChecksumResult> {
        self.inner.state.read().await.checksum
    }

    /// Record the checksum result
    pub async fn set_checksum(&self, result: ChecksumResult) {
        self.inner.state.write().await.checksum = Some(result);
    }

    /// Expected or final size in bytes
    pub fn size(&self) -> u64 {
        self.inner.size.load(Ordering::Acquire)
    }

    /// Set the expected or final size
    pub fn set_size(&self, size: u64) {
        self.inner.size.store(size, Ordering::Release);
    }

    /// Bytes transferred so far
    pub fn transferred(&self) -> u64 {
        self.inner.transferred.load(Ordering::Acquire)
    }

    /// Progress callback target: updates transferred bytes and, when known, the size
    pub fn set_progress(&self, transferred: u64, total: Option<u64>) {
        self.inner.transferred.store(transferred, Ordering::Release);
        if let Some(total) = total {
            self.inner.size.store(total, Ordering::Release);
        }
    }

    /// Progress fraction between 0.0 and 1.0
    pub fn progress(&self) -> f32 {
        let size = self.size();
        if size == 0 {
            return 0.0;
        }
        (self.transferred() as f64 / size as f64).min(1.0) as f32
    }

    /// Request cancellation
    pub fn abort(&self) {
        self.inner.abort.cancel();
    }

    /// Whether cancellation was requested
    pub fn is_aborted(&self) -> bool {
        self.inner.abort.is_cancelled()
    }

    /// Token that completes when cancellation is requested
    pub fn abort_token(&self) -> &CancellationToken {
        &self.inner.abort
    }
}
