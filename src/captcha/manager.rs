//! In-memory captcha broker

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

use super::{CaptchaBroker, CaptchaHandler, CaptchaId, CaptchaResult, CaptchaTask, NewCaptcha};

/// Default captcha broker
///
/// New tasks are offered to every registered [`CaptchaHandler`] and stay in the
/// pending queue for human solvers, who answer them through
/// [`solve`](Self::solve) or [`reject`](Self::reject).
pub struct CaptchaManager {
    next_id: AtomicU64,
    tasks: Mutex<Vec<CaptchaTask>>,
    handlers: RwLock<Vec<Arc<dyn CaptchaHandler>>>,
    timeout: Duration,
}

impl CaptchaManager {
    /// Create a broker whose tasks wait at most `timeout` for an answer
    pub fn new(timeout: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            tasks: Mutex::new(Vec::new()),
            handlers: RwLock::new(Vec::new()),
            timeout,
        }
    }

    /// Register an external solver
    pub async fn add_handler(&self, handler: Arc<dyn CaptchaHandler>) {
        tracing::info!(handler = handler.name(), "Captcha handler registered");
        self.handlers.write().await.push(handler);
    }

    /// Tasks still waiting for an answer, oldest first
    pub async fn pending(&self) -> Vec<CaptchaTask> {
        self.tasks
            .lock()
            .await
            .iter()
            .filter(|task| task.is_waiting())
            .cloned()
            .collect()
    }

    /// Number of queued tasks (waiting or not)
    pub async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }

    /// Whether the queue is empty
    pub async fn is_empty(&self) -> bool {
        self.tasks.lock().await.is_empty()
    }

    /// Answer a waiting task; returns `false` if it is unknown or no longer waiting
    pub async fn solve(&self, id: CaptchaId, result: CaptchaResult) -> bool {
        match self.find_waiting(id).await {
            Some(task) => {
                tracing::debug!(captcha_id = id, "Captcha solved");
                task.set_result(result);
                true
            }
            None => false,
        }
    }

    /// Fail a waiting task; returns `false` if it is unknown or no longer waiting
    pub async fn reject(&self, id: CaptchaId, error: impl Into<String>) -> bool {
        match self.find_waiting(id).await {
            Some(task) => {
                let error = error.into();
                tracing::debug!(captcha_id = id, error = %error, "Captcha rejected");
                task.set_error(error);
                true
            }
            None => false,
        }
    }

    async fn find_waiting(&self, id: CaptchaId) -> Option<CaptchaTask> {
        self.tasks
            .lock()
            .await
            .iter()
            .find(|task| task.id() == id && task.is_waiting())
            .cloned()
    }
}

#[async_trait]
impl CaptchaBroker for CaptchaManager {
    async fn enqueue(&self, captcha: NewCaptcha) -> crate::Result<CaptchaTask> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let task = CaptchaTask::new(id, captcha);
        task.set_waiting(self.timeout);

        let handlers = self.handlers.read().await.clone();
        for handler in handlers {
            if handler.captcha_task(&task).await {
                tracing::debug!(captcha_id = id, handler = handler.name(), "Captcha claimed");
                task.add_handler(handler);
            }
        }

        tracing::info!(
            captcha_id = id,
            plugin = task.plugin(),
            handlers = task.handler_count(),
            "Captcha queued"
        );
        self.tasks.lock().await.push(task.clone());
        Ok(task)
    }

    async fn dequeue(&self, task: &CaptchaTask) {
        let mut tasks = self.tasks.lock().await;
        let before = tasks.len();
        tasks.retain(|queued| queued.id() != task.id());
        if tasks.len() < before {
            tracing::debug!(captcha_id = task.id(), "Captcha removed from queue");
        }
    }
}
