//! Task Lifecycle Driver
//!
//! The [`Engine`] owns everything executions share: configuration, the task registry,
//! the reconnect signal, the event channel, captcha solvers, accounts and the
//! persistent duplicate index. Methods are organized by concern:
//! - this module: construction and shared handles
//! - [`lifecycle`] - building executions, the retry loop and terminal outcomes

mod lifecycle;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::account::Account;
use crate::captcha::{CaptchaBroker, CaptchaManager, OcrEngine, OcrRegistry};
use crate::config::Config;
use crate::db::{Database, DuplicateIndex};
use crate::error::Result;
use crate::reconnect::ReconnectSignal;
use crate::registry::TaskRegistry;
use crate::task::Task;
use crate::transport::{HttpTransportFactory, TransportFactory};
use crate::types::{Event, TaskId};

/// Capacity of the event channel; slow subscribers lag behind and drop events
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Per-task download execution engine (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct Engine {
    /// Configuration (wrapped in Arc for sharing across executions)
    pub(crate) config: Arc<Config>,
    /// Live tasks, consulted by the Duplicate Guard
    pub(crate) registry: TaskRegistry,
    /// Process-wide "reconnect in progress" signal
    pub(crate) reconnect: ReconnectSignal,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Creates one transport per execution
    pub(crate) transports: Arc<dyn TransportFactory>,
    /// Queue for captchas that need an external solver
    pub(crate) broker: Arc<dyn CaptchaBroker>,
    /// OCR engines keyed by plugin name
    pub(crate) ocr: OcrRegistry,
    /// Account sources keyed by plugin name
    pub(crate) accounts: HashMap<String, Arc<dyn Account>>,
    /// Persistent duplicate index (absent when running without a database)
    pub(crate) index: Option<Arc<dyn DuplicateIndex>>,
}

impl Engine {
    /// Create an engine backed by the SQLite database at `persistence.database_path`
    ///
    /// Uses an HTTP transport per execution and an in-memory [`CaptchaManager`].
    pub async fn new(config: Config) -> Result<Self> {
        let mut engine = Self::without_index(config)?;
        let db = Database::new(&engine.config.persistence.database_path).await?;
        engine.index = Some(Arc::new(db));
        Ok(engine)
    }

    /// Create an engine without a persistent duplicate index
    ///
    /// Validates `config` like [`Engine::new`]. Sibling and local-file checks still apply.
    pub fn without_index(config: Config) -> Result<Self> {
        config.validate()?;
        let (event_tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let broker = Arc::new(CaptchaManager::new(config.captcha.timeout));

        Ok(Self {
            config: Arc::new(config),
            registry: TaskRegistry::new(),
            reconnect: ReconnectSignal::new(),
            event_tx,
            transports: Arc::new(HttpTransportFactory),
            broker,
            ocr: OcrRegistry::new(),
            accounts: HashMap::new(),
            index: None,
        })
    }

    /// Use a custom transport factory (builder style)
    pub fn with_transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.transports = factory;
        self
    }

    /// Use a custom captcha broker (builder style)
    pub fn with_captcha_broker(mut self, broker: Arc<dyn CaptchaBroker>) -> Self {
        self.broker = broker;
        self
    }

    /// Register an OCR engine for `plugin` (builder style)
    pub fn with_ocr_engine(mut self, plugin: impl Into<String>, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr.register(plugin, engine);
        self
    }

    /// Register the account source for `plugin` (builder style)
    pub fn with_account(mut self, plugin: impl Into<String>, account: Arc<dyn Account>) -> Self {
        self.accounts.insert(plugin.into(), account);
        self
    }

    /// Use a custom duplicate index (builder style)
    pub fn with_index(mut self, index: Arc<dyn DuplicateIndex>) -> Self {
        self.index = Some(index);
        self
    }

    /// Subscribe to task events
    ///
    /// Multiple subscribers are supported; events are dropped when nobody listens.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Live task registry
    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    /// Reconnect signal; set it while the network identity is being rotated
    pub fn reconnect(&self) -> &ReconnectSignal {
        &self.reconnect
    }

    /// Engine configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Make a task known to the Duplicate Guard before it runs
    pub async fn add_task(&self, task: Task) {
        self.registry.insert(task).await;
    }

    /// Request cancellation of a task; returns `false` for unknown tasks
    pub async fn abort(&self, id: TaskId) -> bool {
        match self.registry.get(id).await {
            Some(task) => {
                tracing::info!(task_id = %id, "Abort requested");
                task.abort();
                true
            }
            None => false,
        }
    }
}
