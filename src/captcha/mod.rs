//! Captcha tasks, solver seams and the default broker
//!
//! A [`CaptchaTask`] is one outstanding challenge. It is created by a
//! [`CaptchaBroker`] and polled by the execution that needs the answer until it is
//! solved, rejected or timed out. Solvers are either an [`OcrEngine`] registered for a
//! plugin in the [`OcrRegistry`] or external [`CaptchaHandler`]s (solving services,
//! human clients) that the [`CaptchaManager`] offers each new task to.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

mod manager;

pub use manager::CaptchaManager;

/// Unique identifier for a captcha task
pub type CaptchaId = u64;

/// What kind of answer a captcha expects
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResultKind {
    /// Text written on the image
    #[default]
    Textual,
    /// A point the user has to click on
    Positional,
}

/// Answer to a captcha
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptchaResult {
    /// Recognised text
    Text(String),
    /// Clicked position
    Position {
        /// Horizontal offset in pixels
        x: u32,
        /// Vertical offset in pixels
        y: u32,
    },
}

impl CaptchaResult {
    /// Parse a solver answer according to `kind`
    ///
    /// Positional answers are given as `"x,y"`.
    pub fn parse(kind: ResultKind, answer: &str) -> Option<Self> {
        let answer = answer.trim();
        match kind {
            ResultKind::Textual if answer.is_empty() => None,
            ResultKind::Textual => Some(CaptchaResult::Text(answer.to_string())),
            ResultKind::Positional => {
                let (x, y) = answer.split_once(',')?;
                Some(CaptchaResult::Position {
                    x: x.trim().parse().ok()?,
                    y: y.trim().parse().ok()?,
                })
            }
        }
    }

    /// Text of a textual answer
    pub fn as_text(&self) -> Option<&str> {
        match self {
            CaptchaResult::Text(text) => Some(text),
            CaptchaResult::Position { .. } => None,
        }
    }
}

impl std::fmt::Display for CaptchaResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptchaResult::Text(text) => f.write_str(text),
            CaptchaResult::Position { x, y } => write!(f, "{},{}", x, y),
        }
    }
}

/// Lifecycle state of a captcha task
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CaptchaStatus {
    /// Waiting for a solver
    Waiting,
    /// A result was set
    Solved,
    /// A solver reported an error
    Error,
}

/// Everything a broker needs to create a task
#[derive(Clone, Debug)]
pub struct NewCaptcha {
    /// Plugin that requested the captcha
    pub plugin: String,
    /// Raw image bytes
    pub image: Vec<u8>,
    /// Image type / file extension ("jpg", "png", ...)
    pub image_type: String,
    /// Location of the image on disk
    pub path: PathBuf,
    /// Expected answer kind
    pub kind: ResultKind,
}

struct CaptchaState {
    status: CaptchaStatus,
    result: Option<CaptchaResult>,
    error: Option<String>,
    deadline: Option<Instant>,
    handlers: Vec<Arc<dyn CaptchaHandler>>,
    data: HashMap<String, String>,
}

struct CaptchaInner {
    id: CaptchaId,
    params: NewCaptcha,
    state: Mutex<CaptchaState>,
}

/// One outstanding challenge (cloneable handle)
#[derive(Clone)]
pub struct CaptchaTask {
    inner: Arc<CaptchaInner>,
}

impl std::fmt::Debug for CaptchaTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state();
        f.debug_struct("CaptchaTask")
            .field("id", &self.inner.id)
            .field("plugin", &self.inner.params.plugin)
            .field("status", &state.status)
            .field("result", &state.result)
            .field("error", &state.error)
            .finish()
    }
}

impl CaptchaTask {
    /// Create a waiting task
    pub fn new(id: CaptchaId, params: NewCaptcha) -> Self {
        Self {
            inner: Arc::new(CaptchaInner {
                id,
                params,
                state: Mutex::new(CaptchaState {
                    status: CaptchaStatus::Waiting,
                    result: None,
                    error: None,
                    deadline: None,
                    handlers: Vec::new(),
                    data: HashMap::new(),
                }),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, CaptchaState> {
        self.inner.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Task identifier
    pub fn id(&self) -> CaptchaId {
        self.inner.id
    }

    /// Plugin that requested the captcha
    pub fn plugin(&self) -> &str {
        &self.inner.params.plugin
    }

    /// Raw image bytes
    pub fn image(&self) -> &[u8] {
        &self.inner.params.image
    }

    /// Image type / file extension
    pub fn image_type(&self) -> &str {
        &self.inner.params.image_type
    }

    /// Location of the image on disk
    pub fn path(&self) -> &Path {
        &self.inner.params.path
    }

    /// Expected answer kind
    pub fn kind(&self) -> ResultKind {
        self.inner.params.kind
    }

    /// Whether the task expects text
    pub fn is_textual(&self) -> bool {
        self.kind() == ResultKind::Textual
    }

    /// Current state
    pub fn status(&self) -> CaptchaStatus {
        self.state().status
    }

    /// Set the time the task may stay unsolved, starting now
    pub fn set_waiting(&self, timeout: Duration) {
        let mut state = self.state();
        state.status = CaptchaStatus::Waiting;
        state.deadline = Some(Instant::now() + timeout);
    }

    /// Whether the task still waits for an answer
    ///
    /// False once a result or error is set, or once the waiting deadline passed.
    pub fn is_waiting(&self) -> bool {
        let state = self.state();
        if state.result.is_some() || state.error.is_some() {
            return false;
        }
        match state.deadline {
            Some(deadline) => Instant::now() < deadline,
            None => true,
        }
    }

    /// Store the answer
    pub fn set_result(&self, result: CaptchaResult) {
        let mut state = self.state();
        state.result = Some(result);
        state.status = CaptchaStatus::Solved;
    }

    /// Parse and store a raw solver answer
    ///
    /// An answer that does not fit the expected kind is stored as an error.
    pub fn set_answer(&self, answer: &str) {
        match CaptchaResult::parse(self.kind(), answer) {
            Some(result) => self.set_result(result),
            None => self.set_error(format!("Unusable captcha answer '{}'", answer)),
        }
    }

    /// Answer, if solved
    pub fn result(&self) -> Option<CaptchaResult> {
        self.state().result.clone()
    }

    /// Mark the task as failed
    pub fn set_error(&self, error: impl Into<String>) {
        let mut state = self.state();
        state.error = Some(error.into());
        state.status = CaptchaStatus::Error;
    }

    /// Error reported by a solver
    pub fn error(&self) -> Option<String> {
        self.state().error.clone()
    }

    /// Register a handler that wants feedback about this task
    pub fn add_handler(&self, handler: Arc<dyn CaptchaHandler>) {
        self.state().handlers.push(handler);
    }

    /// Number of handlers that claimed the task
    pub fn handler_count(&self) -> usize {
        self.state().handlers.len()
    }

    /// Handler-private value
    pub fn data(&self, key: &str) -> Option<String> {
        self.state().data.get(key).cloned()
    }

    /// Store a handler-private value (e.g. a solving-service ticket)
    pub fn set_data(&self, key: impl Into<String>, value: impl Into<String>) {
        self.state().data.insert(key.into(), value.into());
    }

    fn handlers(&self) -> Vec<Arc<dyn CaptchaHandler>> {
        self.state().handlers.clone()
    }

    /// Report that the answer was accepted by the site
    pub async fn correct(&self) {
        for handler in self.handlers() {
            handler.captcha_correct(self).await;
        }
    }

    /// Report that the answer was rejected by the site
    pub async fn invalid(&self) {
        for handler in self.handlers() {
            handler.captcha_invalid(self).await;
        }
    }
}

/// External captcha solver (solving service, human client)
#[async_trait]
pub trait CaptchaHandler: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Offered every new task
    ///
    /// Return `true` to claim the task. A claiming handler usually extends the
    /// waiting time with [`CaptchaTask::set_waiting`] and solves the task in the
    /// background. Claimed tasks notify the handler through
    /// [`captcha_correct`](Self::captcha_correct) and
    /// [`captcha_invalid`](Self::captcha_invalid).
    async fn captcha_task(&self, task: &CaptchaTask) -> bool;

    /// The answer was accepted
    async fn captcha_correct(&self, _task: &CaptchaTask) {}

    /// The answer was rejected
    async fn captcha_invalid(&self, _task: &CaptchaTask) {}
}

/// Queue that hands captcha tasks to solvers
#[async_trait]
pub trait CaptchaBroker: Send + Sync {
    /// Create a task and make it available to solvers
    async fn enqueue(&self, captcha: NewCaptcha) -> crate::Result<CaptchaTask>;

    /// Remove a task from the queue
    async fn dequeue(&self, task: &CaptchaTask);
}

/// OCR engine for one plugin's captchas
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Recognise the text of the image at `path`
    async fn solve(&self, path: &Path) -> crate::Result<String>;
}

/// OCR engines keyed by plugin name
#[derive(Clone, Default)]
pub struct OcrRegistry {
    engines: HashMap<String, Arc<dyn OcrEngine>>,
}

impl OcrRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the engine for `plugin`
    pub fn register(&mut self, plugin: impl Into<String>, engine: Arc<dyn OcrEngine>) {
        self.engines.insert(plugin.into(), engine);
    }

    /// Engine for `plugin`
    pub fn get(&self, plugin: &str) -> Option<Arc<dyn OcrEngine>> {
        self.engines.get(plugin).cloned()
    }

    /// Whether an engine is registered for `plugin`
    pub fn contains(&self, plugin: &str) -> bool {
        self.engines.contains_key(plugin)
    }
}
