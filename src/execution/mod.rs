//! Per-attempt execution context
//!
//! A [`PluginExecution`] is what a [`Hoster`](crate::Hoster) works against while it
//! drives one task. It is owned by exactly one tokio task; every method takes
//! `&self` or `&mut self` and runs sequentially.
//!
//! Methods are organized by concern:
//! - this module: content loading, status, account binding
//! - `guard`: Duplicate Guard
//! - `transfer`: download, content checks, checksums
//! - `captcha`: captcha solving and feedback

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::broadcast;

use crate::account::{Account, AccountData};
use crate::captcha::{CaptchaBroker, CaptchaTask, OcrEngine};
use crate::config::Config;
use crate::db::DuplicateIndex;
use crate::registry::TaskRegistry;
use crate::signal::{Outcome, Signal};
use crate::task::Task;
use crate::transport::{FetchRequest, FetchResponse, PageHeaders, Transport};
use crate::types::{Event, Status};
use crate::utils::{parse_headers, safe_join, sanitize_filename};
use crate::wait::WaitController;

mod captcha;
mod guard;
mod transfer;

pub use captcha::CaptchaRequest;
pub use transfer::{CheckMatch, CheckOptions, DownloadRequest, Rule, Rules};

/// Account an execution runs under
#[derive(Clone)]
pub struct AccountBinding {
    /// Account source the user was selected from
    pub account: Arc<dyn Account>,
    /// Selected user
    pub user: String,
    /// Credentials at selection time
    pub data: AccountData,
    /// Premium status at selection time
    pub premium: bool,
}

/// Shared collaborators an execution is built from
pub(crate) struct ExecutionParts {
    pub(crate) config: Arc<Config>,
    pub(crate) registry: TaskRegistry,
    pub(crate) index: Option<Arc<dyn DuplicateIndex>>,
    pub(crate) events: broadcast::Sender<Event>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) account: Option<AccountBinding>,
    pub(crate) broker: Arc<dyn CaptchaBroker>,
    pub(crate) ocr: Option<Arc<dyn OcrEngine>>,
    pub(crate) ocr_registered: bool,
    pub(crate) wait: WaitController,
}

/// Runtime context of one task's download attempt
pub struct PluginExecution {
    task: Task,
    config: Arc<Config>,
    registry: TaskRegistry,
    index: Option<Arc<dyn DuplicateIndex>>,
    events: broadcast::Sender<Event>,
    /// Transport used by loads and transfers (account session or anonymous)
    transport: Arc<dyn Transport>,
    /// Anonymous transport, kept for `reset_account`
    anonymous_transport: Arc<dyn Transport>,
    account: Option<AccountBinding>,
    broker: Arc<dyn CaptchaBroker>,
    /// OCR engine, only when OCR is enabled and one is registered for the plugin
    ocr: Option<Arc<dyn OcrEngine>>,
    /// Whether an OCR engine is registered for the plugin at all
    ocr_registered: bool,
    wait: WaitController,
    /// Connection limit; zero or negative means "configured maximum"
    chunk_limit: i32,
    resume_download: bool,
    multi_dl: bool,
    last_download: Option<PathBuf>,
    last_check: Option<CheckMatch>,
    captcha_task: Option<CaptchaTask>,
    page_dumps: AtomicU32,
}

impl PluginExecution {
    pub(crate) fn new(task: Task, parts: ExecutionParts) -> Self {
        let anonymous_transport = parts.transport.clone();
        let transport = parts
            .account
            .as_ref()
            .and_then(|binding| binding.account.transport_for(&binding.user))
            .unwrap_or_else(|| parts.transport.clone());
        let with_account = parts.account.is_some();

        Self {
            task,
            config: parts.config,
            registry: parts.registry,
            index: parts.index,
            events: parts.events,
            transport,
            anonymous_transport,
            account: parts.account,
            broker: parts.broker,
            ocr: parts.ocr,
            ocr_registered: parts.ocr_registered,
            wait: parts.wait,
            // accounts get unlimited connections and resume
            chunk_limit: if with_account { -1 } else { 1 },
            resume_download: with_account,
            multi_dl: true,
            last_download: None,
            last_check: None,
            captcha_task: None,
            page_dumps: AtomicU32::new(0),
        }
    }

    /// The task being executed
    pub fn task(&self) -> &Task {
        &self.task
    }

    /// Engine configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Transport of this execution
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Account binding, if the attempt runs under an account
    pub fn account(&self) -> Option<&AccountBinding> {
        self.account.as_ref()
    }

    /// Logged-in user name
    pub fn user(&self) -> Option<&str> {
        self.account.as_ref().map(|binding| binding.user.as_str())
    }

    /// Whether the attempt runs under a premium account
    pub fn premium(&self) -> bool {
        self.account.as_ref().is_some_and(|binding| binding.premium)
    }

    /// Set the per-plugin connection limit (zero or negative: configured maximum)
    pub fn set_chunk_limit(&mut self, limit: i32) {
        self.chunk_limit = limit;
    }

    /// Enable or disable resuming partial files
    pub fn set_resume_download(&mut self, resume: bool) {
        self.resume_download = resume;
    }

    /// Whether the hoster allows parallel downloads
    pub fn multi_dl(&self) -> bool {
        self.multi_dl
    }

    /// Declare whether the hoster allows parallel downloads
    pub fn set_multi_dl(&mut self, multi_dl: bool) {
        self.multi_dl = multi_dl;
    }

    /// Number of connections for the next transfer
    pub fn chunk_count(&self) -> u32 {
        let configured = self.config.download.chunks;
        if self.chunk_limit <= 0 {
            return configured;
        }
        configured.min(self.chunk_limit as u32)
    }

    /// Location of the last successful [`download`](Self::download)
    pub fn last_download(&self) -> Option<&PathBuf> {
        self.last_download.as_ref()
    }

    /// Regex match of the last [`check_download`](Self::check_download) hit
    pub fn last_check(&self) -> Option<&CheckMatch> {
        self.last_check.as_ref()
    }

    /// Captcha task held for feedback
    pub fn captcha_task(&self) -> Option<&CaptchaTask> {
        self.captcha_task.as_ref()
    }

    /// Retries made so far
    pub fn retries(&self) -> u32 {
        self.wait.retries()
    }

    /// Whether a reconnect would avoid the current wait
    pub fn want_reconnect(&self) -> bool {
        self.wait.want_reconnect()
    }

    /// See [`WaitController::set_wait`]
    pub async fn set_wait(&mut self, seconds: u64, reconnect: bool) {
        self.wait.set_wait(seconds, reconnect).await;
    }

    /// See [`WaitController::wait`]
    pub async fn wait(&mut self) -> Outcome<()> {
        self.wait.wait().await
    }

    /// See [`WaitController::retry`]
    pub async fn retry(&mut self, max_tries: u32, wait_seconds: u64, reason: &str) -> Signal {
        self.wait.retry(max_tries, wait_seconds, reason).await
    }

    /// Fail with [`Signal::Abort`] if the task was aborted
    pub fn check_abort(&self) -> Outcome<()> {
        if self.task.is_aborted() {
            return Err(Signal::Abort);
        }
        Ok(())
    }

    /// Password of the owning package, or an empty string
    pub fn password(&self) -> String {
        self.task.package().password.clone().unwrap_or_default()
    }

    /// Drop the account and try again anonymously
    pub async fn reset_account(&mut self) -> Signal {
        if let Some(binding) = self.account.take() {
            tracing::info!(
                task_id = %self.task.id(),
                user = %binding.user,
                "Continuing without account"
            );
        }
        self.transport = self.anonymous_transport.clone();
        self.chunk_limit = 1;
        self.resume_download = false;
        self.retry(3, 1, "").await
    }

    /// Move the task to a non-terminal status and notify listeners
    pub async fn set_status(&self, status: Status) {
        if self.task.set_status(status).await {
            self.emit_event(Event::StatusChanged {
                id: self.task.id(),
                status,
            });
        }
    }

    pub(crate) fn emit_event(&self, event: Event) {
        // send() returns Err if there are no receivers, which is fine - we just drop the event
        self.events.send(event).ok();
    }

    /// Issue a request through the transport
    ///
    /// Checks the abort flag first. With `general.debug` on, the body is dumped to
    /// `<tmp_dir>/<plugin>/load<n>.dump.html`.
    pub async fn fetch(&self, url: &str, request: &FetchRequest) -> Outcome<FetchResponse> {
        self.check_abort()?;
        let response = self.transport.fetch(url, request).await?;
        if self.config.general.debug && !request.just_header {
            self.dump_page(&response.body).await;
        }
        Ok(response)
    }

    /// Load a page as text
    pub async fn load(&self, url: &str, request: &FetchRequest) -> Outcome<String> {
        let request = FetchRequest {
            just_header: false,
            ..request.clone()
        };
        Ok(self.fetch(url, &request).await?.text())
    }

    /// Load only the response headers
    pub async fn load_headers(&self, url: &str, request: &FetchRequest) -> Outcome<PageHeaders> {
        let request = FetchRequest {
            just_header: true,
            ..request.clone()
        };
        let response = self.fetch(url, &request).await?;
        Ok(PageHeaders {
            code: response.code,
            fields: parse_headers(&response.headers),
        })
    }

    async fn dump_page(&self, body: &[u8]) {
        let n = self.page_dumps.fetch_add(1, Ordering::Relaxed) + 1;
        let dir = safe_join(&self.config.general.tmp_dir, &[self.task.plugin()]);
        let path = dir.join(format!("load{}.dump.html", n));

        let result = async {
            tokio::fs::create_dir_all(&dir).await?;
            tokio::fs::write(&path, body).await
        }
        .await;
        if let Err(e) = result {
            tracing::warn!(path = %path.display(), error = %e, "Failed to dump page");
        }
    }

    /// `<download_folder>/<package folder>`
    pub(crate) fn package_folder(&self) -> PathBuf {
        safe_join(
            &self.config.general.download_folder,
            &[self.task.package().folder.as_str()],
        )
    }

    /// `<download_folder>/<package folder>/<name>`
    pub(crate) fn file_path(&self, name: &str) -> PathBuf {
        self.package_folder().join(sanitize_filename(name))
    }
}
