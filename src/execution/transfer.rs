//! Transfer Orchestrator: download, content checks, checksums

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use regex::bytes::Regex;
use sha2::Digest as _;
use tokio::io::AsyncReadExt;

use super::PluginExecution;
use super::guard::skip_for;
use crate::error::{Error, Result};
use crate::signal::{Outcome, Signal, SkipInfo};
use crate::transport::{Params, TransferRequest};
use crate::types::{ChecksumResult, Event};
use crate::utils::{change_owner, rename_no_clobber};

/// Progress events are emitted at most every this many permille of the file
const PROGRESS_STEP_PERMILLE: u64 = 10;

/// Options of [`PluginExecution::download`]
#[derive(Clone, Debug)]
pub struct DownloadRequest {
    /// Query parameters
    pub get: Params,
    /// Form parameters; non-empty turns the request into a POST
    pub post: Params,
    /// Send the previously loaded URL as referer
    pub referer: bool,
    /// Use the cookie store
    pub cookies: bool,
    /// Rename the file to the server-provided Content-Disposition name
    pub disposition: bool,
}

impl Default for DownloadRequest {
    fn default() -> Self {
        Self {
            get: Vec::new(),
            post: Vec::new(),
            referer: true,
            cookies: true,
            disposition: false,
        }
    }
}

/// A content rule of [`PluginExecution::check_download`]
#[derive(Clone, Debug)]
pub enum Rule {
    /// Byte substring
    Contains(Vec<u8>),
    /// Regular expression over the raw bytes
    Pattern(Regex),
}

impl Rule {
    /// Substring rule
    pub fn contains(needle: impl AsRef<[u8]>) -> Self {
        Rule::Contains(needle.as_ref().to_vec())
    }

    /// Regex rule
    pub fn pattern(pattern: &str) -> Result<Self> {
        Ok(Rule::Pattern(Regex::new(pattern)?))
    }

    fn find(&self, content: &[u8]) -> Option<(usize, usize, Vec<Option<String>>)> {
        match self {
            Rule::Contains(needle) if needle.is_empty() => Some((0, 0, Vec::new())),
            Rule::Contains(needle) => content
                .windows(needle.len())
                .position(|window| window == needle.as_slice())
                .map(|start| (start, start + needle.len(), Vec::new())),
            Rule::Pattern(regex) => {
                let captures = regex.captures(content)?;
                let whole = captures.get(0)?;
                let groups = captures
                    .iter()
                    .skip(1)
                    .map(|group| group.map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned()))
                    .collect();
                Some((whole.start(), whole.end(), groups))
            }
        }
    }
}

/// Named rules, evaluated in insertion order
#[derive(Clone, Debug, Default)]
pub struct Rules {
    rules: Vec<(String, Rule)>,
}

impl Rules {
    /// Empty rule set
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule (builder style)
    pub fn with(mut self, name: impl Into<String>, rule: Rule) -> Self {
        self.push(name, rule);
        self
    }

    /// Append a rule
    pub fn push(&mut self, name: impl Into<String>, rule: Rule) {
        self.rules.push((name.into(), rule));
    }

    /// Number of rules
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether there are no rules
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Options of [`PluginExecution::check_download`]
#[derive(Clone, Copy, Debug)]
pub struct CheckOptions {
    /// Size announced by the hoster's API; a file at least this big is not checked (0: unknown)
    pub api_size: u64,
    /// Files bigger than this are not checked unless `read_size` is set
    pub max_size: u64,
    /// Remove the file when a rule matches
    pub delete: bool,
    /// Only inspect the first `read_size` bytes (0: whole file)
    pub read_size: u64,
}

impl Default for CheckOptions {
    fn default() -> Self {
        Self {
            api_size: 0,
            max_size: 50_000,
            delete: true,
            read_size: 0,
        }
    }
}

/// A rule hit recorded by [`PluginExecution::check_download`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckMatch {
    /// Name of the matching rule
    pub rule: String,
    /// Byte offset where the match starts
    pub start: usize,
    /// Byte offset where the match ends
    pub end: usize,
    /// Capture groups of a pattern rule (lossy UTF-8)
    pub groups: Vec<Option<String>>,
}

impl CheckMatch {
    /// Capture group `i` (1-based, like regex groups)
    pub fn group(&self, i: usize) -> Option<&str> {
        i.checked_sub(1)
            .and_then(|i| self.groups.get(i))
            .and_then(|group| group.as_deref())
    }
}

impl PluginExecution {
    /// Transfer `url` into the package folder
    ///
    /// The Duplicate Guard runs first and atomically moves the task to
    /// [`Status::Downloading`](crate::Status::Downloading). Returns the final location
    /// of the file, which is also kept as [`last_download`](Self::last_download).
    pub async fn download(&mut self, url: &str, request: DownloadRequest) -> Outcome<PathBuf> {
        self.check_abort()?;
        self.claim_download().await?;

        let folder = self.package_folder();
        self.create_folder(&folder).await?;

        let name = self.task.name().await;
        let path = self.file_path(&name);

        self.emit_event(Event::DownloadStarts {
            id: self.task.id(),
            url: url.to_string(),
            path: path.clone(),
        });
        tracing::info!(
            task_id = %self.task.id(),
            url,
            path = %path.display(),
            chunks = self.chunk_count(),
            resume = self.resume_download,
            "Download starts"
        );

        let transfer = TransferRequest {
            url: url.to_string(),
            path: path.clone(),
            get: request.get,
            post: request.post,
            referer: request.referer,
            cookies: request.cookies,
            chunks: self.chunk_count(),
            resume: self.resume_download,
            disposition: request.disposition,
        };

        let task = self.task.clone();
        let events = self.events.clone();
        let last_step = AtomicU64::new(0);
        let progress = move |transferred: u64, total: Option<u64>| {
            task.set_progress(transferred, total);
            let size = task.size();
            if size == 0 {
                return;
            }
            let step = transferred.saturating_mul(1000) / size / PROGRESS_STEP_PERMILLE;
            if last_step.swap(step, Ordering::Relaxed) != step {
                // send() returns Err if there are no receivers, which is fine - we just drop the event
                events
                    .send(Event::Progress {
                        id: task.id(),
                        transferred,
                        fraction: task.progress(),
                    })
                    .ok();
            }
        };

        let result = tokio::select! {
            biased;
            _ = self.task.abort_token().cancelled() => Err(Signal::Abort),
            result = self.transport.transfer(&transfer, &progress) => result.map_err(Signal::from),
        };

        match &result {
            Ok(outcome) => self.task.set_size(outcome.size),
            Err(_) => {
                let transferred = self.task.transferred();
                if self.task.size() < transferred {
                    self.task.set_size(transferred);
                }
            }
        }
        let outcome = result?;

        let mut path = path;
        if let Some(final_name) = outcome.final_name
            && final_name != name
        {
            path = self.rename_download(path, &name, &final_name).await?;
        }

        self.apply_file_permissions(&path).await;
        self.last_download = Some(path.clone());
        Ok(path)
    }

    /// Move the finished file to the server-provided name
    ///
    /// The sibling check on the new name and the no-clobber move happen under the
    /// registry lock. When the name is taken (by a sibling or an existing file) the
    /// task keeps its name, the file stays at `path` and the task is skipped.
    async fn rename_download(
        &mut self,
        path: PathBuf,
        name: &str,
        final_name: &str,
    ) -> Outcome<PathBuf> {
        let target = self.file_path(final_name);
        let (from, to) = (&path, &target);
        let renamed = self
            .registry
            .rename(&self.task, final_name, move || rename_no_clobber(from, to))
            .await;

        match renamed {
            Ok(None) => {
                tracing::info!(
                    task_id = %self.task.id(),
                    from = %name,
                    to = %final_name,
                    "Renamed by content disposition"
                );
                Ok(target)
            }
            Ok(Some(conflict)) => {
                tracing::info!(
                    task_id = %self.task.id(),
                    name = %final_name,
                    conflict_id = %conflict.id(),
                    "Server name already downloading, not renamed"
                );
                self.last_download = Some(path);
                Err(skip_for(&conflict))
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::info!(
                    task_id = %self.task.id(),
                    path = %target.display(),
                    "Server name already exists on disk, not renamed"
                );
                self.last_download = Some(path);
                Err(Signal::Skip(SkipInfo::FileExists))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn create_folder(&self, folder: &Path) -> Outcome<()> {
        let mut builder = tokio::fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(self.config.permission.folder_mode()?);
        builder.create(folder).await?;

        let permission = &self.config.permission;
        if permission.change_dl
            && let Err(e) = change_owner(folder, &permission.user, &permission.group)
        {
            tracing::warn!(
                path = %folder.display(),
                user = %permission.user,
                group = %permission.group,
                error = %e,
                "Setting user and group failed"
            );
        }
        Ok(())
    }

    async fn apply_file_permissions(&self, path: &Path) {
        let permission = &self.config.permission;

        #[cfg(unix)]
        if permission.change_file {
            use std::os::unix::fs::PermissionsExt;

            let result = match permission.file_mode() {
                Ok(mode) => tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
                    .await
                    .map_err(Error::from),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                tracing::warn!(path = %path.display(), error = %e, "Setting file mode failed");
            }
        }

        if permission.change_dl
            && let Err(e) = change_owner(path, &permission.user, &permission.group)
        {
            tracing::warn!(
                path = %path.display(),
                user = %permission.user,
                group = %permission.group,
                error = %e,
                "Setting user and group failed"
            );
        }
    }

    /// Inspect the last download for known error pages
    ///
    /// Returns the name of the first matching rule. Small files only, unless
    /// `read_size` limits the inspected prefix.
    pub async fn check_download(
        &mut self,
        rules: &Rules,
        options: CheckOptions,
    ) -> Outcome<Option<String>> {
        let Some(path) = self.last_download.clone() else {
            return Ok(None);
        };
        let Ok(meta) = tokio::fs::metadata(&path).await else {
            return Ok(None);
        };
        let size = meta.len();

        if options.api_size > 0 && options.api_size <= size {
            return Ok(None);
        }
        if size > options.max_size && options.read_size == 0 {
            return Ok(None);
        }

        let content = read_prefix(&path, options.read_size).await?;

        for (name, rule) in &rules.rules {
            let Some((start, end, groups)) = rule.find(&content) else {
                continue;
            };
            tracing::debug!(
                task_id = %self.task.id(),
                rule = %name,
                path = %path.display(),
                "Download check matched"
            );
            if options.delete
                && let Err(e) = tokio::fs::remove_file(&path).await
            {
                tracing::warn!(path = %path.display(), error = %e, "Failed to remove checked file");
            }
            self.last_check = Some(CheckMatch {
                rule: name.clone(),
                start,
                end,
                groups,
            });
            return Ok(Some(name.clone()));
        }
        Ok(None)
    }

    /// Compare the last download against an expected MD5 or SHA-256 hex digest
    ///
    /// The result is also stored on the task.
    pub async fn checksum(&self, expected: Option<&str>) -> ChecksumResult {
        let result = self.compute_checksum(expected).await;
        tracing::debug!(task_id = %self.task.id(), result = ?result, "Checksum verified");
        self.task.set_checksum(result).await;
        result
    }

    async fn compute_checksum(&self, expected: Option<&str>) -> ChecksumResult {
        let Some(expected) = expected.map(|digest| digest.trim().to_ascii_lowercase()) else {
            return ChecksumResult::NotImplemented;
        };
        let Some(path) = self.last_download.clone() else {
            return ChecksumResult::Unavailable;
        };
        let algorithm = match expected.len() {
            32 => HashAlgorithm::Md5,
            64 => HashAlgorithm::Sha256,
            _ => return ChecksumResult::NotImplemented,
        };

        let digest = tokio::task::spawn_blocking(move || hash_file(&path, algorithm)).await;
        match digest {
            Ok(Ok(actual)) if actual == expected => ChecksumResult::Ok,
            Ok(Ok(_)) => ChecksumResult::Wrong,
            Ok(Err(e)) => {
                tracing::warn!(task_id = %self.task.id(), error = %e, "Hashing failed");
                ChecksumResult::Unavailable
            }
            Err(e) => {
                tracing::warn!(task_id = %self.task.id(), error = %e, "Hashing task panicked");
                ChecksumResult::Unavailable
            }
        }
    }
}

async fn read_prefix(path: &Path, limit: u64) -> Result<Vec<u8>> {
    if limit == 0 {
        return Ok(tokio::fs::read(path).await?);
    }
    let file = tokio::fs::File::open(path).await?;
    let mut content = Vec::new();
    file.take(limit).read_to_end(&mut content).await?;
    Ok(content)
}

#[derive(Clone, Copy, Debug)]
enum HashAlgorithm {
    Md5,
    Sha256,
}

fn hash_file(path: &Path, algorithm: HashAlgorithm) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut buf = vec![0u8; 64 * 1024];

    match algorithm {
        HashAlgorithm::Md5 => {
            let mut context = md5::Context::new();
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                context.consume(&buf[..n]);
            }
            Ok(format!("{:x}", context.compute()))
        }
        HashAlgorithm::Sha256 => {
            let mut hasher = sha2::Sha256::new();
            loop {
                let n = file.read(&mut buf)?;
                if n == 0 {
                    break;
                }
                hasher.update(&buf[..n]);
            }
            Ok(format!("{:x}", hasher.finalize()))
        }
    }
}
