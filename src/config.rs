//! Configuration types for hoster-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// General settings (directories, debug retention)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Root folder downloads are placed under (default: "./downloads")
    #[serde(default = "default_download_folder")]
    pub download_folder: PathBuf,

    /// Scratch folder for captcha images and page dumps (default: "./tmp")
    #[serde(default = "default_tmp_dir")]
    pub tmp_dir: PathBuf,

    /// Keep temporary artifacts and dump loaded pages (default: false)
    #[serde(default)]
    pub debug: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            download_folder: default_download_folder(),
            tmp_dir: default_tmp_dir(),
            debug: false,
        }
    }
}

/// Download behaviour
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Maximum connections per transfer (default: 3)
    #[serde(default = "default_chunks")]
    pub chunks: u32,

    /// Skip the download when a large enough local file already exists (default: false)
    #[serde(default)]
    pub skip_existing: bool,

    /// Upper bound on restarts of `process` within one attempt (default: 5)
    ///
    /// Applies to retries raised directly by a hoster; `retry()` enforces its own bound.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Poll interval of the wait loop (default: 2 seconds)
    #[serde(default = "default_wait_poll_interval", with = "duration_serde")]
    pub wait_poll_interval: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            chunks: default_chunks(),
            skip_existing: false,
            max_retries: default_max_retries(),
            wait_poll_interval: default_wait_poll_interval(),
        }
    }
}

/// Filesystem permissions applied to download folders and files
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PermissionConfig {
    /// Change owner of folders and files to `user`/`group` (default: false)
    #[serde(default)]
    pub change_dl: bool,

    /// Apply `file` mode to finished files (default: false)
    #[serde(default)]
    pub change_file: bool,

    /// Octal mode for created folders (default: "0755")
    #[serde(default = "default_folder_mode")]
    pub folder: String,

    /// Octal mode for finished files (default: "0644")
    #[serde(default = "default_file_mode")]
    pub file: String,

    /// Owner user name (default: "user")
    #[serde(default = "default_user")]
    pub user: String,

    /// Owner group name (default: "users")
    #[serde(default = "default_group")]
    pub group: String,
}

impl Default for PermissionConfig {
    fn default() -> Self {
        Self {
            change_dl: false,
            change_file: false,
            folder: default_folder_mode(),
            file: default_file_mode(),
            user: default_user(),
            group: default_group(),
        }
    }
}

impl PermissionConfig {
    /// Parsed folder mode
    pub fn folder_mode(&self) -> Result<u32> {
        parse_mode(&self.folder, "permission.folder")
    }

    /// Parsed file mode
    pub fn file_mode(&self) -> Result<u32> {
        parse_mode(&self.file, "permission.file")
    }
}

/// Captcha solving
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaptchaConfig {
    /// Use registered OCR engines (default: true)
    #[serde(default = "default_true")]
    pub ocr_enabled: bool,

    /// Poll interval while waiting for a solver (default: 1 second)
    #[serde(default = "default_captcha_poll_interval", with = "duration_serde")]
    pub poll_interval: Duration,

    /// Lower bound of the random delay before OCR, in milliseconds (default: 3000)
    #[serde(default = "default_ocr_delay_min_ms")]
    pub ocr_delay_min_ms: u64,

    /// Upper bound of the random delay before OCR, in milliseconds (default: 5000)
    #[serde(default = "default_ocr_delay_max_ms")]
    pub ocr_delay_max_ms: u64,

    /// How long a queued captcha waits for a solver (default: 180 seconds)
    #[serde(default = "default_captcha_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            ocr_enabled: true,
            poll_interval: default_captcha_poll_interval(),
            ocr_delay_min_ms: default_ocr_delay_min_ms(),
            ocr_delay_max_ms: default_ocr_delay_max_ms(),
            timeout: default_captcha_timeout(),
        }
    }
}

/// Data storage
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database holding the duplicate index (default: "hoster-dl.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// Main configuration for [`Engine`](crate::Engine)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Directories and debug retention
    #[serde(default)]
    pub general: GeneralConfig,

    /// Download behaviour
    #[serde(default)]
    pub download: DownloadConfig,

    /// Folder/file permissions
    #[serde(default)]
    pub permission: PermissionConfig,

    /// Captcha solving
    #[serde(default)]
    pub captcha: CaptchaConfig,

    /// Data storage
    #[serde(default)]
    pub persistence: PersistenceConfig,
}

impl Config {
    /// Parse and validate a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON configuration file
    pub async fn from_json_file(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| Error::Config {
            message: format!("failed to read '{}': {}", path.display(), e),
            key: None,
        })?;
        Self::from_json_str(&content)
    }

    /// Check values that serde cannot validate on its own
    pub fn validate(&self) -> Result<()> {
        self.permission.folder_mode()?;
        self.permission.file_mode()?;

        if self.download.chunks == 0 {
            return Err(Error::Config {
                message: "chunks must be at least 1".to_string(),
                key: Some("download.chunks".to_string()),
            });
        }
        if self.download.wait_poll_interval.is_zero() {
            return Err(Error::Config {
                message: "wait poll interval must be positive".to_string(),
                key: Some("download.wait_poll_interval".to_string()),
            });
        }
        if self.captcha.poll_interval.is_zero() {
            return Err(Error::Config {
                message: "captcha poll interval must be positive".to_string(),
                key: Some("captcha.poll_interval".to_string()),
            });
        }
        if self.captcha.ocr_delay_min_ms > self.captcha.ocr_delay_max_ms {
            return Err(Error::Config {
                message: "OCR delay lower bound exceeds upper bound".to_string(),
                key: Some("captcha.ocr_delay_min_ms".to_string()),
            });
        }
        Ok(())
    }
}

fn parse_mode(value: &str, key: &str) -> Result<u32> {
    let digits = value.strip_prefix("0o").unwrap_or(value);
    u32::from_str_radix(digits, 8).map_err(|_| Error::Config {
        message: format!("'{}' is not an octal file mode", value),
        key: Some(key.to_string()),
    })
}

// Default value functions
fn default_download_folder() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_tmp_dir() -> PathBuf {
    PathBuf::from("tmp")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("hoster-dl.db")
}

fn default_chunks() -> u32 {
    3
}

fn default_max_retries() -> u32 {
    5
}

fn default_wait_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_captcha_poll_interval() -> Duration {
    Duration::from_secs(1)
}

fn default_ocr_delay_min_ms() -> u64 {
    3000
}

fn default_ocr_delay_max_ms() -> u64 {
    5000
}

fn default_captcha_timeout() -> Duration {
    Duration::from_secs(180)
}

fn default_folder_mode() -> String {
    "0755".to_string()
}

fn default_file_mode() -> String {
    "0644".to_string()
}

fn default_user() -> String {
    "user".to_string()
}

fn default_group() -> String {
    "users".to_string()
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (whole seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
