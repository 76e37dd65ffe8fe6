//! Core types for hoster-dl

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::signal::{Failure, SkipInfo};

/// Unique identifier for a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl TaskId {
    /// Create a new TaskId
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    /// Get the inner i64 value
    pub fn get(&self) -> i64 {
        self.0
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl From<TaskId> for i64 {
    fn from(id: TaskId) -> Self {
        id.0
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Task status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Created by the scheduler, not started
    Created,
    /// Attempt running (setup/process)
    Starting,
    /// Throttled, waiting for the wait-until deadline
    Waiting,
    /// File transfer in progress
    Downloading,
    /// Resource no longer exists
    Offline,
    /// Satisfied elsewhere, not transferred
    Skipped,
    /// Successfully completed
    Finished,
    /// Failed with error
    Failed,
    /// Cancelled externally
    Aborted,
}

impl Status {
    /// Whether the status ends the task's lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Status::Offline | Status::Skipped | Status::Finished | Status::Failed | Status::Aborted
        )
    }

    /// Convert integer status code to Status enum
    pub fn from_i32(status: i32) -> Self {
        match status {
            0 => Status::Finished,
            1 => Status::Offline,
            2 => Status::Created,
            3 => Status::Skipped,
            4 => Status::Waiting,
            5 => Status::Starting,
            6 => Status::Aborted,
            7 => Status::Failed,
            8 => Status::Downloading,
            _ => Status::Failed, // Default to Failed for unknown status
        }
    }

    /// Convert Status enum to integer status code
    pub fn to_i32(&self) -> i32 {
        match self {
            Status::Finished => 0,
            Status::Offline => 1,
            Status::Created => 2,
            Status::Skipped => 3,
            Status::Waiting => 4,
            Status::Starting => 5,
            Status::Aborted => 6,
            Status::Failed => 7,
            Status::Downloading => 8,
        }
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Status::Created => "created",
            Status::Starting => "starting",
            Status::Waiting => "waiting",
            Status::Downloading => "downloading",
            Status::Offline => "offline",
            Status::Skipped => "skipped",
            Status::Finished => "finished",
            Status::Failed => "failed",
            Status::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Package a task belongs to
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Package identifier
    pub id: i64,
    /// Folder (relative to the download folder) files of this package land in
    pub folder: String,
    /// Password for archives in this package
    pub password: Option<String>,
}

/// Result of a post-download checksum comparison
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumResult {
    /// Digest matches
    Ok,
    /// Digest differs
    Wrong,
    /// Nothing to hash (no downloaded file)
    Unavailable,
    /// No expected digest known for this file
    NotImplemented,
}

impl ChecksumResult {
    /// Numeric code used by status reports
    pub fn code(&self) -> u8 {
        match self {
            ChecksumResult::Ok => 0,
            ChecksumResult::Wrong => 1,
            ChecksumResult::Unavailable => 5,
            ChecksumResult::NotImplemented => 10,
        }
    }
}

/// Event emitted during a task's lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Task status changed
    StatusChanged {
        /// Task ID
        id: TaskId,
        /// New status
        status: Status,
    },

    /// File transfer is about to start
    DownloadStarts {
        /// Task ID
        id: TaskId,
        /// Source URL
        url: String,
        /// Destination path
        path: PathBuf,
    },

    /// Transfer progress
    Progress {
        /// Task ID
        id: TaskId,
        /// Bytes transferred
        transferred: u64,
        /// Progress fraction (0.0 to 1.0)
        fraction: f32,
    },

    /// A captcha was queued for a solver
    CaptchaQueued {
        /// Task ID
        id: TaskId,
        /// Captcha task ID
        captcha_id: u64,
    },

    /// Task finished successfully
    Finished {
        /// Task ID
        id: TaskId,
        /// Final file location
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
    },

    /// Task failed
    Failed {
        /// Task ID
        id: TaskId,
        /// Failure reason
        reason: Failure,
    },

    /// Task skipped
    Skipped {
        /// Task ID
        id: TaskId,
        /// Why it was skipped
        info: SkipInfo,
    },

    /// Task aborted
    Aborted {
        /// Task ID
        id: TaskId,
    },
}
