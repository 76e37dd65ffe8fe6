//! Control signals for a single download attempt
//!
//! Every step of an attempt returns [`Outcome<T>`]. The `Err` side is one of five
//! disjoint signals which the driver in [`crate::engine`] turns into a task status.

use crate::types::TaskId;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result of an attempt step
pub type Outcome<T> = std::result::Result<T, Signal>;

/// Control outcome raised by any step of an attempt
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum Signal {
    /// External cancellation requested for the task
    #[error("aborted")]
    Abort,

    /// Unrecoverable failure for this attempt
    #[error("failed: {0}")]
    Fail(Failure),

    /// Network identity must be rotated before continuing
    #[error("reconnect required")]
    Reconnect,

    /// Restart `process` from the beginning
    #[error("retry: {0}")]
    Retry(String),

    /// Not a failure: the file is already satisfied elsewhere
    #[error("skipped: {0}")]
    Skip(SkipInfo),
}

impl Signal {
    /// Generic failure with a human-readable reason
    pub fn fail(reason: impl Into<String>) -> Self {
        Signal::Fail(Failure::Other(reason.into()))
    }

    /// The resource no longer exists
    pub fn offline() -> Self {
        Signal::Fail(Failure::Offline)
    }

    /// The resource exists but is currently unavailable
    pub fn temp_offline() -> Self {
        Signal::Fail(Failure::TempOffline)
    }

    /// Skip with a free-form reason
    pub fn skip(reason: impl Into<String>) -> Self {
        Signal::Skip(SkipInfo::Reason(reason.into()))
    }
}

/// Reason carried by [`Signal::Fail`]
///
/// The two reserved reasons are typed so the outer scheduler can tell them apart from
/// an arbitrary message without string comparison.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", content = "message", rename_all = "snake_case")]
pub enum Failure {
    /// Resource no longer exists
    #[error("offline")]
    Offline,
    /// Resource exists but is currently unavailable
    #[error("temp. offline")]
    TempOffline,
    /// Any other reason
    #[error("{0}")]
    Other(String),
}

impl Failure {
    /// Permanently offline
    pub fn is_offline(&self) -> bool {
        matches!(self, Failure::Offline)
    }

    /// Temporarily offline
    pub fn is_temp_offline(&self) -> bool {
        matches!(self, Failure::TempOffline)
    }

    /// Whether a later scheduler-level retry is reasonable
    pub fn is_requeueable(&self) -> bool {
        self.is_temp_offline()
    }
}

/// Identifying information carried by [`Signal::Skip`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SkipInfo {
    /// Another live task already covers this file
    #[error("{plugin}")]
    Task {
        /// Plugin of the conflicting task
        plugin: String,
        /// Conflicting task
        id: TaskId,
    },
    /// A local file of sufficient size already exists
    #[error("File exists.")]
    FileExists,
    /// The persistent duplicate index reports a finished file from an earlier session
    #[error("{plugin}")]
    Record {
        /// Plugin that produced the recorded file
        plugin: String,
        /// Task id of the record
        id: TaskId,
    },
    /// Free-form reason
    #[error("{0}")]
    Reason(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_failures_are_distinguishable() {
        let offline = Signal::offline();
        let temp = Signal::temp_offline();
        let generic = Signal::fail("offline-ish message");

        let Signal::Fail(offline) = offline else {
            panic!("offline must be a failure");
        };
        let Signal::Fail(temp) = temp else {
            panic!("temp offline must be a failure");
        };
        let Signal::Fail(generic) = generic else {
            panic!("generic must be a failure");
        };

        assert!(offline.is_offline());
        assert!(!offline.is_requeueable());
        assert!(temp.is_temp_offline());
        assert!(temp.is_requeueable());
        assert!(!generic.is_offline());
        assert!(!generic.is_temp_offline());
    }

    #[test]
    fn test_failure_display_matches_reserved_reasons() {
        assert_eq!(Failure::Offline.to_string(), "offline");
        assert_eq!(Failure::TempOffline.to_string(), "temp. offline");
        assert_eq!(Failure::Other("quota".to_string()).to_string(), "quota");
    }

    #[test]
    fn test_skip_info_names_conflicting_plugin() {
        let info = SkipInfo::Task {
            plugin: "ExampleHoster".to_string(),
            id: TaskId(7),
        };
        assert_eq!(info.to_string(), "ExampleHoster");
        assert_eq!(SkipInfo::FileExists.to_string(), "File exists.");
        assert_eq!(Signal::skip("cached").to_string(), "skipped: cached");
    }
}
