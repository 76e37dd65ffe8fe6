//! Error types for hoster-dl
//!
//! Infrastructure failures (configuration, persistence, transport, I/O) are modelled
//! here as ordinary `thiserror` enums. The per-attempt control channel lives in
//! [`crate::signal`]; every [`Error`] converts into [`Signal::Fail`] so that `?`
//! works inside hoster steps.

use crate::signal::{Failure, Signal};
use thiserror::Error;

/// Result type alias for hoster-dl infrastructure operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for hoster-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "permission.folder")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Transport (HTTP) failure
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Account login or session failure
    #[error("account error: {0}")]
    Account(String),

    /// Captcha solver failure (OCR engine or broker)
    #[error("captcha error: {0}")]
    Captcha(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid regular expression in a download check rule
    #[error("invalid rule pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Errors reported by a [`Transport`](crate::transport::Transport)
///
/// A "bad header" (non-success status line) is kept distinct from generic I/O and
/// connection failures so hosters can react to specific status codes.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Server answered with an error status code
    #[error("bad response header {code} for {url}")]
    BadHeader {
        /// HTTP status code
        code: u16,
        /// Requested URL
        url: String,
    },

    /// HTTP client error (connect, timeout, body decoding)
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Local I/O failure while writing the transferred file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid URL
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Other transport failure
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Status code of a bad-header error, if this is one
    pub fn status_code(&self) -> Option<u16> {
        match self {
            TransportError::BadHeader { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<Error> for Signal {
    fn from(err: Error) -> Self {
        Signal::Fail(Failure::Other(err.to_string()))
    }
}

impl From<TransportError> for Signal {
    fn from(err: TransportError) -> Self {
        Error::Transport(err).into()
    }
}

impl From<std::io::Error> for Signal {
    fn from(err: std::io::Error) -> Self {
        Error::Io(err).into()
    }
}
