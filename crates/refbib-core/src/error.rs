//! Error types for refbib-core

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for refbib operations
pub type Result<T> = std::result::Result<T, RefbibError>;

/// Main error type for refbib operations
#[derive(Error, Debug)]
pub enum RefbibError {
    /// A bibliography or style file could not be located.
    #[error("not found: cannot access '{0}'")]
    NotFound(PathBuf),

    /// The external converter is missing or failed after all retries.
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// A programming-contract violation, e.g. building an engine without
    /// style or locale text in the caches.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The remote reference manager did not respond. Callers treat this as
    /// "no change", never as fatal.
    #[error("remote unreachable: {0}")]
    RemoteUnreachable(String),

    /// Malformed JSON, RPC payload, or record text.
    #[error("parse error: {0}")]
    Parse(String),

    /// Filesystem error outside the NotFound cases.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Network failure fetching a style or locale.
    #[error("http error: {0}")]
    Http(String),
}

impl From<serde_json::Error> for RefbibError {
    fn from(err: serde_json::Error) -> Self {
        RefbibError::Parse(err.to_string())
    }
}

impl From<reqwest::Error> for RefbibError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            RefbibError::RemoteUnreachable(err.to_string())
        } else {
            RefbibError::Http(err.to_string())
        }
    }
}
