//! Error types shared by the backup core.
//!
//! Fatal conditions abort a run and surface as [`BackupError`]. Per-item
//! conditions surface as [`ExportError`] and are folded into outcomes by the
//! worker pool, never propagated past it.

use std::path::PathBuf;
use thiserror::Error;

/// Failure talking to the GitHub API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("authentication failed ({status}): {message}")]
    Unauthorized { status: u16, message: String },

    #[error("GitHub API returned {status} for {url}: {message}")]
    Status {
        status: u16,
        url: String,
        message: String,
    },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("request timed out after {0}s")]
    Timeout(u64),

    #[error(transparent)]
    Octocrab(#[from] octocrab::Error),
}

impl ApiError {
    /// Whether the error is an authentication/authorization rejection.
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }
}

/// Pagination stopped before the final page.
///
/// `partial` holds every descriptor collected before the failing page, so a
/// caller can still act on a truncated listing when `page > 1`.
#[derive(Debug, Error)]
#[error("listing {resource} failed on page {page}: {source}")]
pub struct ListingError<T: std::fmt::Debug> {
    pub resource: &'static str,
    pub page: u32,
    pub partial: Vec<T>,
    #[source]
    pub source: ApiError,
}

impl<T: std::fmt::Debug> ListingError<T> {
    pub fn is_first_page(&self) -> bool {
        self.page <= 1
    }
}

/// Failure exporting a single repository or gist.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),

    #[error("git clone failed ({status}): {output}")]
    Clone { status: String, output: String },

    #[error("git remote update failed ({status}): {output}")]
    Update { status: String, output: String },

    #[error("failed to run git: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize metadata: {0}")]
    Metadata(#[from] serde_json::Error),
}

/// A condition that makes the whole run meaningless.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("could not resolve the acting username: {0}")]
    UsernameResolution(String),

    #[error("could not list {resource}: {source}")]
    Listing {
        resource: &'static str,
        #[source]
        source: ApiError,
    },

    #[error("could not create output directory {path}: {source}")]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
