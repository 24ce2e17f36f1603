// Error types for niced-request.
// Covers request validation, organizer policy failures, transport errors,
// and cache storage faults.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid request: identifier is empty")]
    InvalidRequest,

    #[error("organizer policy failed: {0}")]
    Policy(#[from] PolicyError),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("cache entry at {path} exists but could not be read: {source}")]
    CacheCorrupt { path: PathBuf, source: io::Error },

    #[error("request was abandoned before its fetch completed")]
    Cancelled,

    #[error("cache I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Failure raised by an [`Organizer`](crate::Organizer) or by segment
/// sanitization when a policy returns an unusable sub-location.
#[derive(Error, Debug, Clone)]
#[error("{0}")]
pub struct PolicyError(pub String);

/// Transport-level fetch failure.
///
/// Carries rendered messages rather than source errors so a single in-flight
/// outcome can be cloned out to every caller waiting on the same key.
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("unexpected status {status} for {url}")]
    Status { status: u16, url: String },
}
