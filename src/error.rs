use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

/// Failure talking to one of the Mapillary endpoints.
#[derive(Debug, Error, Diagnostic)]
pub enum RemoteError {
    #[error("Mapillary request failed: {0}")]
    Http(String),

    #[error("request to the Mapillary API timed out")]
    Timeout,

    #[error("Mapillary returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("failed to decode Mapillary response: {0}")]
    Decode(String),
}

#[derive(Debug, Error, Diagnostic)]
pub enum ResolutionError {
    #[error("invalid username: {0:?}")]
    InvalidUsername(String),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Remote(#[from] RemoteError),

    #[error("no Mapillary user named {0}")]
    NotFound(String),

    #[error("malformed user search response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error, Diagnostic)]
pub enum FetchError {
    #[error("invalid sequence format: {0} (expected json or gpx)")]
    InvalidFormat(String),

    #[error("invalid time range: start {start} is after end {end}")]
    InvalidTimeRange { start: String, end: String },

    #[error("could not resolve user")]
    Resolution(#[from] ResolutionError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Remote(#[from] RemoteError),

    #[error("malformed sequences response: {0}")]
    Malformed(String),
}

#[derive(Debug, Error, Diagnostic)]
pub enum MergeError {
    #[error("could not fetch sequences to merge")]
    FetchFailed(#[from] FetchError),

    #[error(
        "sequence {index} has {image_keys} image keys but {coordinates} coordinates; merge aborted"
    )]
    Inconsistent {
        index: usize,
        image_keys: usize,
        coordinates: usize,
    },
}

#[derive(Debug, Error, Diagnostic)]
pub enum PersistError {
    #[error("could not fetch sequences to save")]
    Fetch(#[from] FetchError),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

#[derive(Debug, Error, Diagnostic)]
pub enum MaterializeError {
    #[error("filesystem error: {0}")]
    Filesystem(String),

    #[error("invalid image key: {0:?}")]
    InvalidImageKey(String),

    #[error("download of image {key} failed")]
    Download {
        key: String,
        #[source]
        source: RemoteError,
    },

    #[error("failed to write image {key}: {message}")]
    Write { key: String, message: String },
}

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read settings file at {0}")]
    Read(PathBuf),

    #[error("failed to parse settings file: {0}")]
    Parse(String),
}

#[derive(Debug, Error, Diagnostic)]
pub enum DownloadError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Materialize(#[from] MaterializeError),
}
