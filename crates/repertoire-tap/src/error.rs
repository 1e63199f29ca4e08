//! Error types for TAP_SCHEMA updates.

use std::path::PathBuf;

use thiserror::Error;

use crate::store::StoreError;

/// Result type alias for TAP_SCHEMA operations.
pub type TapResult<T> = Result<T, TapError>;

/// Boxed error from a download backend (HTTP client or object store).
pub type BackendError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that abort a TAP_SCHEMA update run.
///
/// None of these are retried internally.
#[derive(Debug, Error)]
pub enum TapError {
    #[error("unsupported URL scheme: '{scheme}'; supported schemes: gs, http, https")]
    UnsupportedScheme { scheme: String },

    #[error("invalid source URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("failed to download schema version {version} from {url}: {source}")]
    Download {
        url: String,
        version: String,
        #[source]
        source: BackendError,
    },

    #[error("failed to extract archive {}: {reason}", archive.display())]
    Extraction { archive: PathBuf, reason: String },

    #[error("invalid schema directory {}: {reason}", path.display())]
    Directory { path: PathBuf, reason: String },

    #[error("schema not found: {name}; available: [{}]", available.join(", "))]
    SchemaNotFound { name: String, available: Vec<String> },

    #[error("invalid schema document {}: {reason}", path.display())]
    Document { path: PathBuf, reason: String },

    #[error("validation failed for schema version {version}: expected {expected} schemas but found {found}")]
    Validation {
        expected: usize,
        found: usize,
        version: String,
    },

    #[error("{step} failed: {source}")]
    Store {
        step: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("another TAP_SCHEMA update holds the update lock on this database")]
    Locked,

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TapError {
    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(std::io::Error) -> TapError {
        let path = path.into();
        move |source| TapError::Io { path, source }
    }
}

/// Attach the failing step to a store error.
pub(crate) fn during(step: &'static str) -> impl FnOnce(StoreError) -> TapError {
    move |source| TapError::Store { step, source }
}
