//! Error types for the artifact resolution engine

use thiserror::Error;

/// Result type alias for resolution operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Error types that can occur during artifact resolution
#[derive(Error, Debug, Clone)]
pub enum RelayError {
    #[error("Unable to find storage by ID {0}")]
    StorageNotFound(String),

    #[error("Unable to find repository by ID {repository_id} for storage {storage_id}")]
    RepositoryNotFound {
        storage_id: String,
        repository_id: String,
    },

    #[error("Repository {storage_id}:{repository_id} is out of service")]
    RepositoryUnavailable {
        storage_id: String,
        repository_id: String,
    },

    #[error("Invalid artifact path: {0}")]
    InvalidPath(String),

    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Connection pool for {endpoint} exhausted after {waited_ms} ms")]
    PoolExhausted { endpoint: String, waited_ms: u64 },

    #[error("Upstream fetch failed for {url}: {reason}")]
    UpstreamFetchFailed { url: String, reason: String },

    #[error("Cyclic group reference detected at {0}")]
    CyclicGroupReference(String),

    #[error("Artifact {path} not found in group {storage_id}:{repository_id}")]
    NotFoundInGroup {
        storage_id: String,
        repository_id: String,
        path: String,
        /// Per-member failure reasons, for diagnostics only.
        attempts: Vec<String>,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Directory {0} is not empty (pass force to remove)")]
    DirectoryNotEmpty(String),

    #[error("Stream aborted after {bytes_written} bytes: {reason}")]
    StreamAborted { bytes_written: u64, reason: String },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(String),
}

impl From<std::io::Error> for RelayError {
    fn from(err: std::io::Error) -> Self {
        RelayError::IoError(err.to_string())
    }
}

impl RelayError {
    /// Convert error to HTTP status code for the download endpoint
    ///
    /// Identity errors (unknown storage/repository) map to 500 and an
    /// out-of-service repository maps to 503, matching the administrative
    /// contract of the surrounding application. Artifact misses are 404.
    ///
    /// `StreamAborted` still reports 500 here, but by contract it is only
    /// ever logged: once the first byte has been written the response
    /// status is already committed.
    pub fn to_http_status(&self) -> u16 {
        match self {
            RelayError::StorageNotFound(_) => 500,
            RelayError::RepositoryNotFound { .. } => 500,
            RelayError::RepositoryUnavailable { .. } => 503,

            RelayError::InvalidPath(_) => 400,

            RelayError::NotFound(_) => 404,
            RelayError::NotFoundInGroup { .. } => 404,

            RelayError::PoolExhausted { .. } => 503,
            RelayError::UpstreamFetchFailed { .. } => 502,

            RelayError::Conflict(_) => 409,
            RelayError::DirectoryNotEmpty(_) => 409,

            RelayError::CyclicGroupReference(_) => 500,
            RelayError::StreamAborted { .. } => 500,
            RelayError::ConfigError(_) => 500,
            RelayError::IoError(_) => 500,
        }
    }

    /// Whether this error is an artifact miss rather than an
    /// infrastructure failure
    ///
    /// Misses are the expected negative outcome of a lookup; everything
    /// else indicates something went wrong while trying.
    pub fn is_miss(&self) -> bool {
        matches!(
            self,
            RelayError::NotFound(_) | RelayError::NotFoundInGroup { .. }
        )
    }

    /// Create an UpstreamFetchFailed from a URL and a reason
    pub fn upstream_failed(url: impl Into<String>, reason: impl Into<String>) -> Self {
        RelayError::UpstreamFetchFailed {
            url: url.into(),
            reason: reason.into(),
        }
    }
}
