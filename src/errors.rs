//! Error types for the collection and synchronization engine.
//!
//! A single crate-wide error enum keeps error handling uniform across the
//! scheduler, job state, and synchronization pipeline. Errors carry a stable
//! code for reporting and a fatality marker that the scheduler uses to decide
//! whether a failure aborts the whole run or only the step that raised it.

use thiserror::Error;

/// Result type for engine operations
pub type IntegrationResult<T> = Result<T, IntegrationError>;

#[derive(Debug, Error)]
pub enum IntegrationError {
    /// Missing/invalid configuration or an invalid dependency graph.
    /// Always raised before any step executes.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An execution handler failed. Non-fatal unless wrapped in `Fatal`.
    #[error("Step '{step_id}' failed: {reason}")]
    StepFailure { step_id: String, reason: String },

    /// A graph object `_key` was already admitted earlier in the run.
    #[error("Duplicate graph object key '{key}' rejected while executing step '{step_id}'")]
    DuplicateKey { key: String, step_id: String },

    /// Transport or HTTP failure against the persister API. `code` is the
    /// server-reported error code when the response body carried one.
    #[error("Synchronization API error: {message} (code: {code:?}, status: {status:?})")]
    SynchronizationApi {
        code: Option<String>,
        status: Option<u16>,
        message: String,
    },

    /// The server reported the job no longer accepts uploads. Fatal: further
    /// retries cannot succeed.
    #[error("Synchronization job no longer accepts uploads: {0}")]
    UploadAfterJobEnded(String),

    /// An upload payload could not be made to fit the size cap.
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    /// Graph object store failure outside plain I/O.
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Explicit fatal marker. The scheduler pauses admission and rejects the
    /// run with the wrapped error.
    #[error("{0}")]
    Fatal(#[source] Box<IntegrationError>),
}

impl IntegrationError {
    /// Wrap an error so the scheduler treats it as run-terminating.
    pub fn fatal(error: IntegrationError) -> Self {
        Self::Fatal(Box::new(error))
    }

    /// Whether this error aborts the entire run rather than a single step.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_) | Self::UploadAfterJobEnded(_))
    }

    /// Stable error code for reporting and event payloads.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Configuration(_) => "CONFIGURATION_ERROR",
            Self::StepFailure { .. } => "STEP_EXECUTION_FAILED",
            Self::DuplicateKey { .. } => "DUPLICATE_KEY_DETECTED",
            Self::SynchronizationApi { .. } => "SYNCHRONIZATION_API_ERROR",
            Self::UploadAfterJobEnded(_) => "INTEGRATION_UPLOAD_AFTER_JOB_ENDED",
            Self::UploadFailed(_) => "INTEGRATION_UPLOAD_FAILED",
            Self::Storage(_) => "STORAGE_ERROR",
            Self::Io(_) => "IO_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Fatal(inner) => inner.code(),
        }
    }
}

impl From<reqwest::Error> for IntegrationError {
    fn from(error: reqwest::Error) -> Self {
        IntegrationError::SynchronizationApi {
            code: None,
            status: error.status().map(|s| s.as_u16()),
            message: error.to_string(),
        }
    }
}
