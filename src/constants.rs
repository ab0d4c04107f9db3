//! # System Constants
//!
//! Operational boundaries of the collection and synchronization engine:
//! upload sizing, retry policy defaults, storage buffering, and the event
//! names published during a run.

/// Maximum number of graph objects in a single upload batch.
pub const UPLOAD_BATCH_SIZE: usize = 250;

/// Number of upload batches dispatched in parallel within one upload call.
pub const UPLOAD_CONCURRENCY: usize = 6;

/// Upper bound on a serialized upload payload: 6 MB minus a 16 KB header
/// reserve.
pub const UPLOAD_SIZE_MAX: usize = 6_275_072;

/// Maximum attempts for a single upload chunk.
pub const UPLOAD_RETRY_MAX_ATTEMPTS: u32 = 5;

/// Delay before the first upload retry, in milliseconds.
pub const UPLOAD_RETRY_INITIAL_DELAY_MS: u64 = 200;

/// Multiplicative backoff factor between upload retries.
pub const UPLOAD_RETRY_FACTOR: f64 = 1.05;

/// Buffered graph objects per step before the store materializes a batch
/// file on disk.
pub const GRAPH_OBJECT_BUFFER_THRESHOLD: usize = 500;

/// Correlation header attached to every persister upload request.
pub const CORRELATION_ID_HEADER: &str = "JupiterOne-Correlation-Id";

/// Source identifier sent when initiating a synchronization job.
pub const SYNCHRONIZATION_SOURCE: &str = "integration-managed";

/// File name of the execution summary written to the storage root.
pub const SUMMARY_FILE_NAME: &str = "summary.json";

/// Lifecycle events published during a run
pub mod events {
    // Step lifecycle events
    pub const STEP_START: &str = "step.start";
    pub const STEP_END: &str = "step.end";
    pub const STEP_FAILURE: &str = "step.failure";
    pub const STEP_CACHED: &str = "step.cached";

    // Synchronization lifecycle events
    pub const SYNC_INITIATED: &str = "sync.initiated";
    pub const SYNC_UPLOAD_START: &str = "sync.upload_start";
    pub const SYNC_UPLOAD_END: &str = "sync.upload_end";
    pub const SYNC_FINALIZED: &str = "sync.finalized";
    pub const SYNC_ABORTED: &str = "sync.aborted";
}
