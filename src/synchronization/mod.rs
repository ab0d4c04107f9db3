//! # Synchronization Pipeline
//!
//! Job lifecycle against the remote persistence service: initiate a job,
//! stream every persisted graph object batch through the chunked uploader,
//! then finalize — or abort on any failure. Lifecycle events ride a
//! serialized side-channel queue that is drained before the pipeline
//! returns, success or failure.

pub mod client;
pub mod event_queue;
pub mod shrink;
pub mod uploader;

pub use client::{SynchronizationApiClient, SynchronizationApiConfig, UploadDataKind};
pub use event_queue::{forward_events, SynchronizationEventQueue};
pub use shrink::{shrink_raw_data, ShrinkRawDataResult};
pub use uploader::{
    upload_graph_object_data, StepDataUploader, SynchronizationUploaderFactory,
};

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, instrument};

use crate::constants::{
    events, UPLOAD_RETRY_FACTOR, UPLOAD_RETRY_INITIAL_DELAY_MS, UPLOAD_RETRY_MAX_ATTEMPTS,
};
use crate::errors::IntegrationResult;
use crate::events::PublishedEvent;
use crate::storage::FileSystemGraphObjectStore;
use crate::types::{PartialDatasets, SynchronizationJob};

/// Retry policy for upload chunks. The factor is deliberately configurable;
/// the default is close enough to 1 that retries are effectively
/// fixed-delay.
#[derive(Debug, Clone)]
pub struct UploadRetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub factor: f64,
}

impl Default for UploadRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: UPLOAD_RETRY_MAX_ATTEMPTS,
            initial_delay: Duration::from_millis(UPLOAD_RETRY_INITIAL_DELAY_MS),
            factor: UPLOAD_RETRY_FACTOR,
        }
    }
}

/// An initiated synchronization job plus everything needed to feed it.
#[derive(Debug)]
pub struct SynchronizationJobContext {
    pub client: Arc<SynchronizationApiClient>,
    pub job: SynchronizationJob,
    pub retry: UploadRetryConfig,
}

impl SynchronizationJobContext {
    pub fn new(client: Arc<SynchronizationApiClient>, job: SynchronizationJob) -> Self {
        Self {
            client,
            job,
            retry: UploadRetryConfig::default(),
        }
    }

    pub fn with_retry(mut self, retry: UploadRetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

/// Initiate a synchronization job for an integration instance.
pub async fn initiate_synchronization(
    client: Arc<SynchronizationApiClient>,
    instance_id: &str,
) -> IntegrationResult<SynchronizationJobContext> {
    let job = client.create_job(instance_id).await?;
    info!(
        job_id = %job.id,
        integration_job_id = job.integration_job_id.as_deref(),
        integration_instance_id = job.integration_instance_id.as_deref(),
        "Synchronization job initiated"
    );
    Ok(SynchronizationJobContext::new(client, job))
}

/// Upload every persisted graph object batch file to the job.
pub async fn upload_collected_data(
    context: &SynchronizationJobContext,
    storage: &FileSystemGraphObjectStore,
) -> IntegrationResult<()> {
    storage
        .iterate_flushed_data(|data| {
            upload_graph_object_data(context, data.entities, data.relationships)
        })
        .await
}

/// Full synchronization: initiate → upload collected data → finalize. Any
/// failure aborts the job; an abort failure is logged and re-raised in
/// preference to the original error. The event queue is drained before
/// returning, regardless of outcome.
#[instrument(skip_all, fields(integration_instance_id = %instance_id))]
pub async fn synchronize_collected_data(
    client: Arc<SynchronizationApiClient>,
    instance_id: &str,
    storage: &FileSystemGraphObjectStore,
    partial_datasets: &PartialDatasets,
) -> IntegrationResult<SynchronizationJob> {
    let context = initiate_synchronization(client.clone(), instance_id).await?;
    let event_queue = SynchronizationEventQueue::new(client.clone(), context.job.id.clone());
    event_queue.enqueue(PublishedEvent::new(
        events::SYNC_INITIATED,
        format!("Synchronization job '{}' initiated", context.job.id),
    ));

    let outcome = run_upload_and_finalize(&context, storage, partial_datasets, &event_queue).await;

    let result = match outcome {
        Ok(job) => {
            info!(job_id = %job.id, status = ?job.status, "Synchronization job finalized");
            event_queue.enqueue(PublishedEvent::new(
                events::SYNC_FINALIZED,
                format!("Synchronization job '{}' finalized", context.job.id),
            ));
            Ok(job)
        }
        Err(upload_error) => {
            error!(
                job_id = %context.job.id,
                error = %upload_error,
                code = upload_error.code(),
                "Synchronization failed; aborting job"
            );
            event_queue.enqueue(PublishedEvent::new(
                events::SYNC_ABORTED,
                format!("Synchronization job '{}' aborted: {upload_error}", context.job.id),
            ));
            match context
                .client
                .abort_job(&context.job.id, &format!("Upload failed: {upload_error}"))
                .await
            {
                Ok(_) => Err(upload_error),
                Err(abort_error) => {
                    error!(
                        job_id = %context.job.id,
                        error = %abort_error,
                        "Failed to abort synchronization job"
                    );
                    Err(abort_error)
                }
            }
        }
    };

    event_queue.wait_until_idle().await;
    result
}

async fn run_upload_and_finalize(
    context: &SynchronizationJobContext,
    storage: &FileSystemGraphObjectStore,
    partial_datasets: &PartialDatasets,
    event_queue: &SynchronizationEventQueue,
) -> IntegrationResult<SynchronizationJob> {
    event_queue.enqueue(PublishedEvent::new(
        events::SYNC_UPLOAD_START,
        format!("Uploading collected data to job '{}'", context.job.id),
    ));
    upload_collected_data(context, storage).await?;
    event_queue.enqueue(PublishedEvent::new(
        events::SYNC_UPLOAD_END,
        format!("Finished uploading collected data to job '{}'", context.job.id),
    ));
    context
        .client
        .finalize_job(&context.job.id, partial_datasets)
        .await
}
