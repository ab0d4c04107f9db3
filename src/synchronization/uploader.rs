//! Chunked, retried graph object uploads.
//!
//! Collections are split into batches of at most `UPLOAD_BATCH_SIZE` and
//! dispatched up to `UPLOAD_CONCURRENCY` at a time. Each batch retries with
//! multiplicative backoff; an HTTP 413 shrinks the batch in place before the
//! next attempt, and a server-reported `JOB_NOT_AWAITING_UPLOADS` stops
//! retrying immediately with a fatal error.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::constants::{UPLOAD_BATCH_SIZE, UPLOAD_CONCURRENCY, UPLOAD_SIZE_MAX};
use crate::errors::{IntegrationError, IntegrationResult};
use crate::execution::{StepGraphObjectDataUploader, StepUploaderFactory};
use crate::synchronization::client::UploadDataKind;
use crate::synchronization::shrink::{shrink_raw_data, ShrinkRawDataResult};
use crate::synchronization::SynchronizationJobContext;
use crate::types::{Entity, Relationship};

/// What the retry loop should do with a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum UploadErrorDisposition {
    /// Payload too large: shrink in place and retry the same batch.
    ShrinkAndRetry,
    /// The job no longer accepts uploads: stop immediately, fatal.
    FatalJobEnded,
    /// Transient credentials problem: retry without a warning log.
    SilentRetry,
    /// Anything else: warn and retry.
    WarnRetry,
}

fn classify_upload_error(error: &IntegrationError) -> UploadErrorDisposition {
    if let IntegrationError::SynchronizationApi { code, status, .. } = error {
        if *status == Some(413) || code.as_deref() == Some("RequestEntityTooLargeException") {
            return UploadErrorDisposition::ShrinkAndRetry;
        }
        if code.as_deref() == Some("JOB_NOT_AWAITING_UPLOADS") {
            return UploadErrorDisposition::FatalJobEnded;
        }
        if code.as_deref() == Some("CredentialsError") {
            return UploadErrorDisposition::SilentRetry;
        }
    }
    UploadErrorDisposition::WarnRetry
}

fn shrink_entity_batch(batch: &mut Vec<Entity>) -> IntegrationResult<ShrinkRawDataResult> {
    shrink_raw_data(batch, UPLOAD_SIZE_MAX)
}

fn shrink_relationship_batch(
    _batch: &mut Vec<Relationship>,
) -> IntegrationResult<ShrinkRawDataResult> {
    Err(IntegrationError::UploadFailed(
        "Cannot shrink upload payload: relationships carry no raw data to truncate".to_string(),
    ))
}

/// Upload one step's collected graph objects: entities first, then
/// relationships, each chunked and dispatched in parallel.
#[instrument(skip_all, fields(
    job_id = %context.job.id,
    entities = entities.len(),
    relationships = relationships.len(),
))]
pub async fn upload_graph_object_data(
    context: &SynchronizationJobContext,
    entities: Vec<Entity>,
    relationships: Vec<Relationship>,
) -> IntegrationResult<()> {
    if !entities.is_empty() {
        upload_in_batches(
            context,
            UploadDataKind::Entities,
            entities,
            &shrink_entity_batch,
        )
        .await?;
    }
    if !relationships.is_empty() {
        upload_in_batches(
            context,
            UploadDataKind::Relationships,
            relationships,
            &shrink_relationship_batch,
        )
        .await?;
    }
    Ok(())
}

async fn upload_in_batches<T, S>(
    context: &SynchronizationJobContext,
    kind: UploadDataKind,
    objects: Vec<T>,
    shrink: &S,
) -> IntegrationResult<()>
where
    T: Serialize + Send,
    S: Fn(&mut Vec<T>) -> IntegrationResult<ShrinkRawDataResult> + Sync,
{
    let chunks = into_chunks(objects, UPLOAD_BATCH_SIZE);
    debug!(kind = kind.field_name(), batches = chunks.len(), "Dispatching upload batches");

    let mut uploads = futures::stream::iter(chunks.into_iter().map(|mut chunk| async move {
        upload_chunk_with_retry(context, kind, &mut chunk, shrink).await
    }))
    .buffer_unordered(UPLOAD_CONCURRENCY);

    while let Some(result) = uploads.next().await {
        result?;
    }
    Ok(())
}

/// Upload a single batch with the configured retry policy. A fresh
/// correlation id covers the whole retry group.
pub(crate) async fn upload_chunk_with_retry<T, S>(
    context: &SynchronizationJobContext,
    kind: UploadDataKind,
    batch: &mut Vec<T>,
    shrink: &S,
) -> IntegrationResult<()>
where
    T: Serialize,
    S: Fn(&mut Vec<T>) -> IntegrationResult<ShrinkRawDataResult>,
{
    let correlation_id = Uuid::new_v4();
    let mut delay = context.retry.initial_delay;
    let mut attempt = 1u32;

    loop {
        let error = match context
            .client
            .upload_batch(&context.job.id, kind, batch, &correlation_id)
            .await
        {
            Ok(()) => return Ok(()),
            Err(error) => error,
        };

        match classify_upload_error(&error) {
            UploadErrorDisposition::FatalJobEnded => {
                return Err(IntegrationError::UploadAfterJobEnded(format!(
                    "Synchronization job '{}' is no longer awaiting uploads",
                    context.job.id
                )));
            }
            UploadErrorDisposition::ShrinkAndRetry => {
                // Shrink failures (nothing left to truncate) propagate as a
                // non-fatal upload failure.
                let shrunk = shrink(batch)?;
                warn!(
                    correlation_id = %correlation_id,
                    initial_size = shrunk.initial_size,
                    total_size = shrunk.total_size,
                    items_removed = shrunk.items_removed,
                    "Upload payload too large; truncated raw data and retrying"
                );
            }
            UploadErrorDisposition::SilentRetry => {}
            UploadErrorDisposition::WarnRetry => {
                warn!(
                    correlation_id = %correlation_id,
                    attempt,
                    max_attempts = context.retry.max_attempts,
                    error = %error,
                    "Upload attempt failed; retrying"
                );
            }
        }

        if attempt >= context.retry.max_attempts {
            return Err(wrap_exhausted_error(error));
        }
        tokio::time::sleep(delay).await;
        delay = delay.mul_f64(context.retry.factor);
        attempt += 1;
    }
}

/// The last error after exhausting retries, wrapped as a synchronization
/// API error when it is not one already.
fn wrap_exhausted_error(error: IntegrationError) -> IntegrationError {
    match error {
        api @ IntegrationError::SynchronizationApi { .. } => api,
        other => IntegrationError::SynchronizationApi {
            code: None,
            status: None,
            message: format!("Upload failed after retries: {other}"),
        },
    }
}

fn into_chunks<T>(mut objects: Vec<T>, size: usize) -> Vec<Vec<T>> {
    let mut chunks = Vec::new();
    while objects.len() > size {
        let rest = objects.split_off(size);
        chunks.push(std::mem::replace(&mut objects, rest));
    }
    if !objects.is_empty() {
        chunks.push(objects);
    }
    chunks
}

#[derive(Default)]
struct UploaderState {
    pending_entities: Vec<Entity>,
    pending_relationships: Vec<Relationship>,
    tasks: JoinSet<IntegrationResult<()>>,
}

/// Per-step upload sink. Enqueued objects accumulate into
/// `UPLOAD_BATCH_SIZE` chunks that upload in the background behind a shared
/// concurrency bound; `wait_until_uploads_complete` flushes the remainder
/// and drains every task.
pub struct StepDataUploader {
    step_id: String,
    context: Arc<SynchronizationJobContext>,
    semaphore: Arc<Semaphore>,
    state: Mutex<UploaderState>,
}

impl StepDataUploader {
    pub fn new(step_id: impl Into<String>, context: Arc<SynchronizationJobContext>) -> Self {
        Self {
            step_id: step_id.into(),
            context,
            semaphore: Arc::new(Semaphore::new(UPLOAD_CONCURRENCY)),
            state: Mutex::new(UploaderState::default()),
        }
    }

    fn spawn_entity_upload(&self, state: &mut UploaderState, chunk: Vec<Entity>) {
        let context = self.context.clone();
        let semaphore = self.semaphore.clone();
        state.tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.map_err(|_| {
                IntegrationError::UploadFailed("Upload semaphore closed".to_string())
            })?;
            let mut chunk = chunk;
            upload_chunk_with_retry(
                &context,
                UploadDataKind::Entities,
                &mut chunk,
                &shrink_entity_batch,
            )
            .await
        });
    }

    fn spawn_relationship_upload(&self, state: &mut UploaderState, chunk: Vec<Relationship>) {
        let context = self.context.clone();
        let semaphore = self.semaphore.clone();
        state.tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.map_err(|_| {
                IntegrationError::UploadFailed("Upload semaphore closed".to_string())
            })?;
            let mut chunk = chunk;
            upload_chunk_with_retry(
                &context,
                UploadDataKind::Relationships,
                &mut chunk,
                &shrink_relationship_batch,
            )
            .await
        });
    }
}

#[async_trait]
impl StepGraphObjectDataUploader for StepDataUploader {
    async fn enqueue_entities(&self, entities: Vec<Entity>) -> IntegrationResult<()> {
        let mut state = self.state.lock().await;
        state.pending_entities.extend(entities);
        while state.pending_entities.len() >= UPLOAD_BATCH_SIZE {
            let rest = state.pending_entities.split_off(UPLOAD_BATCH_SIZE);
            let chunk = std::mem::replace(&mut state.pending_entities, rest);
            self.spawn_entity_upload(&mut state, chunk);
        }
        Ok(())
    }

    async fn enqueue_relationships(
        &self,
        relationships: Vec<Relationship>,
    ) -> IntegrationResult<()> {
        let mut state = self.state.lock().await;
        state.pending_relationships.extend(relationships);
        while state.pending_relationships.len() >= UPLOAD_BATCH_SIZE {
            let rest = state.pending_relationships.split_off(UPLOAD_BATCH_SIZE);
            let chunk = std::mem::replace(&mut state.pending_relationships, rest);
            self.spawn_relationship_upload(&mut state, chunk);
        }
        Ok(())
    }

    async fn wait_until_uploads_complete(&self) -> IntegrationResult<()> {
        let mut state = self.state.lock().await;

        let remaining_entities = std::mem::take(&mut state.pending_entities);
        if !remaining_entities.is_empty() {
            self.spawn_entity_upload(&mut state, remaining_entities);
        }
        let remaining_relationships = std::mem::take(&mut state.pending_relationships);
        if !remaining_relationships.is_empty() {
            self.spawn_relationship_upload(&mut state, remaining_relationships);
        }

        let mut first_error = None;
        while let Some(joined) = state.tasks.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(join_error) => Err(IntegrationError::UploadFailed(format!(
                    "Upload task aborted: {join_error}"
                ))),
            };
            if let Err(error) = result {
                warn!(step_id = %self.step_id, error = %error, "Step upload failed");
                if first_error.is_none() {
                    first_error = Some(error);
                }
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

/// Creates a `StepDataUploader` for each dispatched step once a
/// synchronization job is active.
pub struct SynchronizationUploaderFactory {
    context: Arc<SynchronizationJobContext>,
}

impl SynchronizationUploaderFactory {
    pub fn new(context: Arc<SynchronizationJobContext>) -> Self {
        Self { context }
    }
}

impl StepUploaderFactory for SynchronizationUploaderFactory {
    fn create_step_uploader(&self, step_id: &str) -> Arc<dyn StepGraphObjectDataUploader> {
        Arc::new(StepDataUploader::new(step_id, self.context.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunks_split_at_batch_size() {
        let objects: Vec<u32> = (0..600).collect();
        let chunks = into_chunks(objects, 250);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].len(), 250);
        assert_eq!(chunks[1].len(), 250);
        assert_eq!(chunks[2].len(), 100);
        assert_eq!(chunks[0][0], 0);
        assert_eq!(chunks[2][99], 599);
    }

    #[test]
    fn small_collections_form_one_chunk() {
        let chunks = into_chunks(vec![1, 2, 3], 250);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], vec![1, 2, 3]);
    }

    #[test]
    fn classification_matches_retry_table() {
        let too_large = IntegrationError::SynchronizationApi {
            code: None,
            status: Some(413),
            message: "too large".to_string(),
        };
        assert_eq!(
            classify_upload_error(&too_large),
            UploadErrorDisposition::ShrinkAndRetry
        );

        let too_large_by_code = IntegrationError::SynchronizationApi {
            code: Some("RequestEntityTooLargeException".to_string()),
            status: Some(400),
            message: "too large".to_string(),
        };
        assert_eq!(
            classify_upload_error(&too_large_by_code),
            UploadErrorDisposition::ShrinkAndRetry
        );

        let job_ended = IntegrationError::SynchronizationApi {
            code: Some("JOB_NOT_AWAITING_UPLOADS".to_string()),
            status: Some(400),
            message: "too late".to_string(),
        };
        assert_eq!(
            classify_upload_error(&job_ended),
            UploadErrorDisposition::FatalJobEnded
        );

        let credentials = IntegrationError::SynchronizationApi {
            code: Some("CredentialsError".to_string()),
            status: Some(401),
            message: "expired".to_string(),
        };
        assert_eq!(
            classify_upload_error(&credentials),
            UploadErrorDisposition::SilentRetry
        );

        let other = IntegrationError::SynchronizationApi {
            code: None,
            status: Some(500),
            message: "oops".to_string(),
        };
        assert_eq!(classify_upload_error(&other), UploadErrorDisposition::WarnRetry);
    }

    #[test]
    fn exhausted_non_api_errors_are_wrapped() {
        let wrapped = wrap_exhausted_error(IntegrationError::Storage("disk".to_string()));
        assert!(matches!(
            wrapped,
            IntegrationError::SynchronizationApi { .. }
        ));

        let passthrough = wrap_exhausted_error(IntegrationError::SynchronizationApi {
            code: None,
            status: Some(500),
            message: "oops".to_string(),
        });
        assert!(matches!(
            passthrough,
            IntegrationError::SynchronizationApi { status: Some(500), .. }
        ));
    }
}
