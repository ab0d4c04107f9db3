//! Per-step job state.
//!
//! Created by the scheduler for each dispatched step, flushed once at step
//! end, then discarded. All shared state access goes through this façade:
//! deduplication, type tracking, graph object persistence, the shared data
//! store, and the optional upload sink.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::errors::{IntegrationError, IntegrationResult};
use crate::execution::context::BeforeAddEntityHook;
use crate::storage::{
    DuplicateKeyTracker, FileSystemGraphObjectStore, IterationControl, MemoryDataStore, TypeTracker,
};
use crate::types::{Entity, Relationship};

/// Upload sink attached to a step when a synchronization job is active.
/// Implementations batch enqueued objects and upload them in the background.
#[async_trait]
pub trait StepGraphObjectDataUploader: Send + Sync {
    async fn enqueue_entities(&self, entities: Vec<Entity>) -> IntegrationResult<()>;
    async fn enqueue_relationships(&self, relationships: Vec<Relationship>)
        -> IntegrationResult<()>;
    /// Block until every enqueued object has been uploaded, returning the
    /// first upload error.
    async fn wait_until_uploads_complete(&self) -> IntegrationResult<()>;
}

pub struct JobState {
    step_id: String,
    storage: Arc<FileSystemGraphObjectStore>,
    duplicate_key_tracker: Arc<DuplicateKeyTracker>,
    type_tracker: Arc<TypeTracker>,
    data_store: Arc<MemoryDataStore>,
    before_add_entity: Option<BeforeAddEntityHook>,
    uploader: Option<Arc<dyn StepGraphObjectDataUploader>>,
}

impl JobState {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        step_id: impl Into<String>,
        storage: Arc<FileSystemGraphObjectStore>,
        duplicate_key_tracker: Arc<DuplicateKeyTracker>,
        type_tracker: Arc<TypeTracker>,
        data_store: Arc<MemoryDataStore>,
        before_add_entity: Option<BeforeAddEntityHook>,
        uploader: Option<Arc<dyn StepGraphObjectDataUploader>>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            storage,
            duplicate_key_tracker,
            type_tracker,
            data_store,
            before_add_entity,
            uploader,
        }
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    pub async fn add_entity(&self, entity: Entity) -> IntegrationResult<()> {
        self.add_entities(vec![entity]).await
    }

    /// Admit entities: hook, key registration, type tracking, persistence,
    /// and upload enqueueing. A duplicate `_key` rejects the batch with a
    /// non-fatal error attributable to this step.
    pub async fn add_entities(&self, entities: Vec<Entity>) -> IntegrationResult<()> {
        if entities.is_empty() {
            return Ok(());
        }

        let mut admitted = Vec::with_capacity(entities.len());
        for entity in entities {
            let entity = match &self.before_add_entity {
                Some(hook) => hook(entity),
                None => entity,
            };
            if !self.duplicate_key_tracker.register(&entity.key).await {
                return Err(IntegrationError::DuplicateKey {
                    key: entity.key,
                    step_id: self.step_id.clone(),
                });
            }
            self.type_tracker
                .record(&self.step_id, &entity.entity_type)
                .await;
            admitted.push(entity);
        }

        if let Some(uploader) = &self.uploader {
            uploader.enqueue_entities(admitted.clone()).await?;
        }
        self.storage.add_entities(&self.step_id, admitted).await
    }

    pub async fn add_relationship(&self, relationship: Relationship) -> IntegrationResult<()> {
        self.add_relationships(vec![relationship]).await
    }

    /// Same contract as `add_entities`, minus the `before_add_entity` hook.
    pub async fn add_relationships(
        &self,
        relationships: Vec<Relationship>,
    ) -> IntegrationResult<()> {
        if relationships.is_empty() {
            return Ok(());
        }

        for relationship in &relationships {
            if !self.duplicate_key_tracker.register(&relationship.key).await {
                return Err(IntegrationError::DuplicateKey {
                    key: relationship.key.clone(),
                    step_id: self.step_id.clone(),
                });
            }
            self.type_tracker
                .record(&self.step_id, &relationship.relationship_type)
                .await;
        }

        if let Some(uploader) = &self.uploader {
            uploader
                .enqueue_relationships(relationships.clone())
                .await?;
        }
        self.storage
            .add_relationships(&self.step_id, relationships)
            .await
    }

    /// Lookup across the entire run's graph object store.
    pub async fn find_entity(&self, key: &str) -> IntegrationResult<Option<Entity>> {
        self.storage.find_entity(key).await
    }

    /// Stream entities of a type; the visitor may stop early and may
    /// re-enter the job state.
    pub async fn iterate_entities<F, Fut>(
        &self,
        entity_type: &str,
        visitor: F,
    ) -> IntegrationResult<()>
    where
        F: FnMut(Entity) -> Fut,
        Fut: Future<Output = IntegrationResult<IterationControl>>,
    {
        self.storage.iterate_entities(entity_type, visitor).await
    }

    /// Stream relationships of a type; the visitor may stop early.
    pub async fn iterate_relationships<F, Fut>(
        &self,
        relationship_type: &str,
        visitor: F,
    ) -> IntegrationResult<()>
    where
        F: FnMut(Relationship) -> Fut,
        Fut: Future<Output = IntegrationResult<IterationControl>>,
    {
        self.storage
            .iterate_relationships(relationship_type, visitor)
            .await
    }

    /// Store a small artifact for consumption by a dependent step.
    pub async fn set_data(&self, scope: &str, key: &str, value: Value) {
        self.data_store.set(scope, key, value).await;
    }

    pub async fn get_data(&self, scope: &str, key: &str) -> Option<Value> {
        self.data_store.get(scope, key).await
    }

    /// Force the graph object store to materialize this step's pending
    /// writes.
    pub async fn flush(&self) -> IntegrationResult<()> {
        debug!(step_id = %self.step_id, "Flushing job state");
        self.storage.flush_step(&self.step_id).await
    }

    /// Block until the step's upload sink drains. No-op without a sink.
    pub async fn wait_until_uploads_complete(&self) -> IntegrationResult<()> {
        match &self.uploader {
            Some(uploader) => uploader.wait_until_uploads_complete().await,
            None => Ok(()),
        }
    }
}
