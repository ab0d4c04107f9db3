//! Execution contexts threaded through the engine.
//!
//! `ExecutionContext` owns the run-scoped singletons (store, trackers, data
//! store, event publisher). `StepExecutionContext` is the per-step view a
//! handler receives: the step's identity, the validated config, and the job
//! state façade.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::IntegrationConfig;
use crate::errors::IntegrationResult;
use crate::events::EventPublisher;
use crate::execution::job_state::{JobState, StepGraphObjectDataUploader};
use crate::storage::{DuplicateKeyTracker, FileSystemGraphObjectStore, MemoryDataStore, TypeTracker};
use crate::types::Entity;

/// Hook applied to every entity before it is admitted. A single-function
/// extensibility point; identity when not configured.
pub type BeforeAddEntityHook = Arc<dyn Fn(Entity) -> Entity + Send + Sync>;

/// Creates the per-step upload sink when a synchronization job is attached
/// to the run.
pub trait StepUploaderFactory: Send + Sync {
    fn create_step_uploader(&self, step_id: &str) -> Arc<dyn StepGraphObjectDataUploader>;
}

/// Run-scoped state shared by every step. Trackers and the data store live
/// for the entire run; an engine instance threads them explicitly instead of
/// relying on module-level globals.
pub struct ExecutionContext {
    pub config: IntegrationConfig,
    pub storage: Arc<FileSystemGraphObjectStore>,
    pub duplicate_key_tracker: Arc<DuplicateKeyTracker>,
    pub type_tracker: Arc<TypeTracker>,
    pub data_store: Arc<MemoryDataStore>,
    pub event_publisher: EventPublisher,
    pub before_add_entity: Option<BeforeAddEntityHook>,
    pub uploader_factory: Option<Arc<dyn StepUploaderFactory>>,
}

impl ExecutionContext {
    pub fn new(config: IntegrationConfig, storage_root: impl Into<PathBuf>) -> Self {
        Self {
            config,
            storage: Arc::new(FileSystemGraphObjectStore::new(storage_root)),
            duplicate_key_tracker: Arc::new(DuplicateKeyTracker::new()),
            type_tracker: Arc::new(TypeTracker::new()),
            data_store: Arc::new(MemoryDataStore::new()),
            event_publisher: EventPublisher::default(),
            before_add_entity: None,
            uploader_factory: None,
        }
    }

    pub fn with_before_add_entity(mut self, hook: BeforeAddEntityHook) -> Self {
        self.before_add_entity = Some(hook);
        self
    }

    pub fn with_uploader_factory(mut self, factory: Arc<dyn StepUploaderFactory>) -> Self {
        self.uploader_factory = Some(factory);
        self
    }
}

/// Per-step view handed to an execution handler.
#[derive(Clone)]
pub struct StepExecutionContext {
    step_id: String,
    step_name: String,
    config: IntegrationConfig,
    job_state: Arc<JobState>,
}

impl StepExecutionContext {
    pub(crate) fn new(
        step_id: impl Into<String>,
        step_name: impl Into<String>,
        config: IntegrationConfig,
        job_state: Arc<JobState>,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            step_name: step_name.into(),
            config,
            job_state,
        }
    }

    pub fn step_id(&self) -> &str {
        &self.step_id
    }

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    pub fn config(&self) -> &IntegrationConfig {
        &self.config
    }

    /// The only surface through which a step reads or writes shared run
    /// state.
    pub fn job_state(&self) -> &JobState {
        &self.job_state
    }
}

/// The effect that runs when a step is dispatched.
#[async_trait]
pub trait StepExecutionHandler: Send + Sync {
    async fn execute(&self, context: StepExecutionContext) -> IntegrationResult<()>;
}

/// Adapter for plain async functions and closures.
pub struct HandlerFn<F>(F);

impl<F, Fut> HandlerFn<F>
where
    F: Fn(StepExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = IntegrationResult<()>> + Send,
{
    pub fn new(f: F) -> Arc<Self> {
        Arc::new(Self(f))
    }
}

#[async_trait]
impl<F, Fut> StepExecutionHandler for HandlerFn<F>
where
    F: Fn(StepExecutionContext) -> Fut + Send + Sync,
    Fut: Future<Output = IntegrationResult<()>> + Send,
{
    async fn execute(&self, context: StepExecutionContext) -> IntegrationResult<()> {
        (self.0)(context).await
    }
}
