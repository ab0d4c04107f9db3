//! # collector-core
//!
//! Graph data collection engine. A collection job is decomposed into steps
//! that declare dependencies, produce typed entities and relationships, and
//! share a per-run job state. The step executor drives the dependency graph
//! with bounded concurrency; the synchronization pipeline streams collected
//! data to a remote persistence service with chunked, retried, size-adaptive
//! uploads.

pub mod config;
pub mod constants;
pub mod errors;
pub mod events;
pub mod execution;
pub mod logging;
pub mod storage;
pub mod synchronization;
pub mod types;

pub use config::{load_config_from_env, ConfigFieldMap, ConfigFieldSpec, IntegrationConfig};
pub use errors::{IntegrationError, IntegrationResult};
pub use execution::{
    execute_integration, ExecutionContext, HandlerFn, StepExecutionContext, StepExecutionHandler,
    StepExecutor, StepExecutorConfig,
};
pub use synchronization::{synchronize_collected_data, SynchronizationApiClient, SynchronizationApiConfig};
pub use types::{Entity, IntegrationStep, Relationship, StepResult, StepResultStatus};
