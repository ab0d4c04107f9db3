//! Step execution engine: dependency graph, scheduler, job state, and the
//! cache loader.

pub mod cache_loader;
pub mod context;
pub mod dependency_graph;
pub mod job_state;
pub mod step_executor;
pub mod summary;

pub use cache_loader::{load_cache_for_step, CacheLoadCounts};
pub use context::{
    BeforeAddEntityHook, ExecutionContext, HandlerFn, StepExecutionContext, StepExecutionHandler,
    StepUploaderFactory,
};
pub use dependency_graph::DependencyGraph;
pub use job_state::{JobState, StepGraphObjectDataUploader};
pub use step_executor::{StepExecutor, StepExecutorConfig};
pub use summary::{
    determine_partial_datasets, write_summary, ExecuteIntegrationResult, ExecutionMetadata,
};

use std::sync::Arc;

use crate::errors::IntegrationResult;
use crate::types::{IntegrationStep, StepStartStates};

/// Run a full collection: build the dependency graph, execute every step,
/// and persist `summary.json` to the storage root.
pub async fn execute_integration(
    context: Arc<ExecutionContext>,
    steps: Vec<IntegrationStep>,
    start_states: StepStartStates,
    config: StepExecutorConfig,
) -> IntegrationResult<ExecuteIntegrationResult> {
    let executor = StepExecutor::with_config(context.clone(), config);
    let results = executor.execute_steps(steps, start_states).await?;

    let summary = ExecuteIntegrationResult {
        metadata: ExecutionMetadata {
            partial_datasets: determine_partial_datasets(&results),
        },
        integration_step_results: results,
    };
    write_summary(context.storage.root(), &summary).await?;
    Ok(summary)
}
