//! # Step Executor
//!
//! Dependency-graph-driven scheduler. Executes the step DAG with bounded
//! concurrency, honoring step start states, dependency-failure propagation,
//! and fatal cancellation.
//!
//! The executor clones the dependency graph into a working copy and removes
//! nodes as they are dispatched. A step is dispatched only when it is a leaf
//! of the working graph *and* every declared dependency has reached a
//! terminal status; disabled steps are never dispatched and remain in the
//! working graph as barriers to their dependents. Results are returned in
//! the graph's original topological enumeration order, regardless of
//! execution order.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{error, info, instrument, warn};

use crate::constants::events;
use crate::errors::{IntegrationError, IntegrationResult};
use crate::execution::cache_loader::load_cache_for_step;
use crate::execution::context::{ExecutionContext, StepExecutionContext};
use crate::execution::dependency_graph::DependencyGraph;
use crate::execution::job_state::JobState;
use crate::types::{IntegrationStep, StepResult, StepResultStatus, StepStartState, StepStartStates};

/// Configuration for the step scheduler.
#[derive(Debug, Clone)]
pub struct StepExecutorConfig {
    /// Maximum number of steps in flight at once. The engine is sequential
    /// by default; raise this to overlap independent steps.
    pub concurrency: usize,
}

impl Default for StepExecutorConfig {
    fn default() -> Self {
        Self { concurrency: 1 }
    }
}

pub struct StepExecutor {
    context: Arc<ExecutionContext>,
    config: StepExecutorConfig,
}

impl StepExecutor {
    pub fn new(context: Arc<ExecutionContext>) -> Self {
        Self::with_config(context, StepExecutorConfig::default())
    }

    pub fn with_config(context: Arc<ExecutionContext>, config: StepExecutorConfig) -> Self {
        Self { context, config }
    }

    /// Execute the step DAG. Resolves with every step's terminal result in
    /// topological order, or rejects with the first fatal error after
    /// in-flight steps have completed naturally.
    #[instrument(skip_all, fields(steps = steps.len(), concurrency = self.config.concurrency))]
    pub async fn execute_steps(
        &self,
        steps: Vec<IntegrationStep>,
        start_states: StepStartStates,
    ) -> IntegrationResult<Vec<StepResult>> {
        let graph = DependencyGraph::from_steps(&steps)?;
        let topological_order = graph.topological_order().to_vec();
        let steps_by_id: HashMap<String, IntegrationStep> = steps
            .into_iter()
            .map(|step| (step.id.clone(), step))
            .collect();

        let disabled = disabled_step_ids(&topological_order, &steps_by_id, &start_states);

        // Seed results in topological order. Disabled steps (direct or
        // transitive) are terminal immediately; everything else awaits
        // evaluation.
        let mut results: HashMap<String, StepResult> = HashMap::new();
        for id in &topological_order {
            let step = &steps_by_id[id];
            let status = if disabled.contains(id) {
                StepResultStatus::Disabled
            } else {
                StepResultStatus::PendingEvaluation
            };
            results.insert(id.clone(), StepResult::seeded(step, status));
        }

        let mut working = graph.clone();
        let mut in_flight: JoinSet<StepOutcome> = JoinSet::new();
        let mut paused = false;
        let mut fatal_error: Option<IntegrationError> = None;
        let concurrency = self.config.concurrency.max(1);

        loop {
            if !paused {
                for id in working.ready_leaves() {
                    if in_flight.len() >= concurrency {
                        break;
                    }
                    if disabled.contains(&id) {
                        // Disabled leaves stay in the working graph as
                        // barriers to their dependents.
                        continue;
                    }
                    let step = &steps_by_id[&id];
                    let dependencies_terminal = step.depends_on.iter().all(|dependency| {
                        results
                            .get(dependency)
                            .is_some_and(|result| result.status.is_terminal())
                    });
                    if !dependencies_terminal {
                        continue;
                    }

                    working.remove(&id);
                    let dependency_statuses: Vec<StepResultStatus> = step
                        .depends_on
                        .iter()
                        .filter_map(|dependency| results.get(dependency))
                        .map(|result| result.status)
                        .collect();
                    let start_state = start_states.get(&id).cloned().unwrap_or_default();
                    in_flight.spawn(execute_step(
                        self.context.clone(),
                        step.clone(),
                        start_state,
                        dependency_statuses,
                    ));
                }
            }

            let Some(joined) = in_flight.join_next().await else {
                break;
            };

            match joined {
                Ok(outcome) => {
                    if let Some(result) = results.get_mut(&outcome.step_id) {
                        result.status = outcome.status;
                        result.encountered_types = outcome.encountered_types;
                    }
                    if let Some(error) = outcome.fatal {
                        error!(
                            step_id = %outcome.step_id,
                            error = %error,
                            "Fatal step error; pausing scheduler"
                        );
                        paused = true;
                        if fatal_error.is_none() {
                            fatal_error = Some(error);
                        }
                    }
                }
                Err(join_error) => {
                    error!(error = %join_error, "Step task aborted; pausing scheduler");
                    paused = true;
                    if fatal_error.is_none() {
                        fatal_error = Some(IntegrationError::fatal(
                            IntegrationError::StepFailure {
                                step_id: "<unknown>".to_string(),
                                reason: join_error.to_string(),
                            },
                        ));
                    }
                }
            }
        }

        if let Some(error) = fatal_error {
            return Err(error);
        }

        let mut ordered = Vec::with_capacity(topological_order.len());
        for id in &topological_order {
            if let Some(result) = results.remove(id) {
                ordered.push(result);
            }
        }
        Ok(ordered)
    }
}

/// Steps that must not run: directly disabled, or transitively depending on
/// a disabled step. Topological traversal makes the propagation a single
/// pass.
fn disabled_step_ids(
    topological_order: &[String],
    steps_by_id: &HashMap<String, IntegrationStep>,
    start_states: &StepStartStates,
) -> HashSet<String> {
    let mut disabled = HashSet::new();
    for id in topological_order {
        let directly_disabled = start_states
            .get(id)
            .is_some_and(|start_state| start_state.disabled);
        let inherits_disabled = steps_by_id[id]
            .depends_on
            .iter()
            .any(|dependency| disabled.contains(dependency));
        if directly_disabled || inherits_disabled {
            disabled.insert(id.clone());
        }
    }
    disabled
}

struct StepOutcome {
    step_id: String,
    status: StepResultStatus,
    encountered_types: Vec<String>,
    fatal: Option<IntegrationError>,
}

#[instrument(skip_all, fields(step_id = %step.id))]
async fn execute_step(
    context: Arc<ExecutionContext>,
    step: IntegrationStep,
    start_state: StepStartState,
    dependency_statuses: Vec<StepResultStatus>,
) -> StepOutcome {
    let uploader = context
        .uploader_factory
        .as_ref()
        .map(|factory| factory.create_step_uploader(&step.id));
    let job_state = Arc::new(JobState::new(
        step.id.clone(),
        context.storage.clone(),
        context.duplicate_key_tracker.clone(),
        context.type_tracker.clone(),
        context.data_store.clone(),
        context.before_add_entity.clone(),
        uploader,
    ));

    info!(step_name = %step.name, "Executing step");
    context
        .event_publisher
        .publish(events::STEP_START, format!("Step '{}' started", step.id));

    let mut status: Option<StepResultStatus> = None;
    let mut fatal: Option<IntegrationError> = None;

    if let Some(cache_path) = &start_state.step_cache_path {
        match load_cache_for_step(cache_path, &job_state).await {
            Ok(counts) if counts.total() > 0 => {
                info!(
                    entities = counts.entities,
                    relationships = counts.relationships,
                    "Step satisfied from cache"
                );
                context.event_publisher.publish(
                    events::STEP_CACHED,
                    format!("Step '{}' loaded {} cached graph objects", step.id, counts.total()),
                );
                status = Some(StepResultStatus::Cached);
            }
            Ok(_) => {
                warn!(
                    cache_path = %cache_path.display(),
                    "Step cache contained no graph objects; falling back to execution handler"
                );
            }
            Err(error) => {
                error!(error = %error, "Failed to load step cache");
                status = Some(StepResultStatus::Failure);
            }
        }
    }

    if status.is_none() {
        let step_context = StepExecutionContext::new(
            &step.id,
            &step.name,
            context.config.clone(),
            job_state.clone(),
        );
        match step.execution_handler.execute(step_context).await {
            Ok(()) => {
                if dependency_statuses
                    .iter()
                    .any(|dependency| dependency.taints_dependents())
                {
                    status = Some(StepResultStatus::PartialSuccessDueToDependencyFailure);
                } else {
                    status = Some(StepResultStatus::Success);
                }
            }
            Err(error) if error.is_fatal() => {
                error!(error = %error, code = error.code(), "Step raised a fatal error");
                context.event_publisher.publish(
                    events::STEP_FAILURE,
                    format!("Step '{}' failed fatally: {error}", step.id),
                );
                status = Some(StepResultStatus::Failure);
                fatal = Some(error);
            }
            Err(error) => {
                error!(error = %error, code = error.code(), "Step execution failed");
                context.event_publisher.publish(
                    events::STEP_FAILURE,
                    format!("Step '{}' failed: {error}", step.id),
                );
                status = Some(StepResultStatus::Failure);
            }
        }
    }

    // Flush and drain uploads regardless of the status so far; a failure
    // here downgrades the step but never aborts the run.
    if let Err(error) = flush_and_drain(&job_state).await {
        warn!(error = %error, "Flush or upload drain failed; downgrading step status");
        status = Some(StepResultStatus::Failure);
    }

    let encountered_types = context.type_tracker.encountered_types(&step.id).await;

    if status == Some(StepResultStatus::Success) {
        let declared = step.declared_types();
        let undeclared: Vec<&String> = encountered_types
            .iter()
            .filter(|encountered| !declared.contains(encountered))
            .collect();
        if !undeclared.is_empty() {
            warn!(
                undeclared_types = ?undeclared,
                "Step encountered graph object types it did not declare"
            );
        }
    }

    let status = status.unwrap_or(StepResultStatus::Failure);
    info!(
        status = %status,
        encountered_types = ?encountered_types,
        "Step finished"
    );
    context.event_publisher.publish(
        events::STEP_END,
        format!("Step '{}' finished with status {status}", step.id),
    );

    StepOutcome {
        step_id: step.id,
        status,
        encountered_types,
        fatal,
    }
}

async fn flush_and_drain(job_state: &JobState) -> IntegrationResult<()> {
    job_state.flush().await?;
    job_state.wait_until_uploads_complete().await
}
