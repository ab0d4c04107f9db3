//! Step declarations and per-step lifecycle results.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::execution::StepExecutionHandler;

/// A graph object type a step declares it will produce. `partial` marks a
/// dataset the step acknowledges may be incomplete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclaredType {
    #[serde(rename = "type")]
    pub name: String,
    #[serde(default)]
    pub partial: bool,
}

impl DeclaredType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partial: false,
        }
    }

    pub fn partial(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partial: true,
        }
    }
}

/// A declarative unit of collection work.
#[derive(Clone)]
pub struct IntegrationStep {
    /// Unique step id within the catalog.
    pub id: String,
    /// Human-readable step name.
    pub name: String,
    /// Ids of steps that must reach a terminal status before this one runs.
    pub depends_on: Vec<String>,
    /// Entity types this step produces.
    pub entities: Vec<DeclaredType>,
    /// Relationship types this step produces.
    pub relationships: Vec<DeclaredType>,
    /// Mapped relationship types this step produces.
    pub mapped_relationships: Vec<DeclaredType>,
    /// The effect that runs with a step execution context.
    pub execution_handler: Arc<dyn StepExecutionHandler>,
}

impl IntegrationStep {
    /// All declared graph object types, in declaration order.
    pub fn declared_types(&self) -> Vec<String> {
        self.entities
            .iter()
            .chain(self.relationships.iter())
            .chain(self.mapped_relationships.iter())
            .map(|declared| declared.name.clone())
            .collect()
    }

    /// Declared types flagged as partial datasets, in declaration order.
    pub fn partial_types(&self) -> Vec<String> {
        self.entities
            .iter()
            .chain(self.relationships.iter())
            .chain(self.mapped_relationships.iter())
            .filter(|declared| declared.partial)
            .map(|declared| declared.name.clone())
            .collect()
    }
}

impl fmt::Debug for IntegrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IntegrationStep")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("depends_on", &self.depends_on)
            .finish()
    }
}

/// Controls whether a step runs, and optionally redirects execution to load
/// a cached artifact from disk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StepStartState {
    pub disabled: bool,
    pub step_cache_path: Option<PathBuf>,
}

impl StepStartState {
    pub fn enabled() -> Self {
        Self::default()
    }

    pub fn disabled() -> Self {
        Self {
            disabled: true,
            step_cache_path: None,
        }
    }

    pub fn cached(path: impl Into<PathBuf>) -> Self {
        Self {
            disabled: false,
            step_cache_path: Some(path.into()),
        }
    }
}

/// Start states keyed by step id. Steps without an entry run enabled.
pub type StepStartStates = HashMap<String, StepStartState>;

/// Terminal and transitional statuses of a step within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepResultStatus {
    /// The step (or a transitive dependency) was disabled.
    Disabled,
    /// The step has not yet reached a terminal status.
    PendingEvaluation,
    /// The step completed and all dependencies succeeded.
    Success,
    /// The step's handler (or its flush) failed.
    Failure,
    /// The step completed but a dependency had failed before it ran.
    PartialSuccessDueToDependencyFailure,
    /// The step was satisfied from a pre-materialized cache on disk.
    Cached,
    /// The step was excluded from the run by the caller.
    Skipped,
    /// The run ended before the step was evaluated.
    NotExecuted,
}

impl StepResultStatus {
    /// Whether this status is terminal. Terminal statuses are immutable.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::PendingEvaluation)
    }

    /// Whether a dependent of a step in this status completes as a partial
    /// success rather than a full success.
    pub fn taints_dependents(&self) -> bool {
        matches!(
            self,
            Self::Failure | Self::PartialSuccessDueToDependencyFailure
        )
    }
}

impl fmt::Display for StepResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disabled => "DISABLED",
            Self::PendingEvaluation => "PENDING_EVALUATION",
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::PartialSuccessDueToDependencyFailure => {
                "PARTIAL_SUCCESS_DUE_TO_DEPENDENCY_FAILURE"
            }
            Self::Cached => "CACHED",
            Self::Skipped => "SKIPPED",
            Self::NotExecuted => "NOT_EXECUTED",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for StepResultStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DISABLED" => Ok(Self::Disabled),
            "PENDING_EVALUATION" => Ok(Self::PendingEvaluation),
            "SUCCESS" => Ok(Self::Success),
            "FAILURE" => Ok(Self::Failure),
            "PARTIAL_SUCCESS_DUE_TO_DEPENDENCY_FAILURE" => {
                Ok(Self::PartialSuccessDueToDependencyFailure)
            }
            "CACHED" => Ok(Self::Cached),
            "SKIPPED" => Ok(Self::Skipped),
            "NOT_EXECUTED" => Ok(Self::NotExecuted),
            _ => Err(format!("Invalid step result status: {s}")),
        }
    }
}

/// Lifecycle record for one step within one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    pub declared_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partial_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub encountered_types: Vec<String>,
    pub status: StepResultStatus,
}

impl StepResult {
    /// Seed a result for a step that has not yet been evaluated.
    pub fn pending(step: &IntegrationStep) -> Self {
        Self::seeded(step, StepResultStatus::PendingEvaluation)
    }

    /// Seed a result with a pre-determined status (e.g. `DISABLED`).
    pub fn seeded(step: &IntegrationStep, status: StepResultStatus) -> Self {
        Self {
            id: step.id.clone(),
            name: step.name.clone(),
            depends_on: step.depends_on.clone(),
            declared_types: step.declared_types(),
            partial_types: step.partial_types(),
            encountered_types: Vec::new(),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_to_screaming_snake_case() {
        let json = serde_json::to_string(&StepResultStatus::PartialSuccessDueToDependencyFailure)
            .unwrap();
        assert_eq!(json, "\"PARTIAL_SUCCESS_DUE_TO_DEPENDENCY_FAILURE\"");
    }

    #[test]
    fn status_display_matches_from_str() {
        for status in [
            StepResultStatus::Disabled,
            StepResultStatus::PendingEvaluation,
            StepResultStatus::Success,
            StepResultStatus::Failure,
            StepResultStatus::PartialSuccessDueToDependencyFailure,
            StepResultStatus::Cached,
            StepResultStatus::Skipped,
            StepResultStatus::NotExecuted,
        ] {
            let parsed: StepResultStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn only_pending_evaluation_is_non_terminal() {
        assert!(!StepResultStatus::PendingEvaluation.is_terminal());
        assert!(StepResultStatus::Success.is_terminal());
        assert!(StepResultStatus::Disabled.is_terminal());
        assert!(StepResultStatus::Cached.is_terminal());
    }

    #[test]
    fn failure_statuses_taint_dependents() {
        assert!(StepResultStatus::Failure.taints_dependents());
        assert!(StepResultStatus::PartialSuccessDueToDependencyFailure.taints_dependents());
        assert!(!StepResultStatus::Success.taints_dependents());
        assert!(!StepResultStatus::Cached.taints_dependents());
    }
}
