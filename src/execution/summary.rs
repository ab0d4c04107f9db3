//! Execution summary persisted to the storage root.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::info;

use crate::constants::SUMMARY_FILE_NAME;
use crate::errors::IntegrationResult;
use crate::types::{PartialDatasets, StepResult};

/// Structured result of one full collection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteIntegrationResult {
    pub integration_step_results: Vec<StepResult>,
    pub metadata: ExecutionMetadata,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionMetadata {
    pub partial_datasets: PartialDatasets,
}

/// Datasets to report at finalize. Declared-partial types are always
/// partial; a step that failed (or completed behind a failed dependency)
/// makes all of its declared types partial.
pub fn determine_partial_datasets(results: &[StepResult]) -> PartialDatasets {
    let mut types: Vec<String> = Vec::new();
    let mut push_unique = |collected: &mut Vec<String>, candidate: &String| {
        if !collected.contains(candidate) {
            collected.push(candidate.clone());
        }
    };

    for result in results {
        for partial_type in &result.partial_types {
            push_unique(&mut types, partial_type);
        }
        if result.status.taints_dependents() {
            for declared_type in &result.declared_types {
                push_unique(&mut types, declared_type);
            }
        }
    }

    PartialDatasets { types }
}

/// Write `summary.json` to the storage root.
pub async fn write_summary(
    root: &Path,
    result: &ExecuteIntegrationResult,
) -> IntegrationResult<PathBuf> {
    fs::create_dir_all(root).await?;
    let path = root.join(SUMMARY_FILE_NAME);
    let bytes = serde_json::to_vec_pretty(result)?;
    fs::write(&path, bytes).await?;
    info!(path = %path.display(), "Wrote execution summary");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StepResultStatus;

    fn result(
        id: &str,
        status: StepResultStatus,
        declared: &[&str],
        partial: &[&str],
    ) -> StepResult {
        StepResult {
            id: id.to_string(),
            name: id.to_string(),
            depends_on: Vec::new(),
            declared_types: declared.iter().map(|s| s.to_string()).collect(),
            partial_types: partial.iter().map(|s| s.to_string()).collect(),
            encountered_types: Vec::new(),
            status,
        }
    }

    #[test]
    fn failed_steps_report_all_declared_types() {
        let results = vec![
            result("a", StepResultStatus::Success, &["acme_user"], &[]),
            result("b", StepResultStatus::Failure, &["acme_group"], &[]),
        ];
        let datasets = determine_partial_datasets(&results);
        assert_eq!(datasets.types, vec!["acme_group".to_string()]);
    }

    #[test]
    fn declared_partial_types_are_always_reported() {
        let results = vec![result(
            "a",
            StepResultStatus::Success,
            &["acme_user", "acme_login"],
            &["acme_login"],
        )];
        let datasets = determine_partial_datasets(&results);
        assert_eq!(datasets.types, vec!["acme_login".to_string()]);
    }

    #[test]
    fn partial_success_reports_declared_types_once() {
        let results = vec![result(
            "a",
            StepResultStatus::PartialSuccessDueToDependencyFailure,
            &["acme_user"],
            &["acme_user"],
        )];
        let datasets = determine_partial_datasets(&results);
        assert_eq!(datasets.types, vec!["acme_user".to_string()]);
    }

    #[test]
    fn summary_serializes_with_camel_case() {
        let summary = ExecuteIntegrationResult {
            integration_step_results: vec![result(
                "a",
                StepResultStatus::Success,
                &["acme_user"],
                &[],
            )],
            metadata: ExecutionMetadata {
                partial_datasets: PartialDatasets::default(),
            },
        };
        let value = serde_json::to_value(&summary).unwrap();
        assert!(value.get("integrationStepResults").is_some());
        assert!(value["metadata"].get("partialDatasets").is_some());
    }
}
