//! Per-step tracking of observed graph object types.

use std::collections::{BTreeSet, HashMap};

use tokio::sync::Mutex;

/// Records, per step id, the set of `_type` values observed while the step
/// executed. Lives for the entire run.
#[derive(Debug, Default)]
pub struct TypeTracker {
    types: Mutex<HashMap<String, BTreeSet<String>>>,
}

impl TypeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, step_id: &str, graph_object_type: &str) {
        self.types
            .lock()
            .await
            .entry(step_id.to_string())
            .or_default()
            .insert(graph_object_type.to_string());
    }

    /// Types observed for one step, sorted.
    pub async fn encountered_types(&self, step_id: &str) -> Vec<String> {
        self.types
            .lock()
            .await
            .get(step_id)
            .map(|types| types.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Snapshot of every step's observed types.
    pub async fn summary(&self) -> HashMap<String, Vec<String>> {
        self.types
            .lock()
            .await
            .iter()
            .map(|(step_id, types)| (step_id.clone(), types.iter().cloned().collect()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_types_per_step() {
        let tracker = TypeTracker::new();
        tracker.record("fetch-users", "acme_user").await;
        tracker.record("fetch-users", "acme_user").await;
        tracker.record("fetch-groups", "acme_group").await;

        assert_eq!(
            tracker.encountered_types("fetch-users").await,
            vec!["acme_user".to_string()]
        );
        assert_eq!(
            tracker.encountered_types("fetch-groups").await,
            vec!["acme_group".to_string()]
        );
        assert!(tracker.encountered_types("unknown").await.is_empty());
    }
}
