//! Synchronization job wire model.

use serde::{Deserialize, Serialize};

/// Server-issued handle for a synchronization transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SynchronizationJob {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration_job_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub integration_instance_id: Option<String>,
    pub status: SynchronizationJobStatus,
}

/// Server-side status of a synchronization job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SynchronizationJobStatus {
    AwaitingUploads,
    FinalizePending,
    Finalizing,
    Finished,
    Aborted,
    Error,
    #[serde(other)]
    Unknown,
}

/// Datasets reported at finalize so the server does not delete graph objects
/// absent from an incomplete upload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialDatasets {
    pub types: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn job_deserializes_from_server_response() {
        let job: SynchronizationJob = serde_json::from_value(json!({
            "id": "sync-job-1",
            "integrationJobId": "int-job-1",
            "integrationInstanceId": "instance-1",
            "status": "AWAITING_UPLOADS"
        }))
        .unwrap();

        assert_eq!(job.id, "sync-job-1");
        assert_eq!(job.status, SynchronizationJobStatus::AwaitingUploads);
    }

    #[test]
    fn unknown_status_maps_to_unknown_variant() {
        let job: SynchronizationJob = serde_json::from_value(json!({
            "id": "sync-job-2",
            "status": "SOME_FUTURE_STATUS"
        }))
        .unwrap();

        assert_eq!(job.status, SynchronizationJobStatus::Unknown);
    }
}
