//! Synchronization pipeline tests against a mocked persister: lifecycle,
//! batching, retry dispositions, and the event side-channel.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use collector_core::errors::IntegrationError;
use collector_core::events::PublishedEvent;
use collector_core::storage::FileSystemGraphObjectStore;
use collector_core::synchronization::{
    synchronize_collected_data, upload_graph_object_data, SynchronizationApiClient,
    SynchronizationApiConfig, SynchronizationEventQueue, SynchronizationJobContext,
    UploadRetryConfig,
};
use collector_core::types::{Entity, PartialDatasets, Relationship, SynchronizationJobStatus};

const JOB_ID: &str = "sync-job-1";

fn job_response() -> serde_json::Value {
    json!({
        "job": {
            "id": JOB_ID,
            "integrationJobId": "int-job-1",
            "integrationInstanceId": "instance-1",
            "status": "AWAITING_UPLOADS"
        }
    })
}

fn finished_job_response() -> serde_json::Value {
    json!({
        "job": {
            "id": JOB_ID,
            "integrationJobId": "int-job-1",
            "integrationInstanceId": "instance-1",
            "status": "FINISHED"
        }
    })
}

fn client_for(server: &MockServer) -> Arc<SynchronizationApiClient> {
    Arc::new(
        SynchronizationApiClient::new(SynchronizationApiConfig {
            base_url: server.uri(),
            timeout_ms: 5000,
            api_token: None,
        })
        .unwrap(),
    )
}

fn fast_retry(max_attempts: u32) -> UploadRetryConfig {
    UploadRetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(1),
        factor: 1.05,
    }
}

fn job_context(server: &MockServer) -> SynchronizationJobContext {
    let job = serde_json::from_value(job_response()["job"].clone()).unwrap();
    SynchronizationJobContext::new(client_for(server), job).with_retry(fast_retry(3))
}

fn entities(count: usize) -> Vec<Entity> {
    (0..count)
        .map(|i| Entity::new(format!("user:{i}"), "acme_user", "User"))
        .collect()
}

async fn mount_lifecycle_mocks(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/persister/synchronization/jobs"))
        .and(body_json(json!({
            "source": "integration-managed",
            "integrationInstanceId": "instance-1"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(job_response()))
        .expect(1)
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/persister/synchronization/jobs/{JOB_ID}/events")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(server)
        .await;
}

async fn storage_with_collected_data(root: &std::path::Path) -> FileSystemGraphObjectStore {
    let store = FileSystemGraphObjectStore::new(root);
    store.add_entities("fetch-users", entities(2)).await.unwrap();
    store
        .add_relationships(
            "fetch-users",
            vec![Relationship::new(
                "user:0|knows|user:1",
                "acme_user_knows_user",
                "user:0",
                "user:1",
            )],
        )
        .await
        .unwrap();
    store.flush_step("fetch-users").await.unwrap();
    store
}

#[tokio::test]
async fn synchronize_uploads_and_finalizes() {
    let server = MockServer::start().await;
    mount_lifecycle_mocks(&server).await;

    Mock::given(method("POST"))
        .and(path(format!(
            "/persister/synchronization/jobs/{JOB_ID}/entities"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!(
            "/persister/synchronization/jobs/{JOB_ID}/relationships"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!(
            "/persister/synchronization/jobs/{JOB_ID}/finalize"
        )))
        .and(body_json(json!({
            "partialDatasets": { "types": ["acme_group"] }
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(finished_job_response()))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let storage = storage_with_collected_data(dir.path()).await;

    let job = synchronize_collected_data(
        client_for(&server),
        "instance-1",
        &storage,
        &PartialDatasets {
            types: vec!["acme_group".to_string()],
        },
    )
    .await
    .unwrap();

    assert_eq!(job.status, SynchronizationJobStatus::Finished);

    // Every upload carried a fresh correlation id.
    let requests = server.received_requests().await.unwrap();
    let upload_requests: Vec<_> = requests
        .iter()
        .filter(|r| {
            r.url.path().ends_with("/entities") || r.url.path().ends_with("/relationships")
        })
        .collect();
    assert_eq!(upload_requests.len(), 2);
    for request in upload_requests {
        assert!(request.headers.contains_key("JupiterOne-Correlation-Id"));
    }
}

#[tokio::test]
async fn uploads_chunk_into_batches_of_250() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!(
            "/persister/synchronization/jobs/{JOB_ID}/entities"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(3)
        .mount(&server)
        .await;

    let context = job_context(&server);
    upload_graph_object_data(&context, entities(600), Vec::new())
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    let mut batch_sizes: Vec<usize> = requests
        .iter()
        .map(|request| {
            let body: serde_json::Value = serde_json::from_slice(&request.body).unwrap();
            body["entities"].as_array().unwrap().len()
        })
        .collect();
    batch_sizes.sort_unstable();
    assert_eq!(batch_sizes, vec![100, 250, 250]);
}

#[tokio::test]
async fn job_not_awaiting_uploads_stops_retries_and_aborts() {
    let server = MockServer::start().await;
    mount_lifecycle_mocks(&server).await;

    Mock::given(method("POST"))
        .and(path(format!(
            "/persister/synchronization/jobs/{JOB_ID}/entities"
        )))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": {
                "code": "JOB_NOT_AWAITING_UPLOADS",
                "message": "Job has already been finalized"
            }
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!(
            "/persister/synchronization/jobs/{JOB_ID}/abort"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(job_response()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!(
            "/persister/synchronization/jobs/{JOB_ID}/finalize"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(finished_job_response()))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let storage = storage_with_collected_data(dir.path()).await;

    let error = synchronize_collected_data(
        client_for(&server),
        "instance-1",
        &storage,
        &PartialDatasets::default(),
    )
    .await
    .unwrap_err();

    assert!(error.is_fatal());
    assert_eq!(error.code(), "INTEGRATION_UPLOAD_AFTER_JOB_ENDED");
}

#[tokio::test]
async fn payload_too_large_shrinks_and_retries_the_same_batch() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!(
            "/persister/synchronization/jobs/{JOB_ID}/entities"
        )))
        .respond_with(ResponseTemplate::new(413).set_body_json(json!({
            "error": {
                "code": "RequestEntityTooLargeException",
                "message": "Payload too large"
            }
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!(
            "/persister/synchronization/jobs/{JOB_ID}/entities"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let context = job_context(&server);
    upload_graph_object_data(&context, entities(5), Vec::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn retries_exhaust_into_a_synchronization_api_error() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!(
            "/persister/synchronization/jobs/{JOB_ID}/entities"
        )))
        .respond_with(ResponseTemplate::new(500).set_body_string("internal error"))
        .expect(2)
        .mount(&server)
        .await;

    let job = serde_json::from_value(job_response()["job"].clone()).unwrap();
    let context = SynchronizationJobContext::new(client_for(&server), job)
        .with_retry(fast_retry(2));

    let error = upload_graph_object_data(&context, entities(1), Vec::new())
        .await
        .unwrap_err();

    match error {
        IntegrationError::SynchronizationApi { status, .. } => {
            assert_eq!(status, Some(500));
        }
        other => panic!("expected SynchronizationApi, got {other:?}"),
    }
}

#[tokio::test]
async fn credentials_errors_retry_silently_until_success() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!(
            "/persister/synchronization/jobs/{JOB_ID}/entities"
        )))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": { "code": "CredentialsError", "message": "token expired" }
        })))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!(
            "/persister/synchronization/jobs/{JOB_ID}/entities"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let context = job_context(&server);
    upload_graph_object_data(&context, entities(1), Vec::new())
        .await
        .unwrap();
}

#[tokio::test]
async fn abort_failure_is_raised_in_preference_to_the_upload_error() {
    let server = MockServer::start().await;
    mount_lifecycle_mocks(&server).await;

    Mock::given(method("POST"))
        .and(path(format!(
            "/persister/synchronization/jobs/{JOB_ID}/entities"
        )))
        .respond_with(ResponseTemplate::new(400).set_body_json(json!({
            "error": { "code": "JOB_NOT_AWAITING_UPLOADS", "message": "too late" }
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!(
            "/persister/synchronization/jobs/{JOB_ID}/abort"
        )))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": { "code": "ABORT_FAILED", "message": "cannot abort" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let storage = storage_with_collected_data(dir.path()).await;

    let error = synchronize_collected_data(
        client_for(&server),
        "instance-1",
        &storage,
        &PartialDatasets::default(),
    )
    .await
    .unwrap_err();

    match error {
        IntegrationError::SynchronizationApi { code, .. } => {
            assert_eq!(code.as_deref(), Some("ABORT_FAILED"));
        }
        other => panic!("expected the abort error, got {other:?}"),
    }
}

#[tokio::test]
async fn event_queue_drains_before_idle_resolves() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!(
            "/persister/synchronization/jobs/{JOB_ID}/events"
        )))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(3)
        .mount(&server)
        .await;

    let queue = SynchronizationEventQueue::new(client_for(&server), JOB_ID);
    queue.enqueue(PublishedEvent::new("step.start", "step 'a' started"));
    queue.enqueue(PublishedEvent::new("step.end", "step 'a' finished"));
    queue.enqueue(PublishedEvent::new("sync.upload_end", "uploads complete"));
    queue.wait_until_idle().await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 3);
}

#[tokio::test]
async fn event_transmission_failures_are_dropped_not_raised() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path(format!(
            "/persister/synchronization/jobs/{JOB_ID}/events"
        )))
        .respond_with(ResponseTemplate::new(500).set_body_string("oops"))
        .expect(1)
        .mount(&server)
        .await;

    let queue = SynchronizationEventQueue::new(client_for(&server), JOB_ID);
    queue.enqueue(PublishedEvent::new("step.start", "step 'a' started"));
    // Drains cleanly despite the failed transmission.
    queue.wait_until_idle().await;
}
