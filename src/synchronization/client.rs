//! # Synchronization API Client
//!
//! HTTP client for the remote persistence service. Provides the job
//! lifecycle calls (initiate, finalize, abort), the graph object upload
//! endpoints, and job-scoped event publishing. Handles authentication
//! headers, correlation ids, and decoding of `{ "error": { code, message } }`
//! bodies so callers can distinguish server-reported error codes.

use reqwest::{Client, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::constants::{CORRELATION_ID_HEADER, SYNCHRONIZATION_SOURCE};
use crate::errors::{IntegrationError, IntegrationResult};
use crate::events::PublishedEvent;
use crate::types::{PartialDatasets, SynchronizationJob};

/// Configuration for the synchronization API client
#[derive(Debug, Clone)]
pub struct SynchronizationApiConfig {
    /// Base URL for the persistence service
    pub base_url: String,
    /// Request timeout in milliseconds
    pub timeout_ms: u64,
    /// API token sent as a bearer Authorization header (if required)
    pub api_token: Option<String>,
}

impl Default for SynchronizationApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            timeout_ms: 30000,
            api_token: None,
        }
    }
}

/// Which graph object collection an upload batch belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadDataKind {
    Entities,
    Relationships,
}

impl UploadDataKind {
    /// Path segment and payload field name; the wire uses the same word for
    /// both.
    pub fn field_name(&self) -> &'static str {
        match self {
            Self::Entities => "entities",
            Self::Relationships => "relationships",
        }
    }
}

/// HTTP client for the persister's synchronization API
#[derive(Clone)]
pub struct SynchronizationApiClient {
    client: Client,
    config: SynchronizationApiConfig,
    base_url: Url,
}

impl std::fmt::Debug for SynchronizationApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynchronizationApiClient")
            .field("base_url", &self.base_url.as_str())
            .field("timeout_ms", &self.config.timeout_ms)
            .field("auth_enabled", &self.config.api_token.is_some())
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct JobEnvelope {
    job: SynchronizationJob,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    #[serde(default)]
    #[allow(dead_code)]
    message: Option<String>,
}

impl SynchronizationApiClient {
    /// Create a new client, validating the base URL and preparing default
    /// headers.
    pub fn new(config: SynchronizationApiConfig) -> IntegrationResult<Self> {
        let base_url = Url::parse(&config.base_url).map_err(|error| {
            IntegrationError::Configuration(format!("Invalid base URL: {error}"))
        })?;

        let mut client_builder = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(format!("collector-core/{}", env!("CARGO_PKG_VERSION")));

        if let Some(token) = &config.api_token {
            let mut default_headers = reqwest::header::HeaderMap::new();
            default_headers.insert(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {token}").parse().map_err(|error| {
                    IntegrationError::Configuration(format!("Invalid API token: {error}"))
                })?,
            );
            client_builder = client_builder.default_headers(default_headers);
        }

        let client = client_builder.build().map_err(|error| {
            IntegrationError::Configuration(format!("Failed to create HTTP client: {error}"))
        })?;

        info!(
            base_url = %config.base_url,
            timeout_ms = config.timeout_ms,
            auth_enabled = config.api_token.is_some(),
            "Created synchronization API client"
        );

        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    /// Initiate a synchronization job for an integration instance.
    ///
    /// POST /persister/synchronization/jobs
    pub async fn create_job(&self, instance_id: &str) -> IntegrationResult<SynchronizationJob> {
        let url = self.join("/persister/synchronization/jobs")?;
        let body = json!({
            "source": SYNCHRONIZATION_SOURCE,
            "integrationInstanceId": instance_id,
        });

        debug!(url = %url, integration_instance_id = %instance_id, "Initiating synchronization job");

        let response = self.client.post(url).json(&body).send().await?;
        let envelope: JobEnvelope = Self::handle_response(response, "create job").await?;
        Ok(envelope.job)
    }

    /// Upload one batch of graph objects.
    ///
    /// POST /persister/synchronization/jobs/{id}/{entities|relationships}
    pub async fn upload_batch<T: Serialize>(
        &self,
        job_id: &str,
        kind: UploadDataKind,
        batch: &[T],
        correlation_id: &Uuid,
    ) -> IntegrationResult<()> {
        let url = self.join(&format!(
            "/persister/synchronization/jobs/{job_id}/{}",
            kind.field_name()
        ))?;

        let mut body = Map::new();
        body.insert(kind.field_name().to_string(), serde_json::to_value(batch)?);

        debug!(
            url = %url,
            batch_size = batch.len(),
            correlation_id = %correlation_id,
            "Uploading graph object batch"
        );

        let response = self
            .client
            .post(url)
            .header(CORRELATION_ID_HEADER, correlation_id.to_string())
            .json(&Value::Object(body))
            .send()
            .await?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from_response(response).await)
        }
    }

    /// Finalize the job, reporting datasets known to be incomplete.
    ///
    /// POST /persister/synchronization/jobs/{id}/finalize
    pub async fn finalize_job(
        &self,
        job_id: &str,
        partial_datasets: &PartialDatasets,
    ) -> IntegrationResult<SynchronizationJob> {
        let url = self.join(&format!("/persister/synchronization/jobs/{job_id}/finalize"))?;
        let body = json!({ "partialDatasets": partial_datasets });

        debug!(url = %url, "Finalizing synchronization job");

        let response = self.client.post(url).json(&body).send().await?;
        let envelope: JobEnvelope = Self::handle_response(response, "finalize job").await?;
        Ok(envelope.job)
    }

    /// Abort the job with a reason.
    ///
    /// POST /persister/synchronization/jobs/{id}/abort
    pub async fn abort_job(
        &self,
        job_id: &str,
        reason: &str,
    ) -> IntegrationResult<SynchronizationJob> {
        let url = self.join(&format!("/persister/synchronization/jobs/{job_id}/abort"))?;
        let body = json!({ "reason": reason });

        debug!(url = %url, reason = %reason, "Aborting synchronization job");

        let response = self.client.post(url).json(&body).send().await?;
        let envelope: JobEnvelope = Self::handle_response(response, "abort job").await?;
        Ok(envelope.job)
    }

    /// Publish job-scoped events.
    ///
    /// POST /persister/synchronization/jobs/{id}/events
    pub async fn publish_events(
        &self,
        job_id: &str,
        events: &[PublishedEvent],
    ) -> IntegrationResult<()> {
        let url = self.join(&format!("/persister/synchronization/jobs/{job_id}/events"))?;
        let body = json!({ "events": events });

        debug!(url = %url, events = events.len(), "Publishing job events");

        let response = self.client.post(url).json(&body).send().await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::error_from_response(response).await)
        }
    }

    fn join(&self, path: &str) -> IntegrationResult<Url> {
        self.base_url.join(path).map_err(|error| {
            IntegrationError::Configuration(format!("Failed to construct URL: {error}"))
        })
    }

    /// Decode a successful JSON response, or surface the server's error
    /// code.
    async fn handle_response<T>(response: reqwest::Response, operation: &str) -> IntegrationResult<T>
    where
        T: DeserializeOwned,
    {
        if response.status().is_success() {
            let result = response.json::<T>().await.map_err(|error| {
                IntegrationError::SynchronizationApi {
                    code: None,
                    status: None,
                    message: format!("Failed to parse {operation} response: {error}"),
                }
            })?;
            debug!("Successfully completed operation: {}", operation);
            Ok(result)
        } else {
            Err(Self::error_from_response(response).await)
        }
    }

    async fn error_from_response(response: reqwest::Response) -> IntegrationError {
        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        let code = serde_json::from_str::<ErrorEnvelope>(&body)
            .ok()
            .map(|envelope| envelope.error.code);

        IntegrationError::SynchronizationApi {
            code,
            status: Some(status.as_u16()),
            message: format!("HTTP {status}: {body}"),
        }
    }
}
