//! Shared helpers for unit and HTTP-level tests.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};
use std::{
    collections::VecDeque,
    sync::Mutex,
    time::Duration,
};
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::config::{Config, UpstreamConfig};
use crate::relay::models::{JobHandle, JobState, SourceImage, UploadSlot};
use crate::relay::{ImageEditingApi, ToolName, UpstreamError};
use crate::{Application, relay};

/// HTTP client with a short timeout so hung mocks fail fast.
pub fn test_client() -> reqwest::Client {
    relay::http_client(Duration::from_secs(5)).expect("Failed to create HTTP client")
}

/// Upstream settings pointing at a mock server, authenticated with `test-key`.
pub fn upstream_config(base_url: &str) -> UpstreamConfig {
    UpstreamConfig {
        base_url: Url::parse(base_url).expect("Invalid upstream URL"),
        api_key: Some("test-key".to_string()),
        ..Default::default()
    }
}

/// Full configuration with polling tuned for tests.
pub fn test_config(upstream_base_url: &str) -> Config {
    let mut config = Config::default();
    config.upstream = upstream_config(upstream_base_url);
    config.polling.interval = Duration::from_millis(1);
    config.polling.default_max_polls = 5;
    config.polling.max_polls_cap = 10;
    config.limits.max_image_bytes = 1024;
    // The Prometheus recorder is process-global and can only be installed once
    config.enable_metrics = false;
    config
}

pub async fn create_test_app(config: Config) -> axum_test::TestServer {
    Application::new(config)
        .await
        .expect("Failed to create application")
        .into_test_server()
}

/// Serve a source image at `at` for both the probe and the download.
pub async fn mount_source(server: &MockServer, at: &str, content_type: &str, body: &[u8]) {
    Mock::given(method("HEAD"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).insert_header("content-type", content_type))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", content_type)
                .set_body_bytes(body.to_vec()),
        )
        .mount(server)
        .await;
}

/// Mount a complete upstream under `/v1`: upload slot, bucket, tool and job endpoints.
///
/// `job_documents` are served in order by `GET /v1/jobs/job-1`; the last one repeats.
pub async fn mount_upstream(server: &MockServer, tool: &str, job_documents: Vec<Value>) {
    Mock::given(method("POST"))
        .and(path("/v1/uploads"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "upload_url": format!("{}/bucket/put/1", server.uri()),
            "file_url": format!("{}/bucket/get/1", server.uri()),
        })))
        .mount(server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/bucket/put/1"))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("/v1/tools/{tool}")))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({"job_id": "job-1"})))
        .mount(server)
        .await;

    let count = job_documents.len();
    for (i, document) in job_documents.into_iter().enumerate() {
        let mock = Mock::given(method("GET"))
            .and(path("/v1/jobs/job-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(document));
        let mock = if i + 1 < count { mock.up_to_n_times(1) } else { mock };
        mock.mount(server).await;
    }
}

/// Calls observed by a [`ScriptedApi`].
#[derive(Debug, Default, Clone)]
pub struct RecordedCalls {
    pub upload_slots: Vec<SourceImage>,
    pub transfers: Vec<(String, Vec<u8>)>,
    pub invocations: Vec<(String, String, Value)>,
    pub status_checks: u32,
}

/// In-memory `ImageEditingApi` that replays scripted job states.
///
/// Job states are consumed in order; the last one repeats forever.
pub struct ScriptedApi {
    statuses: Mutex<VecDeque<Result<Value, UpstreamError>>>,
    invoke_response: Value,
    upload_slot_error: Option<Value>,
    calls: Mutex<RecordedCalls>,
}

impl ScriptedApi {
    pub const FILE_URL: &'static str = "https://files.example.com/uploads/1";

    pub fn with_statuses(statuses: Vec<Result<Value, UpstreamError>>) -> Self {
        Self {
            statuses: Mutex::new(statuses.into()),
            invoke_response: json!({"job_id": "job-1"}),
            upload_slot_error: None,
            calls: Mutex::new(RecordedCalls::default()),
        }
    }

    pub fn with_invoke_response(mut self, response: Value) -> Self {
        self.invoke_response = response;
        self
    }

    pub fn failing_upload_slot(mut self, body: Value) -> Self {
        self.upload_slot_error = Some(body);
        self
    }

    pub fn calls(&self) -> RecordedCalls {
        self.calls.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> u32 {
        self.calls.lock().unwrap().status_checks
    }

    fn next_status(&self) -> Result<Value, UpstreamError> {
        let mut statuses = self.statuses.lock().unwrap();
        if statuses.len() > 1 {
            return statuses.pop_front().unwrap();
        }
        match statuses.front() {
            Some(Ok(document)) => Ok(document.clone()),
            Some(Err(UpstreamError::Status { status, body })) => Err(UpstreamError::Status {
                status: *status,
                body: body.clone(),
            }),
            Some(Err(other)) => Err(UpstreamError::Decode {
                message: other.to_string(),
                body: Value::Null,
            }),
            None => Err(UpstreamError::Decode {
                message: "no scripted job status".to_string(),
                body: Value::Null,
            }),
        }
    }
}

#[async_trait]
impl ImageEditingApi for ScriptedApi {
    async fn request_upload_slot(&self, source: &SourceImage) -> Result<UploadSlot, UpstreamError> {
        self.calls.lock().unwrap().upload_slots.push(source.clone());
        if let Some(body) = &self.upload_slot_error {
            return Err(UpstreamError::Status {
                status: 429,
                body: body.clone(),
            });
        }
        Ok(UploadSlot {
            upload_url: Url::parse("https://files.example.com/put/1").unwrap(),
            file_url: Url::parse(Self::FILE_URL).unwrap(),
        })
    }

    async fn transfer(&self, _slot: &UploadSlot, content_type: &str, bytes: Bytes) -> Result<(), UpstreamError> {
        self.calls
            .lock()
            .unwrap()
            .transfers
            .push((content_type.to_string(), bytes.to_vec()));
        Ok(())
    }

    async fn invoke_tool(&self, tool: &ToolName, file_url: &Url, params: &Value) -> Result<JobHandle, UpstreamError> {
        self.calls
            .lock()
            .unwrap()
            .invocations
            .push((tool.to_string(), file_url.to_string(), params.clone()));
        Ok(JobHandle::from_document(self.invoke_response.clone()).expect("Invalid scripted invoke response"))
    }

    async fn job_status(&self, _job_id: &str) -> Result<JobState, UpstreamError> {
        self.calls.lock().unwrap().status_checks += 1;
        let document = self.next_status()?;
        Ok(JobState::from_document(document).expect("Invalid scripted job status"))
    }
}
