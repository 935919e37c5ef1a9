//! Client for the remote image-editing API.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use reqwest::{Client, RequestBuilder, Response, header::CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, instrument};
use url::Url;

use super::models::{JobHandle, JobState, SourceImage, ToolInvocation, UploadSlot, UploadSlotRequest};
use super::{ToolName, UpstreamError};
use crate::config::UpstreamConfig;

/// Operations the relay needs from the image-editing API.
///
/// In production this is [`ReqwestImageApi`]. Tests swap in scripted implementations.
#[async_trait]
pub trait ImageEditingApi: Send + Sync {
    /// Ask for somewhere to put the source bytes.
    async fn request_upload_slot(&self, source: &SourceImage) -> Result<UploadSlot, UpstreamError>;

    /// Write the bytes to a presigned slot. No credentials are sent.
    async fn transfer(&self, slot: &UploadSlot, content_type: &str, bytes: Bytes) -> Result<(), UpstreamError>;

    /// Start a tool run against an uploaded file.
    async fn invoke_tool(&self, tool: &ToolName, file_url: &Url, params: &Value) -> Result<JobHandle, UpstreamError>;

    /// Fetch the current state of a job.
    async fn job_status(&self, job_id: &str) -> Result<JobState, UpstreamError>;
}

/// The concrete implementation of `ImageEditingApi`.
pub struct ReqwestImageApi {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
    auth_header_name: String,
    auth_header_prefix: String,
}

impl ReqwestImageApi {
    pub fn new(client: Client, config: &UpstreamConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            auth_header_name: config.auth_header_name.clone(),
            auth_header_prefix: config.auth_header_prefix.clone(),
        }
    }

    /// Append path segments to the base URL, percent-encoding each one.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, UpstreamError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| UpstreamError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(api_key) => request.header(&self.auth_header_name, format!("{}{}", self.auth_header_prefix, api_key)),
            None => request,
        }
    }
}

/// Turn a response body into JSON, keeping non-JSON bodies as a string.
pub(crate) fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Most of an error body kept as diagnostics; anything past it is left unread.
pub(crate) const MAX_DIAGNOSTIC_BYTES: usize = 4 * 1024;

/// Pass 2xx responses through, capture everything else with the start of its body.
pub(crate) async fn error_for_status(response: Response) -> Result<Response, UpstreamError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = read_capped(response, MAX_DIAGNOSTIC_BYTES).await;
    debug!("Upstream responded {}: {}", status, body);
    Err(UpstreamError::Status {
        status: status.as_u16(),
        body: parse_body(&body),
    })
}

/// Read at most `limit` bytes of a body, dropping the rest.
async fn read_capped(mut response: Response, limit: usize) -> String {
    let mut body = BytesMut::new();
    while let Ok(Some(chunk)) = response.chunk().await {
        let room = limit - body.len();
        if chunk.len() >= room {
            body.extend_from_slice(&chunk[..room]);
            break;
        }
        body.extend_from_slice(&chunk);
    }
    String::from_utf8_lossy(&body).into_owned()
}

async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, UpstreamError> {
    let text = response.text().await?;
    debug!("Upstream response body: {}", text);
    serde_json::from_str(&text).map_err(|e| UpstreamError::Decode {
        message: e.to_string(),
        body: parse_body(&text),
    })
}

#[async_trait]
impl ImageEditingApi for ReqwestImageApi {
    #[instrument(skip_all, fields(file_name = %source.file_name))]
    async fn request_upload_slot(&self, source: &SourceImage) -> Result<UploadSlot, UpstreamError> {
        let url = self.endpoint(&["uploads"])?;
        debug!("Requesting upload slot from {}", url);

        let response = self
            .authorize(self.client.post(url))
            .json(&UploadSlotRequest::from(source))
            .send()
            .await?;
        read_json(error_for_status(response).await?).await
    }

    #[instrument(skip_all, fields(bytes = bytes.len()))]
    async fn transfer(&self, slot: &UploadSlot, content_type: &str, bytes: Bytes) -> Result<(), UpstreamError> {
        debug!("Transferring image to upload slot");
        let response = self
            .client
            .put(slot.upload_url.clone())
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await?;
        error_for_status(response).await?;
        Ok(())
    }

    #[instrument(skip_all, fields(tool = %tool))]
    async fn invoke_tool(&self, tool: &ToolName, file_url: &Url, params: &Value) -> Result<JobHandle, UpstreamError> {
        let url = self.endpoint(&["tools", tool.as_str()])?;
        debug!("Invoking tool at {}", url);

        let response = self
            .authorize(self.client.post(url))
            .json(&ToolInvocation {
                image_url: file_url.as_str(),
                params,
            })
            .send()
            .await?;
        let raw: Value = read_json(error_for_status(response).await?).await?;
        JobHandle::from_document(raw.clone()).map_err(|e| UpstreamError::Decode {
            message: e.to_string(),
            body: raw,
        })
    }

    #[instrument(skip(self))]
    async fn job_status(&self, job_id: &str) -> Result<JobState, UpstreamError> {
        let url = self.endpoint(&["jobs", job_id])?;

        let response = self.authorize(self.client.get(url)).send().await?;
        let raw: Value = read_json(error_for_status(response).await?).await?;
        JobState::from_document(raw.clone()).map_err(|e| UpstreamError::Decode {
            message: e.to_string(),
            body: raw,
        })
    }
}
