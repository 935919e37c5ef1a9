//! Values exchanged with the source host and the image-editing API.
//!
//! Everything here lives for exactly one relay and is dropped once the response is sent.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use url::Url;

/// Content type assumed when the source host does not send one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Metadata learned from probing the source image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    /// MIME type without parameters, e.g. `image/png`
    pub content_type: String,
    /// Size advertised by the source host, if any
    pub content_length: Option<u64>,
    /// Last non-empty path segment of the source URL
    pub file_name: String,
}

impl SourceImage {
    /// Derive a file name from the URL path, falling back to `image`.
    pub fn file_name_from_url(url: &Url) -> String {
        url.path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .map(str::to_string)
            .unwrap_or_else(|| "image".to_string())
    }
}

/// Body of `POST uploads`.
#[derive(Debug, Serialize)]
pub struct UploadSlotRequest<'a> {
    pub file_name: &'a str,
    pub content_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

impl<'a> From<&'a SourceImage> for UploadSlotRequest<'a> {
    fn from(source: &'a SourceImage) -> Self {
        Self {
            file_name: &source.file_name,
            content_type: &source.content_type,
            size: source.content_length,
        }
    }
}

/// A presigned write location plus the URL the upstream reads the file back from.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadSlot {
    pub upload_url: Url,
    #[serde(alias = "url", alias = "read_url")]
    pub file_url: Url,
}

/// Body of `POST tools/{tool}`.
#[derive(Debug, Serialize)]
pub struct ToolInvocation<'a> {
    pub image_url: &'a str,
    pub params: &'a Value,
}

/// Lifecycle state of a remote job.
///
/// Upstream APIs disagree on spelling, so several aliases are folded into each variant.
/// Anything unrecognised becomes [`JobStatus::Unknown`], which keeps the poll loop going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Cancelled,
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed | JobStatus::Cancelled)
    }
}

impl From<&str> for JobStatus {
    fn from(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "queued" | "pending" | "submitted" => JobStatus::Pending,
            "processing" | "running" | "in_progress" | "started" => JobStatus::Running,
            "succeeded" | "completed" | "complete" | "success" | "done" => JobStatus::Succeeded,
            "failed" | "error" | "errored" => JobStatus::Failed,
            "cancelled" | "canceled" => JobStatus::Cancelled,
            _ => JobStatus::Unknown,
        }
    }
}

impl<'de> Deserialize<'de> for JobStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s: String = Deserialize::deserialize(deserializer)?;
        Ok(JobStatus::from(s.as_str()))
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Job ids arrive as strings from most APIs and as integers from some.
fn deserialize_job_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) if !s.is_empty() => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("expected a job id, got {other}"))),
    }
}

/// Reply to a tool invocation.
#[derive(Debug, Clone, Deserialize)]
pub struct JobHandle {
    #[serde(alias = "id", deserialize_with = "deserialize_job_id")]
    pub job_id: String,
    /// Poll budget chosen by the remote
    #[serde(default, alias = "max_retries")]
    pub max_polls: Option<u32>,
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
    /// Some tools finish synchronously and report a terminal status right away
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[serde(default, alias = "result")]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(skip)]
    pub raw: Value,
}

impl JobHandle {
    pub fn from_document(raw: Value) -> Result<Self, serde_json::Error> {
        let mut handle: JobHandle = serde_json::from_value(raw.clone())?;
        handle.raw = raw;
        Ok(handle)
    }

    /// Reason a synchronously failed tool gave, if any.
    pub fn error_message(&self) -> Option<String> {
        error_reason(self.error.as_ref())
    }
}

/// A single observation of a job, as returned by `GET jobs/{id}`.
#[derive(Debug, Clone)]
pub struct JobState {
    pub status: JobStatus,
    pub output: Option<Value>,
    pub error: Option<Value>,
    /// The full document, passed back to callers as diagnostic data
    pub raw: Value,
}

#[derive(Deserialize)]
struct JobStateFields {
    status: JobStatus,
    #[serde(default, alias = "result")]
    output: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

impl JobState {
    pub fn from_document(raw: Value) -> Result<Self, serde_json::Error> {
        let fields: JobStateFields = serde_json::from_value(raw.clone())?;
        Ok(Self {
            status: fields.status,
            output: fields.output.filter(|v| !v.is_null()),
            error: fields.error.filter(|v| !v.is_null()),
            raw,
        })
    }

    /// Human readable reason for a failed job, if the remote gave one.
    pub fn error_message(&self) -> Option<String> {
        error_reason(self.error.as_ref())
    }
}

/// `error` may be a bare string or an object with a `message`.
fn error_reason(error: Option<&Value>) -> Option<String> {
    match error? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("message").and_then(Value::as_str).map(str::to_string),
        other => Some(other.to_string()),
    }
}
