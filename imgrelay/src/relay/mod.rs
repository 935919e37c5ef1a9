//! The relay pipeline.
//!
//! A relay stages a caller's source image with the image-editing API and waits for the result:
//!
//! 1. probe the source image ([`source::SourceFetcher::probe`])
//! 2. request an upload slot ([`upstream::ImageEditingApi::request_upload_slot`])
//! 3. fetch the source bytes ([`source::SourceFetcher::fetch`])
//! 4. transfer the bytes to the slot ([`upstream::ImageEditingApi::transfer`])
//! 5. invoke the remote tool ([`upstream::ImageEditingApi::invoke_tool`])
//! 6. poll the job until it reaches a terminal status ([`orchestrator::RelayOrchestrator::poll`])
//!
//! Nothing is shared between relays except the pooled HTTP client.

pub mod models;
pub mod orchestrator;
pub mod source;
pub mod upstream;

use serde_json::Value;
use std::{fmt, str::FromStr, time::Duration};
use thiserror::Error;
use url::Url;

pub use orchestrator::{PollPolicy, RelayOrchestrator};
pub use source::SourceFetcher;
pub use upstream::{ImageEditingApi, ReqwestImageApi};

/// Longest tool identifier accepted.
const MAX_TOOL_NAME_LEN: usize = 64;

/// Name of a remote processing tool.
///
/// Tool names are interpolated into the upstream URL, so they are restricted to
/// `[A-Za-z0-9._-]` and may not start with a dot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ToolName(String);

#[derive(Debug, Error)]
#[error("invalid tool name {0:?}: expected 1-64 characters from [A-Za-z0-9._-], not starting with '.'")]
pub struct InvalidToolName(pub String);

impl ToolName {
    pub fn parse(name: &str) -> Result<Self, InvalidToolName> {
        let valid = !name.is_empty()
            && name.len() <= MAX_TOOL_NAME_LEN
            && !name.starts_with('.')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
        if valid {
            Ok(Self(name.to_string()))
        } else {
            Err(InvalidToolName(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ToolName {
    type Err = InvalidToolName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated relay request.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub image_url: Url,
    pub tool: ToolName,
    /// Always a JSON object
    pub params: Value,
}

/// How a relay ended when every HTTP exchange worked.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutcome {
    Succeeded { output: Value, job_id: String, polls: u32 },
    /// The remote job failed, was cancelled, or never finished within the poll budget
    Failed { message: String, data: Value },
}

/// Failure talking to the image-editing API or the source host.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("upstream responded with status {status}")]
    Status { status: u16, body: Value },

    #[error("could not decode upstream response: {message}")]
    Decode { message: String, body: Value },

    #[error("cannot build upstream URL from {0}")]
    InvalidUrl(String),
}

impl UpstreamError {
    /// Raw upstream payload, if one was received.
    pub fn diagnostics(&self) -> Option<&Value> {
        match self {
            UpstreamError::Status { body, .. } | UpstreamError::Decode { body, .. } => Some(body),
            UpstreamError::Transport(_) | UpstreamError::InvalidUrl(_) => None,
        }
    }
}

/// A pipeline step that could not complete.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("failed to probe source image: {0}")]
    Probe(UpstreamError),

    #[error("failed to fetch source image: {0}")]
    Fetch(UpstreamError),

    #[error("source image is at least {size} bytes, the limit is {limit}")]
    TooLarge { size: u64, limit: u64 },

    #[error("source image is empty")]
    EmptySource,

    #[error("failed to request upload slot: {0}")]
    UploadSlot(UpstreamError),

    #[error("failed to transfer image to upload slot: {0}")]
    Transfer(UpstreamError),

    #[error("failed to invoke tool {tool}: {source}")]
    Invoke { tool: ToolName, source: UpstreamError },
}

impl RelayError {
    /// Raw upstream payload for the step that failed, if one was received.
    pub fn diagnostics(&self) -> Option<&Value> {
        match self {
            RelayError::Probe(e) | RelayError::Fetch(e) | RelayError::UploadSlot(e) | RelayError::Transfer(e) => e.diagnostics(),
            RelayError::Invoke { source, .. } => source.diagnostics(),
            RelayError::TooLarge { .. } | RelayError::EmptySource => None,
        }
    }
}

/// Install the process-wide rustls provider. Safe to call more than once.
pub fn install_crypto_provider() {
    // Err means a provider is already installed
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
}

/// Build the pooled HTTP client shared by every relay.
pub fn http_client(request_timeout: Duration) -> anyhow::Result<reqwest::Client> {
    install_crypto_provider();
    let client = reqwest::Client::builder()
        .timeout(request_timeout)
        .user_agent(concat!("imgrelay/", env!("CARGO_PKG_VERSION")))
        .build()?;
    Ok(client)
}
