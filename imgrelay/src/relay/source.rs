//! Probing and downloading caller-supplied source images.

use bytes::{Bytes, BytesMut};
use reqwest::{
    Client,
    header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderMap},
};
use tracing::{debug, instrument};
use url::Url;

use super::models::{DEFAULT_CONTENT_TYPE, SourceImage};
use super::upstream::error_for_status;
use super::{RelayError, UpstreamError};

/// Reads source images from arbitrary HTTP(S) URLs, capped at `max_bytes`.
#[derive(Clone)]
pub struct SourceFetcher {
    client: Client,
    max_bytes: u64,
}

impl SourceFetcher {
    pub fn new(client: Client, max_bytes: u64) -> Self {
        Self { client, max_bytes }
    }

    /// `HEAD` the source to learn its type and size without downloading it.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn probe(&self, url: &Url) -> Result<SourceImage, RelayError> {
        let response = self
            .client
            .head(url.clone())
            .send()
            .await
            .map_err(|e| RelayError::Probe(e.into()))?;
        let response = error_for_status(response).await.map_err(RelayError::Probe)?;

        let headers = response.headers();
        let source = SourceImage {
            content_type: content_type(headers),
            content_length: content_length(headers),
            file_name: SourceImage::file_name_from_url(url),
        };

        self.ensure_within_limit(source.content_length)?;

        debug!(
            content_type = %source.content_type,
            content_length = ?source.content_length,
            "Probed source image"
        );
        Ok(source)
    }

    /// Download the source body, failing as soon as it grows past the limit.
    #[instrument(skip(self), fields(url = %url))]
    pub async fn fetch(&self, url: &Url) -> Result<Bytes, RelayError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| RelayError::Fetch(e.into()))?;
        let mut response = error_for_status(response).await.map_err(RelayError::Fetch)?;

        self.ensure_within_limit(content_length(response.headers()))?;

        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| RelayError::Fetch(UpstreamError::Transport(e)))?
        {
            self.ensure_within_limit(Some((body.len() + chunk.len()) as u64))?;
            body.extend_from_slice(&chunk);
        }

        if body.is_empty() {
            return Err(RelayError::EmptySource);
        }

        debug!("Fetched {} bytes of source image", body.len());
        Ok(body.freeze())
    }

    /// Reject sizes over the limit. An unknown size passes.
    fn ensure_within_limit(&self, size: Option<u64>) -> Result<(), RelayError> {
        match size {
            Some(size) if size > self.max_bytes => Err(RelayError::TooLarge {
                size,
                limit: self.max_bytes,
            }),
            _ => Ok(()),
        }
    }
}

/// MIME essence of the `Content-Type` header, without parameters.
fn content_type(headers: &HeaderMap) -> String {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE)
        .to_string()
}

// Read from the header rather than the body size hint, which is zero for HEAD responses
fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers.get(CONTENT_LENGTH)?.to_str().ok()?.trim().parse().ok()
}
