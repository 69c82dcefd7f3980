//! Remote image download over HTTP.

use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::debug;

use crate::domain::{FetchError, ImagePayload};
use crate::ports::MediaFetcher;

/// [`MediaFetcher`] backed by a shared `reqwest` client
#[derive(Debug, Clone)]
pub struct HttpMediaFetcher {
    client: Client,
}

impl HttpMediaFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(5)))
            .build()
            .map_err(|e| FetchError::Transport(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl MediaFetcher for HttpMediaFetcher {
    async fn fetch(&self, url: &str, max_bytes: usize) -> Result<ImagePayload, FetchError> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        if let Some(declared) = response.content_length() {
            let declared = usize::try_from(declared).unwrap_or(usize::MAX);
            if declared > max_bytes {
                return Err(FetchError::TooLarge {
                    size: declared,
                    limit: max_bytes,
                });
            }
        }

        // Only image/* content types are trusted, anything else is sniffed
        let mime_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.split(';').next().unwrap_or(v).trim().to_ascii_lowercase())
            .filter(|v| v.starts_with("image/"));

        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::Transport(e.to_string()))?
        {
            if body.len() + chunk.len() > max_bytes {
                return Err(FetchError::TooLarge {
                    size: body.len() + chunk.len(),
                    limit: max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        debug!(url = %url, size = body.len(), "Remote image downloaded");
        Ok(ImagePayload::new(body.freeze(), mime_type))
    }
}
