//! Download of linked resume and job description documents.

use std::time::{Duration, Instant};

use reqwest::Client;
use tracing::{debug, instrument, warn};

use hrmatch_core::defaults::{DOCUMENT_DOWNLOAD_TIMEOUT_SECS, SLOW_CALL_MS};
use hrmatch_core::{Error, Result};

/// A downloaded document.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub bytes: Vec<u8>,
    /// Lower-cased `Content-Type` header, empty when absent.
    pub content_type: String,
}

/// HTTP downloader for document links.
#[derive(Debug, Clone)]
pub struct DocumentFetcher {
    client: Client,
    timeout_secs: u64,
}

impl Default for DocumentFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentFetcher {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
            timeout_secs: DOCUMENT_DOWNLOAD_TIMEOUT_SECS,
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Download `url`. Only `http` and `https` links are followed.
    #[instrument(
        skip(self),
        fields(subsystem = "extract", component = "fetcher", op = "fetch")
    )]
    pub async fn fetch(&self, url: &str) -> Result<FetchedDocument> {
        let url = url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(Error::InvalidInput(format!(
                "unsupported document url: {}",
                url
            )));
        }

        let start = Instant::now();
        let response = self
            .client
            .get(url)
            .timeout(Duration::from_secs(self.timeout_secs))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Request(format!(
                "document download returned {}",
                status
            )));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();
        let bytes = response.bytes().await?.to_vec();

        let duration_ms = start.elapsed().as_millis() as u64;
        if duration_ms > SLOW_CALL_MS {
            warn!(duration_ms, size = bytes.len(), slow = true, "Slow document download");
        } else {
            debug!(duration_ms, size = bytes.len(), %content_type, "Downloaded document");
        }

        Ok(FetchedDocument {
            bytes,
            content_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_non_http_urls() {
        let fetcher = DocumentFetcher::new();
        for url in ["ftp://files/cv.pdf", "file:///etc/passwd", "", "cv.pdf"] {
            assert!(matches!(
                fetcher.fetch(url).await,
                Err(Error::InvalidInput(_))
            ));
        }
    }
}
