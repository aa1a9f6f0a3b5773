//! Cross-encoder reranker served over HTTP.
//!
//! Speaks the text-embeddings-inference rerank protocol:
//!
//! ```text
//! POST /rerank {"query": "...", "texts": ["...", ...], "raw_scores": true, "truncate": true}
//! -> [{"index": 1, "score": 4.2}, {"index": 0, "score": -1.3}]
//! ```
//!
//! The server may return scores in any order; they are mapped back to input
//! order by `index`. Raw logits are requested so that calibration happens in
//! one place (`ScoreCalibration`).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use hrmatch_core::{defaults, Error, RerankBackend, Result};

/// HTTP cross-encoder backend.
pub struct HttpRerankBackend {
    client: Client,
    base_url: String,
    model: String,
    batch_size: usize,
    timeout_secs: u64,
}

impl HttpRerankBackend {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        let model: String = model.into();
        let client = Client::builder()
            .timeout(Duration::from_secs(defaults::RERANK_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());

        info!(
            subsystem = "inference",
            component = "reranker",
            "Initializing reranker backend: url={}, model={}",
            base_url,
            model
        );

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            batch_size: defaults::RERANK_BATCH_SIZE,
            timeout_secs: defaults::RERANK_TIMEOUT_SECS,
        }
    }

    /// Create from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `RERANKER_URL` | `http://127.0.0.1:8787` |
    /// | `RERANKER_MODEL` | `BAAI/bge-reranker-v2-m3` |
    /// | `RERANKER_TIMEOUT_SECS` | 120 |
    /// | `RERANKER_BATCH_SIZE` | 8 |
    pub fn from_env() -> Self {
        let url =
            std::env::var("RERANKER_URL").unwrap_or_else(|_| defaults::RERANKER_URL.to_string());
        let model = std::env::var("RERANKER_MODEL")
            .unwrap_or_else(|_| defaults::RERANKER_MODEL.to_string());
        let mut backend = Self::new(url, model);

        if let Some(secs) = std::env::var("RERANKER_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            backend = backend.with_timeout_secs(secs);
        }
        if let Some(size) = std::env::var("RERANKER_BATCH_SIZE")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            backend = backend.with_batch_size(size);
        }
        backend
    }

    /// Pairs per request; zero is treated as one.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    async fn score_batch(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        let request = RerankRequest {
            query,
            texts,
            raw_scores: true,
            truncate: true,
        };

        let response = self
            .client
            .post(format!("{}/rerank", self.base_url))
            .timeout(Duration::from_secs(self.timeout_secs))
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    Error::Unavailable(format!("reranker unreachable: {}", e))
                } else {
                    Error::Inference(format!("reranker request failed: {}", e))
                }
            })?;

        let status = response.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Unavailable(format!(
                "reranker returned {}: {}",
                status, body
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Inference(format!(
                "reranker returned {}: {}",
                status, body
            )));
        }

        let scores: Vec<RerankScore> = response
            .json()
            .await
            .map_err(|e| Error::Inference(format!("Failed to parse rerank response: {}", e)))?;

        order_scores(scores, texts.len())
    }
}

/// Map `{index, score}` entries back to input order.
fn order_scores(scores: Vec<RerankScore>, expected: usize) -> Result<Vec<f32>> {
    if scores.len() != expected {
        return Err(Error::Inference(format!(
            "reranker returned {} scores for {} texts",
            scores.len(),
            expected
        )));
    }

    let mut ordered: Vec<Option<f32>> = vec![None; expected];
    for entry in scores {
        let slot = ordered.get_mut(entry.index).ok_or_else(|| {
            Error::Inference(format!("reranker returned out-of-range index {}", entry.index))
        })?;
        if slot.replace(entry.score).is_some() {
            return Err(Error::Inference(format!(
                "reranker returned duplicate index {}",
                entry.index
            )));
        }
    }

    ordered
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.ok_or_else(|| Error::Inference(format!("missing score for text {}", i))))
        .collect()
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: &'a [String],
    raw_scores: bool,
    truncate: bool,
}

#[derive(Debug, Deserialize)]
struct RerankScore {
    index: usize,
    score: f32,
}

#[async_trait]
impl RerankBackend for HttpRerankBackend {
    #[instrument(skip(self, query, texts), fields(subsystem = "inference", component = "reranker", op = "score_pairs", model = %self.model, input_count = texts.len()))]
    async fn score_pairs(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let start = Instant::now();
        let mut scores = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            scores.extend(self.score_batch(query, batch).await?);
        }

        let elapsed = start.elapsed().as_millis() as u64;
        debug!(
            result_count = scores.len(),
            batches = texts.len().div_ceil(self.batch_size),
            duration_ms = elapsed,
            "Rerank scoring complete"
        );
        if elapsed > defaults::SLOW_CALL_MS {
            warn!(
                duration_ms = elapsed,
                input_count = texts.len(),
                slow = true,
                "Slow rerank operation"
            );
        }
        Ok(scores)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> Result<bool> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => Ok(true),
            Ok(resp) => {
                warn!("Reranker health check failed: {}", resp.status());
                Ok(false)
            }
            Err(e) => {
                warn!("Reranker health check error: {}", e);
                Ok(false)
            }
        }
    }
}
