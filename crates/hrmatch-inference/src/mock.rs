//! Mock backends for deterministic testing.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use hrmatch_inference::mock::{MockEmbeddingBackend, MockRerankBackend};
//!
//! #[tokio::test]
//! async fn test_with_mocks() {
//!     let embedder = MockEmbeddingBackend::new().with_dimension(16);
//!     let reranker = MockRerankBackend::new().with_score("rust", 6.0);
//!
//!     let v = embedder.embed_texts(&["rust engineer".into()]).await.unwrap();
//!     assert_eq!(v[0].as_slice().len(), 16);
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use hrmatch_core::{EmbeddingBackend, Error, RerankBackend, Result, Vector};

#[derive(Debug, Clone)]
pub struct MockCall {
    pub operation: String,
    pub input: String,
    pub timestamp: std::time::Instant,
}

type CallLog = Arc<Mutex<Vec<MockCall>>>;

fn log_call(log: &CallLog, operation: &str, input: &str) {
    if let Ok(mut calls) = log.lock() {
        calls.push(MockCall {
            operation: operation.to_string(),
            input: input.to_string(),
            timestamp: std::time::Instant::now(),
        });
    }
}

fn calls_of(log: &CallLog) -> Vec<MockCall> {
    log.lock().map(|c| c.clone()).unwrap_or_default()
}

/// Deterministic embedding backend.
///
/// Every text maps to a unit vector seeded from its SHA-256 digest, so equal
/// texts embed identically and different texts almost never collide.
#[derive(Clone)]
pub struct MockEmbeddingBackend {
    dimension: usize,
    model: String,
    failing: Arc<AtomicBool>,
    call_log: CallLog,
}

impl MockEmbeddingBackend {
    pub fn new() -> Self {
        Self {
            dimension: hrmatch_core::defaults::EMBED_DIMENSION,
            model: "mock-embed".to_string(),
            failing: Arc::new(AtomicBool::new(false)),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    /// Make subsequent calls fail with `Error::Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> Vec<MockCall> {
        calls_of(&self.call_log)
    }

    pub fn embed_call_count(&self) -> usize {
        self.get_calls().len()
    }

    /// The vector this backend produces for `text`.
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        MockEmbeddingGenerator::generate(text, self.dimension)
    }
}

impl Default for MockEmbeddingBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingBackend for MockEmbeddingBackend {
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>> {
        for text in texts {
            log_call(&self.call_log, "embed", text);
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("mock embedding backend offline".into()));
        }
        Ok(texts
            .iter()
            .map(|t| Vector::from(self.vector_for(t)))
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.failing.load(Ordering::SeqCst))
    }
}

/// Scripted cross-encoder.
///
/// A candidate text's score is the first scripted score whose keyword it
/// contains, otherwise the default score.
#[derive(Clone)]
pub struct MockRerankBackend {
    scripted: Vec<(String, f32)>,
    default_score: f32,
    unavailable: Arc<AtomicBool>,
    call_log: CallLog,
}

impl MockRerankBackend {
    pub fn new() -> Self {
        Self {
            scripted: Vec::new(),
            default_score: 0.0,
            unavailable: Arc::new(AtomicBool::new(false)),
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_score(mut self, keyword: impl Into<String>, score: f32) -> Self {
        self.scripted.push((keyword.into(), score));
        self
    }

    pub fn with_default_score(mut self, score: f32) -> Self {
        self.default_score = score;
        self
    }

    /// Make subsequent calls fail with `Error::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn get_calls(&self) -> Vec<MockCall> {
        calls_of(&self.call_log)
    }

    fn score_for(&self, text: &str) -> f32 {
        self.scripted
            .iter()
            .find(|(keyword, _)| text.contains(keyword.as_str()))
            .map(|(_, score)| *score)
            .unwrap_or(self.default_score)
    }
}

impl Default for MockRerankBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RerankBackend for MockRerankBackend {
    async fn score_pairs(&self, query: &str, texts: &[String]) -> Result<Vec<f32>> {
        log_call(&self.call_log, "score_pairs", query);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(Error::Unavailable("mock reranker offline".into()));
        }
        Ok(texts.iter().map(|t| self.score_for(t)).collect())
    }

    fn model_name(&self) -> &str {
        "mock-reranker"
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(!self.unavailable.load(Ordering::SeqCst))
    }
}

/// Mock embedding generator with deterministic output.
pub struct MockEmbeddingGenerator;

impl MockEmbeddingGenerator {
    /// Generate a deterministic unit vector from text.
    pub fn generate(text: &str, dimension: usize) -> Vec<f32> {
        let digest = Sha256::digest(text.as_bytes());
        let mut seed = [0u8; 8];
        seed.copy_from_slice(&digest[..8]);
        Self::generate_with_seed(u64::from_le_bytes(seed), dimension)
    }

    /// Generate embedding from seed (for random-like but deterministic vectors).
    pub fn generate_with_seed(seed: u64, dimension: usize) -> Vec<f32> {
        let mut vec = vec![0.0; dimension];
        let mut state = seed;

        // LCG
        for item in vec.iter_mut() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            *item = ((state >> 33) % 1000) as f32 / 1000.0 - 0.5;
        }

        Self::normalize(&mut vec);
        vec
    }

    /// Blend `base` toward a seeded vector; `alpha = 1.0` returns `base`.
    pub fn blend(base: &[f32], seed: u64, alpha: f32) -> Vec<f32> {
        let other = Self::generate_with_seed(seed, base.len());
        let mut out: Vec<f32> = base
            .iter()
            .zip(other.iter())
            .map(|(b, o)| alpha * b + (1.0 - alpha) * o)
            .collect();
        Self::normalize(&mut out);
        out
    }

    fn normalize(vec: &mut [f32]) {
        let magnitude: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            vec.iter_mut().for_each(|x| *x /= magnitude);
        }
    }

    /// Calculate cosine similarity between two vectors.
    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() {
            return 0.0;
        }
        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if mag_a > 0.0 && mag_b > 0.0 {
            dot / (mag_a * mag_b)
        } else {
            0.0
        }
    }
}
