//! Second stage of matching: cross-encoder rescoring.
//!
//! Retrieved candidates are scored against the (truncated) target text,
//! calibrated, blended with their retrieval similarity and ranked.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use hrmatch_core::{defaults, rank, BlendedScore, RerankBackend, Result, ScoreCalibration};

use crate::retrieval::RetrievedMatch;

/// A candidate after reranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankedMatch {
    /// 1-based, contiguous
    pub rank_position: usize,
    pub score: BlendedScore,
    #[serde(flatten)]
    pub matched: RetrievedMatch,
}

/// Result of one rerank call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankOutput {
    pub matches: Vec<RerankedMatch>,
    /// Candidates sent to the cross-encoder
    pub candidates_scored: usize,
    /// Candidates dropped by `min_rerank_score`
    pub below_min_score: usize,
    /// Raw scores outside the calibrated range
    pub out_of_range: usize,
    pub query_text_length: usize,
    pub original_text_length: usize,
    pub text_truncated: bool,
    pub model: String,
}

/// Cross-encoder rescoring with score calibration.
pub struct RerankStage {
    backend: Arc<dyn RerankBackend>,
    calibration: ScoreCalibration,
    max_chars: usize,
}

impl RerankStage {
    pub fn new(backend: Arc<dyn RerankBackend>) -> Self {
        Self {
            backend,
            calibration: ScoreCalibration::default(),
            max_chars: defaults::RERANK_MAX_CHARS,
        }
    }

    pub fn with_calibration(mut self, calibration: ScoreCalibration) -> Self {
        self.calibration = calibration;
        self
    }

    pub fn with_max_chars(mut self, max_chars: usize) -> Self {
        self.max_chars = max_chars.max(1);
        self
    }

    pub fn calibration(&self) -> &ScoreCalibration {
        &self.calibration
    }

    pub fn model_name(&self) -> &str {
        self.backend.model_name()
    }

    pub async fn health_check(&self) -> Result<bool> {
        self.backend.health_check().await
    }

    /// Rescore `candidates` against `query` and keep the best `top_k`.
    ///
    /// Candidates whose raw score is below `min_rerank_score` are dropped
    /// before ranking. A reranker outage is returned as
    /// `Error::Unavailable`; nothing is partially ranked.
    #[instrument(
        skip(self, query, candidates),
        fields(
            subsystem = "search",
            component = "rerank",
            op = "rerank",
            model = %self.backend.model_name(),
            input_count = candidates.len(),
        )
    )]
    pub async fn rerank(
        &self,
        query: &str,
        candidates: Vec<RetrievedMatch>,
        top_k: usize,
        min_rerank_score: f32,
    ) -> Result<RerankOutput> {
        let original_text_length = query.chars().count();
        let (query, text_truncated) = truncate_chars(query, self.max_chars);
        let query_text_length = query.chars().count();
        if text_truncated {
            debug!(
                original_text_length,
                query_text_length, "Truncated rerank query"
            );
        }

        let mut output = RerankOutput {
            matches: Vec::new(),
            candidates_scored: candidates.len(),
            below_min_score: 0,
            out_of_range: 0,
            query_text_length,
            original_text_length,
            text_truncated,
            model: self.backend.model_name().to_string(),
        };
        if candidates.is_empty() {
            return Ok(output);
        }

        let start = Instant::now();
        let texts: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
        let raw_scores = self.backend.score_pairs(query, &texts).await?;
        let duration_ms = start.elapsed().as_millis() as u64;
        if duration_ms > defaults::SLOW_CALL_MS {
            warn!(duration_ms, slow = true, "Slow rerank call");
        }

        output.out_of_range = self.calibration.check_range(&raw_scores, &output.model);

        let mut scored = Vec::with_capacity(candidates.len());
        for (candidate, raw) in candidates.into_iter().zip(raw_scores) {
            if raw < min_rerank_score {
                output.below_min_score += 1;
                continue;
            }
            let score = self.calibration.score(candidate.similarity, raw);
            scored.push((candidate, score));
        }

        output.matches = rank(scored, |m: &RetrievedMatch| m.entity.source_id())
            .into_iter()
            .take(top_k)
            .map(|r| RerankedMatch {
                rank_position: r.rank_position,
                score: r.score,
                matched: r.item,
            })
            .collect();

        info!(
            result_count = output.matches.len(),
            below_min_score = output.below_min_score,
            out_of_range = output.out_of_range,
            duration_ms,
            "Rerank complete"
        );
        Ok(output)
    }
}

/// Cut `text` to at most `max_chars` characters without splitting a char.
pub fn truncate_chars(text: &str, max_chars: usize) -> (&str, bool) {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => (&text[..byte_idx], true),
        None => (text, false),
    }
}
