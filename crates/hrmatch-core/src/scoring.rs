//! Score calibration for the two-stage match.
//!
//! Retrieval produces a cosine distance, the cross-encoder produces an
//! unbounded raw logit. Both are mapped to `[0, 1]` and blended into the
//! final score that orders persisted results.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::defaults;
use crate::error::{Error, Result};

/// Convert a cosine distance to a similarity in `[0, 1]`.
pub fn distance_to_similarity(distance: f32) -> f32 {
    if !distance.is_finite() {
        return 0.0;
    }
    (1.0 - distance).clamp(0.0, 1.0)
}

/// Weights and expected raw range used to blend scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreCalibration {
    pub similarity_weight: f32,
    pub rerank_weight: f32,
    pub raw_min: f32,
    pub raw_max: f32,
}

impl Default for ScoreCalibration {
    fn default() -> Self {
        Self {
            similarity_weight: defaults::SIMILARITY_WEIGHT,
            rerank_weight: defaults::RERANK_WEIGHT,
            raw_min: defaults::RERANK_RAW_MIN,
            raw_max: defaults::RERANK_RAW_MAX,
        }
    }
}

impl ScoreCalibration {
    /// Build from environment variables, falling back to defaults.
    ///
    /// - `MATCH_SIMILARITY_WEIGHT`
    /// - `MATCH_RERANK_WEIGHT`
    /// - `RERANK_RAW_MIN`
    /// - `RERANK_RAW_MAX`
    pub fn from_env() -> Result<Self> {
        fn read(var: &str, default: f32) -> f32 {
            std::env::var(var)
                .ok()
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(default)
        }

        let base = Self::default();
        let calibration = Self {
            similarity_weight: read("MATCH_SIMILARITY_WEIGHT", base.similarity_weight),
            rerank_weight: read("MATCH_RERANK_WEIGHT", base.rerank_weight),
            raw_min: read("RERANK_RAW_MIN", base.raw_min),
            raw_max: read("RERANK_RAW_MAX", base.raw_max),
        };
        calibration.validate()?;
        Ok(calibration)
    }

    pub fn with_weights(mut self, similarity_weight: f32, rerank_weight: f32) -> Self {
        self.similarity_weight = similarity_weight;
        self.rerank_weight = rerank_weight;
        self
    }

    pub fn with_raw_range(mut self, raw_min: f32, raw_max: f32) -> Self {
        self.raw_min = raw_min;
        self.raw_max = raw_max;
        self
    }

    /// Reject calibrations that cannot produce a bounded score.
    pub fn validate(&self) -> Result<()> {
        if !(self.raw_max > self.raw_min) {
            return Err(Error::Config(format!(
                "rerank raw range is empty: [{}, {}]",
                self.raw_min, self.raw_max
            )));
        }
        if self.similarity_weight < 0.0 || self.rerank_weight < 0.0 {
            return Err(Error::Config("blend weights must be non-negative".into()));
        }
        let total = self.similarity_weight + self.rerank_weight;
        if (total - 1.0).abs() > 1e-4 {
            return Err(Error::Config(format!(
                "blend weights must sum to 1.0, got {}",
                total
            )));
        }
        Ok(())
    }

    /// Map a raw cross-encoder score onto `[0, 1]`.
    pub fn normalize(&self, raw: f32) -> f32 {
        if raw.is_nan() {
            return 0.0;
        }
        ((raw - self.raw_min) / (self.raw_max - self.raw_min)).clamp(0.0, 1.0)
    }

    pub fn is_in_range(&self, raw: f32) -> bool {
        raw >= self.raw_min && raw <= self.raw_max
    }

    /// Weighted blend of similarity and normalized rerank score.
    pub fn blend(&self, similarity: f32, normalized: f32) -> f32 {
        self.similarity_weight * similarity + self.rerank_weight * normalized
    }

    /// Compute every derived score for one pair.
    pub fn score(&self, similarity: f32, raw_rerank: f32) -> BlendedScore {
        let normalized = self.normalize(raw_rerank);
        BlendedScore {
            similarity,
            raw_rerank,
            normalized,
            final_score: self.blend(similarity, normalized),
            improvement: normalized - similarity,
        }
    }

    /// Count raw scores outside the calibrated range and warn if any.
    ///
    /// A non-zero count means the reranker's output range no longer matches
    /// this calibration and the normalized scores saturate.
    pub fn check_range(&self, raw_scores: &[f32], model: &str) -> usize {
        let out_of_range = raw_scores.iter().filter(|s| !self.is_in_range(**s)).count();
        if out_of_range > 0 {
            warn!(
                subsystem = "search",
                component = "scoring",
                model = %model,
                out_of_range,
                total = raw_scores.len(),
                raw_min = self.raw_min,
                raw_max = self.raw_max,
                "Rerank scores outside calibrated range; recalibration needed"
            );
        }
        out_of_range
    }
}

/// Derived scores of one (target, candidate) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlendedScore {
    pub similarity: f32,
    pub raw_rerank: f32,
    pub normalized: f32,
    pub final_score: f32,
    pub improvement: f32,
}

/// An item with its scores and 1-based rank position.
#[derive(Debug, Clone, PartialEq)]
pub struct Ranked<T> {
    pub rank_position: usize,
    pub score: BlendedScore,
    pub item: T,
}

/// Order by final score and assign contiguous 1-based ranks.
///
/// Ties break on raw rerank score, then similarity (both descending), then
/// `id_of` ascending, so the order is deterministic.
pub fn rank<T, F>(scored: Vec<(T, BlendedScore)>, id_of: F) -> Vec<Ranked<T>>
where
    F: Fn(&T) -> String,
{
    let mut scored = scored;
    scored.sort_by(|(a, sa), (b, sb)| {
        sb.final_score
            .total_cmp(&sa.final_score)
            .then_with(|| sb.raw_rerank.total_cmp(&sa.raw_rerank))
            .then_with(|| sb.similarity.total_cmp(&sa.similarity))
            .then_with(|| id_of(a).cmp(&id_of(b)))
    });

    scored
        .into_iter()
        .enumerate()
        .map(|(i, (item, score))| Ranked {
            rank_position: i + 1,
            score,
            item,
        })
        .collect()
}

/// Compare two similarities descending, NaN last.
pub fn cmp_similarity_desc(a: f32, b: f32) -> Ordering {
    b.total_cmp(&a)
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-6;

    #[test]
    fn test_distance_to_similarity() {
        assert!((distance_to_similarity(0.0) - 1.0).abs() < EPS);
        assert!((distance_to_similarity(0.25) - 0.75).abs() < EPS);
        assert_eq!(distance_to_similarity(1.5), 0.0);
        assert_eq!(distance_to_similarity(-0.2), 1.0);
        assert_eq!(distance_to_similarity(f32::NAN), 0.0);
    }

    #[test]
    fn test_normalize_anchors() {
        let cal = ScoreCalibration::default();
        assert!((cal.normalize(-10.0) - 0.0).abs() < EPS);
        assert!((cal.normalize(0.0) - 0.5).abs() < EPS);
        assert!((cal.normalize(10.0) - 1.0).abs() < EPS);
        assert!((cal.normalize(5.0) - 0.75).abs() < EPS);
    }

    #[test]
    fn test_normalize_clamps() {
        let cal = ScoreCalibration::default();
        assert_eq!(cal.normalize(-42.0), 0.0);
        assert_eq!(cal.normalize(17.5), 1.0);
        assert_eq!(cal.normalize(f32::NAN), 0.0);
    }

    #[test]
    fn test_normalize_stays_in_unit_interval() {
        let cal = ScoreCalibration::default();
        let mut raw = -30.0;
        while raw <= 30.0 {
            let n = cal.normalize(raw);
            assert!((0.0..=1.0).contains(&n), "raw {} -> {}", raw, n);
            raw += 0.37;
        }
    }

    #[test]
    fn test_blend_formula_exact() {
        let cal = ScoreCalibration::default();
        let s = cal.score(0.62, 3.0);
        let expected_norm = (3.0 + 10.0) / 20.0;
        assert!((s.normalized - expected_norm).abs() < EPS);
        assert!((s.final_score - (0.3 * 0.62 + 0.7 * expected_norm)).abs() < EPS);
        assert!((s.improvement - (expected_norm - 0.62)).abs() < EPS);
    }

    #[test]
    fn test_custom_raw_range() {
        let cal = ScoreCalibration::default().with_raw_range(0.0, 1.0);
        assert!((cal.normalize(0.25) - 0.25).abs() < EPS);
        assert_eq!(cal.normalize(3.0), 1.0);
    }

    #[test]
    fn test_validate_rejects_bad_calibrations() {
        assert!(ScoreCalibration::default().validate().is_ok());
        assert!(ScoreCalibration::default()
            .with_raw_range(1.0, 1.0)
            .validate()
            .is_err());
        assert!(ScoreCalibration::default()
            .with_weights(0.5, 0.6)
            .validate()
            .is_err());
        assert!(ScoreCalibration::default()
            .with_weights(-0.2, 1.2)
            .validate()
            .is_err());
        assert!(ScoreCalibration::default()
            .with_weights(0.5, 0.5)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_check_range_counts_outliers() {
        let cal = ScoreCalibration::default();
        assert_eq!(cal.check_range(&[-10.0, 0.0, 10.0], "m"), 0);
        assert_eq!(cal.check_range(&[-11.0, 0.0, 12.0], "m"), 2);
    }

    #[test]
    fn test_rank_contiguous_and_non_increasing() {
        let cal = ScoreCalibration::default();
        let scored = vec![
            ("a", cal.score(0.9, -5.0)),
            ("b", cal.score(0.5, 8.0)),
            ("c", cal.score(0.7, 2.0)),
            ("d", cal.score(0.4, 8.0)),
        ];
        let ranked = rank(scored, |id| id.to_string());

        let positions: Vec<usize> = ranked.iter().map(|r| r.rank_position).collect();
        assert_eq!(positions, vec![1, 2, 3, 4]);
        for w in ranked.windows(2) {
            assert!(w[0].score.final_score >= w[1].score.final_score);
        }
        assert_eq!(ranked[0].item, "b");
    }

    #[test]
    fn test_rank_ties_are_deterministic() {
        let cal = ScoreCalibration::default();
        let s = cal.score(0.5, 1.0);
        let ranked = rank(vec![("z", s), ("a", s), ("m", s)], |id| id.to_string());
        let ids: Vec<&str> = ranked.iter().map(|r| r.item).collect();
        assert_eq!(ids, vec!["a", "m", "z"]);
    }

    #[test]
    fn test_rank_empty() {
        let ranked: Vec<Ranked<&str>> = rank(vec![], |id: &&str| id.to_string());
        assert!(ranked.is_empty());
    }

    #[test]
    fn test_cmp_similarity_desc() {
        let mut v = vec![0.2, 0.9, 0.5];
        v.sort_by(|a, b| cmp_similarity_desc(*a, *b));
        assert_eq!(v, vec![0.9, 0.5, 0.2]);
    }
}
