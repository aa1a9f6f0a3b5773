//! Structured logging schema and field name constants for hrmatch.
//!
//! All crates use these names for structured `tracing` fields so log
//! aggregation can query across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied |
//! | INFO  | Lifecycle events, operation completions |
//! | DEBUG | Decision points, intermediate values, config choices |
//! | TRACE | Per-item iteration (neighbours, pairs, fields) |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "db", "inference", "search", "tasks", "ingest", "extract"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "retrieval", "rerank", "pipeline", "ollama", "pool", "worker"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "query", "score_pairs", "embed_texts", "claim_next"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Job posting id.
pub const JOB_ID: &str = "job_id";

/// Submission UUID.
pub const SUBMISSION_ID: &str = "submission_id";

/// Analysis session id.
pub const SESSION_ID: &str = "session_id";

/// Task UUID being processed.
pub const TASK_ID: &str = "task_id";

/// Task type name.
pub const TASK_TYPE: &str = "task_type";

/// Named queue.
pub const QUEUE: &str = "queue";

/// Vector store collection.
pub const COLLECTION: &str = "collection";

/// Vector document id.
pub const DOCUMENT_ID: &str = "document_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of results returned.
pub const RESULT_COUNT: &str = "result_count";

/// Number of inputs sent to a model.
pub const INPUT_COUNT: &str = "input_count";

/// Requested top-K.
pub const TOP_K: &str = "top_k";

/// Minimum similarity threshold.
pub const MIN_SIMILARITY: &str = "min_similarity";

/// Character length of a text.
pub const TEXT_LEN: &str = "text_len";

// ─── Inference fields ──────────────────────────────────────────────────────

/// Model name used for inference.
pub const MODEL: &str = "model";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

/// Table affected.
pub const DB_TABLE: &str = "db_table";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

/// Slow operation threshold exceeded.
pub const SLOW: &str = "slow";

/// Whether a result was produced without reranking.
pub const DEGRADED: &str = "degraded";

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_field_names_are_distinct() {
        let names = [
            SUBSYSTEM, COMPONENT, OPERATION, JOB_ID, SUBMISSION_ID, SESSION_ID, TASK_ID,
            TASK_TYPE, QUEUE, COLLECTION, DOCUMENT_ID, DURATION_MS, RESULT_COUNT, INPUT_COUNT,
            TOP_K, MIN_SIMILARITY, TEXT_LEN, MODEL, POOL_SIZE, POOL_IDLE, DB_TABLE, SUCCESS,
            ERROR_MSG, SLOW, DEGRADED,
        ];
        let unique: HashSet<&str> = names.iter().copied().collect();
        assert_eq!(unique.len(), names.len());
        assert!(names.iter().all(|n| n.chars().all(|c| c.is_ascii_lowercase() || c == '_')));
    }
}
