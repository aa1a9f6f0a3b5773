//! Centralized default constants for hrmatch.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers. Organized by domain area.

// =============================================================================
// EMBEDDING
// =============================================================================

/// Default embedding model name (Ollama).
pub const EMBED_MODEL: &str = "nomic-embed-text";

/// Default embedding vector dimension for nomic-embed-text.
pub const EMBED_DIMENSION: usize = 768;

/// Default Ollama base URL.
pub const OLLAMA_URL: &str = "http://127.0.0.1:11434";

/// Timeout for embedding requests in seconds.
pub const EMBED_TIMEOUT_SECS: u64 = 30;

/// Collection holding resume vectors.
pub const RESUME_COLLECTION: &str = "resume_embeddings";

/// Collection holding job description vectors.
pub const JOB_COLLECTION: &str = "job_embeddings";

/// Number of hash characters appended to vector document ids.
pub const DOCUMENT_ID_HASH_LEN: usize = 8;

// =============================================================================
// RERANKER
// =============================================================================

/// Default cross-encoder model.
pub const RERANKER_MODEL: &str = "BAAI/bge-reranker-v2-m3";

/// Default reranker service URL.
pub const RERANKER_URL: &str = "http://127.0.0.1:8787";

/// Character budget approximating the reranker's token limit.
pub const RERANK_MAX_CHARS: usize = 32_000;

/// Pairs scored per reranker request.
pub const RERANK_BATCH_SIZE: usize = 8;

/// Timeout for reranker requests in seconds.
pub const RERANK_TIMEOUT_SECS: u64 = 120;

/// Raw scores below this are dropped.
pub const MIN_RERANK_SCORE: f32 = -10.0;

/// Lower bound of the expected raw cross-encoder score range.
pub const RERANK_RAW_MIN: f32 = -10.0;

/// Upper bound of the expected raw cross-encoder score range.
pub const RERANK_RAW_MAX: f32 = 10.0;

// =============================================================================
// SCORING
// =============================================================================

/// Weight of retrieval similarity in the blended final score.
pub const SIMILARITY_WEIGHT: f32 = 0.3;

/// Weight of the normalized rerank score in the blended final score.
pub const RERANK_WEIGHT: f32 = 0.7;

// =============================================================================
// MATCHING
// =============================================================================

/// Resumes returned per job.
pub const JOB_TO_RESUMES_TOP_K: usize = 20;

/// Minimum similarity for resumes matched to a job.
pub const JOB_TO_RESUMES_MIN_SIMILARITY: f32 = 0.4;

/// Jobs returned per resume.
pub const RESUME_TO_JOBS_TOP_K: usize = 10;

/// Minimum similarity for jobs matched to a resume.
pub const RESUME_TO_JOBS_MIN_SIMILARITY: f32 = 0.3;

/// Top-K for batch matching runs.
pub const BATCH_TOP_K: usize = 50;

/// Minimum similarity for batch matching runs.
pub const BATCH_MIN_SIMILARITY: f32 = 0.5;

/// Vector store over-fetch factor relative to top-K.
pub const RETRIEVAL_OVERFETCH: usize = 2;

/// Hard cap on neighbours requested from the vector store.
pub const MAX_QUERY_RESULTS: usize = 100;

/// Largest top-K accepted from a task payload.
pub const MAX_TOP_K: usize = MAX_QUERY_RESULTS;

/// Delay between items of a sequential batch run.
pub const BATCH_ITEM_DELAY_MS: u64 = 100;

// =============================================================================
// TEXT PREPROCESSING
// =============================================================================

/// Minimum sentence length kept by resume deduplication.
pub const RESUME_MIN_SENTENCE_LENGTH: usize = 8;

/// Minimum sentence length kept by job description deduplication.
pub const JOB_MIN_SENTENCE_LENGTH: usize = 10;

/// Minimum sentence length for aggressive preprocessing.
pub const AGGRESSIVE_MIN_SENTENCE_LENGTH: usize = 15;

/// Maximum consecutive newlines kept after preprocessing.
pub const MAX_CONSECUTIVE_NEWLINES: usize = 2;

/// Extracted document text shorter than this is discarded.
pub const MIN_EXTRACTED_TEXT_LENGTH: usize = 10;

/// Adjacent duplicate lines longer than this are kept.
pub const DUPLICATE_LINE_KEEP_LENGTH: usize = 50;

// =============================================================================
// DOCUMENT EXTRACTION
// =============================================================================

/// Timeout for document downloads in seconds.
pub const DOCUMENT_DOWNLOAD_TIMEOUT_SECS: u64 = 30;

/// Timeout for external extraction commands in seconds.
pub const EXTRACTION_CMD_TIMEOUT_SECS: u64 = 30;

/// Minimum length of a binary-scanned text run.
pub const BINARY_SCAN_MIN_RUN: usize = 3;

/// Binary-scanned text shorter than this is rejected.
pub const BINARY_SCAN_MIN_CHARS: usize = 50;

/// Binary-scanned text with fewer words than this is rejected.
pub const BINARY_SCAN_MIN_WORDS: usize = 10;

/// Documents parsed per parse task run.
pub const PARSE_BATCH_LIMIT: i64 = 500;

// =============================================================================
// FORM INGESTION
// =============================================================================

/// Default form API base URL.
pub const FORM_API_URL: &str = "https://api.fillout.com";

/// Submissions requested per page.
pub const FORM_PAGE_SIZE: u32 = 150;

/// Timeout for form API requests in seconds.
pub const FORM_API_TIMEOUT_SECS: u64 = 30;

// =============================================================================
// TASK PROCESSING
// =============================================================================

/// Default maximum retry count for failed tasks.
pub const TASK_MAX_RETRIES: i32 = 3;

/// Backoff tiers in seconds, indexed by attempt and clamped to the last.
pub const RETRY_DELAYS_SECS: [u64; 4] = [60, 300, 900, 1800];

/// Default polling interval when the queue is empty.
pub const TASK_POLL_INTERVAL_MS: u64 = 500;

/// Default number of tasks processed concurrently by one worker.
pub const TASK_MAX_CONCURRENT: usize = 2;

/// Worker event broadcast channel capacity.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Completed tasks kept by queue cleanup.
pub const TASK_CLEANUP_KEEP: i64 = 10_000;

/// Embedded targets fanned out by one reranking launch.
pub const LAUNCH_RERANKING_MAX_TARGETS: i64 = 10_000;

// =============================================================================
// DATABASE
// =============================================================================

/// Default page size for analysis queries.
pub const PAGE_LIMIT: i64 = 50;

// =============================================================================
// OBSERVABILITY
// =============================================================================

/// External calls slower than this are logged as slow.
pub const SLOW_CALL_MS: u64 = 5_000;
