//! Core traits for hrmatch abstractions.
//!
//! Services take these as `Arc<dyn Trait>` so the Postgres repositories and
//! HTTP backends can be swapped for in-memory fakes in tests.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

/// Result of an upsert keyed on a natural key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome<Id> {
    pub id: Id,
    pub created: bool,
}

// =============================================================================
// APPLICANT REPOSITORIES
// =============================================================================

/// Repository for candidates.
#[async_trait]
pub trait CandidateRepository: Send + Sync {
    /// Insert or update a candidate keyed by email.
    ///
    /// Candidates without an email are always inserted.
    async fn upsert_by_email(&self, candidate: &NewCandidate) -> Result<UpsertOutcome<Uuid>>;

    async fn get(&self, id: Uuid) -> Result<Option<Candidate>>;

    async fn get_by_email(&self, email: &str) -> Result<Option<Candidate>>;
}

/// Repository for submissions.
#[async_trait]
pub trait SubmissionRepository: Send + Sync {
    /// Insert or update a submission keyed by its form submission id.
    async fn upsert_from_form(
        &self,
        candidate_id: Uuid,
        submission: &NewSubmission,
        hashes: &ContentHashes,
    ) -> Result<UpsertOutcome<Uuid>>;

    async fn get(&self, id: Uuid) -> Result<Option<Submission>>;

    async fn get_with_candidate(&self, id: Uuid) -> Result<Option<SubmissionWithCandidate>>;

    /// Submissions with a resume link but no extracted text.
    async fn list_needing_text(&self, limit: i64) -> Result<Vec<Submission>>;

    /// Store extracted text and its hash, and mark the submission parsed.
    async fn set_resume_text(&self, id: Uuid, text: &str) -> Result<()>;

    async fn set_status(&self, id: Uuid, status: SubmissionStatus) -> Result<()>;

    /// Submissions whose resume text is available.
    async fn list_with_text(&self, limit: Option<i64>) -> Result<Vec<Submission>>;

    /// Newest form-side update time, used as the incremental fetch cursor.
    async fn latest_form_update(&self) -> Result<Option<DateTime<Utc>>>;

    async fn existing_hashes(&self) -> Result<Vec<StoredHashes>>;
}

// =============================================================================
// EMPLOYER REPOSITORIES
// =============================================================================

/// Repository for companies.
#[async_trait]
pub trait CompanyRepository: Send + Sync {
    /// Insert or update a company keyed by case-insensitive name.
    async fn upsert_by_name(&self, company: &NewCompany) -> Result<UpsertOutcome<i32>>;

    async fn get(&self, id: i32) -> Result<Option<Company>>;
}

/// Repository for job postings.
#[async_trait]
pub trait JobPostingRepository: Send + Sync {
    /// Insert or update a posting keyed by form submission id and vacancy slot.
    async fn upsert_from_form(
        &self,
        company_id: i32,
        posting: &NewJobPosting,
        hashes: &ContentHashes,
    ) -> Result<UpsertOutcome<i32>>;

    async fn get(&self, id: i32) -> Result<Option<JobPosting>>;

    /// Postings with a description link but no extracted text.
    async fn list_needing_text(&self, limit: i64) -> Result<Vec<JobPosting>>;

    async fn set_description_text(&self, id: i32, text: &str) -> Result<()>;

    /// Active postings whose description text is available.
    async fn list_active_with_text(&self, limit: Option<i64>) -> Result<Vec<JobPosting>>;

    async fn deactivate(&self, id: i32) -> Result<()>;

    async fn latest_form_update(&self) -> Result<Option<DateTime<Utc>>>;

    async fn existing_hashes(&self) -> Result<Vec<StoredHashes>>;
}

// =============================================================================
// EMBEDDING PROVENANCE
// =============================================================================

/// Repository for embedding provenance records.
#[async_trait]
pub trait EmbeddingMetadataRepository: Send + Sync {
    /// Insert or replace the record for `(source_type, source_id)`.
    async fn upsert(&self, meta: &NewEmbeddingMetadata) -> Result<EmbeddingMetadata>;

    async fn get_by_source(
        &self,
        source_type: SourceType,
        source_id: &str,
    ) -> Result<Option<EmbeddingMetadata>>;

    async fn get_by_document_id(&self, document_id: &str) -> Result<Option<EmbeddingMetadata>>;

    async fn get_by_collection(&self, collection: &str, limit: i64)
        -> Result<Vec<EmbeddingMetadata>>;

    /// Remove the record, returning whether one existed.
    async fn delete_by_source(&self, source_type: SourceType, source_id: &str) -> Result<bool>;

    /// The subset of `source_ids` with no provenance record.
    async fn sources_without_embeddings(
        &self,
        source_type: SourceType,
        source_ids: &[String],
    ) -> Result<Vec<String>>;

    /// Sources with text whose embedding is missing or was made from other text.
    async fn stale_sources(&self, source_type: SourceType) -> Result<Vec<StaleSource>>;

    /// Records whose source row is gone or no longer has text.
    async fn orphaned(&self, source_type: SourceType) -> Result<Vec<EmbeddingMetadata>>;
}

// =============================================================================
// ANALYSIS
// =============================================================================

/// Repository for reranker analysis results and sessions.
#[async_trait]
pub trait AnalysisRepository: Send + Sync {
    /// Open a session, or return the id of the one already opened with the
    /// same `session_uuid`.
    async fn create_session(&self, session: &NewAnalysisSession) -> Result<i64>;

    async fn complete_session(
        &self,
        session_id: i64,
        total_results: i32,
        stats: JsonValue,
    ) -> Result<()>;

    /// Insert rows in one transaction; rows already present are skipped.
    ///
    /// Returns the number of rows actually inserted.
    async fn insert_results(&self, results: &[NewAnalysisResult]) -> Result<u64>;

    /// Rows for a job, newest run first, rank order within a run.
    async fn get_by_job(&self, job_id: i32, limit: i64) -> Result<Vec<RerankerAnalysisResult>>;

    async fn get_by_submission(
        &self,
        submission_id: Uuid,
        limit: i64,
    ) -> Result<Vec<RerankerAnalysisResult>>;

    /// Rows of the most recent run for a job, in rank order.
    async fn get_latest_by_job(&self, job_id: i32) -> Result<Vec<RerankerAnalysisResult>>;

    /// Best-scoring rows of the most recent run for a job.
    async fn get_top_candidates_for_job(
        &self,
        job_id: i32,
        limit: i64,
        min_rerank_score: Option<f64>,
    ) -> Result<Vec<RerankerAnalysisResult>>;

    async fn get_analytics_by_job(&self, job_id: i32) -> Result<JobAnalytics>;

    async fn get_recent_sessions(&self, limit: i64) -> Result<Vec<RerankerAnalysisSession>>;
}

// =============================================================================
// TASK QUEUE
// =============================================================================

/// Request to enqueue a task.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub task_type: TaskType,
    pub payload: Option<JsonValue>,
    /// Defaults to the task type's priority.
    pub priority: Option<i32>,
    /// Not claimable before this time.
    pub run_after: Option<DateTime<Utc>>,
    /// Defaults to the task type's retry ceiling.
    pub max_retries: Option<i32>,
}

impl NewTask {
    pub fn new(task_type: TaskType) -> Self {
        Self {
            task_type,
            payload: None,
            priority: None,
            run_after: None,
            max_retries: None,
        }
    }

    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_run_after(mut self, run_after: DateTime<Utc>) -> Self {
        self.run_after = Some(run_after);
        self
    }

    pub fn effective_priority(&self) -> i32 {
        self.priority
            .unwrap_or_else(|| self.task_type.default_priority())
    }

    pub fn effective_max_retries(&self) -> i32 {
        self.max_retries
            .unwrap_or_else(|| self.task_type.limits().max_retries)
    }
}

/// Repository for the task queue.
#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn enqueue(&self, task: NewTask) -> Result<Uuid>;

    /// Enqueue unless an identical task (type and payload) is already pending.
    ///
    /// Returns `None` when deduplicated.
    async fn enqueue_deduplicated(&self, task: NewTask) -> Result<Option<Uuid>>;

    /// Claim the highest-priority due task from the given queues.
    ///
    /// An empty `task_types` slice means any type.
    async fn claim_next(&self, queues: &[TaskQueue], task_types: &[TaskType])
        -> Result<Option<Task>>;

    async fn update_progress(&self, id: Uuid, percent: i32, message: Option<&str>) -> Result<()>;

    async fn complete(&self, id: Uuid, result: Option<JsonValue>) -> Result<()>;

    /// Return a running task to pending after `delay`, counting the attempt.
    async fn retry_later(&self, id: Uuid, error: &str, delay: Duration) -> Result<()>;

    /// Mark a task permanently failed.
    async fn fail(&self, id: Uuid, error: &str) -> Result<()>;

    async fn get(&self, id: Uuid) -> Result<Option<Task>>;

    async fn pending_count(&self) -> Result<i64>;

    async fn queue_stats(&self) -> Result<QueueStats>;

    /// Delete finished tasks beyond the newest `keep_count`.
    async fn cleanup(&self, keep_count: i64) -> Result<i64>;
}

// =============================================================================
// INFERENCE TRAITS
// =============================================================================

/// Backend for generating text embeddings.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Generate embeddings for the given texts, one per input.
    async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vector>>;

    /// Expected dimension of embedding vectors.
    fn dimension(&self) -> usize;

    fn model_name(&self) -> &str;

    async fn health_check(&self) -> Result<bool>;
}

/// Cross-encoder scoring (query, candidate) pairs jointly.
#[async_trait]
pub trait RerankBackend: Send + Sync {
    /// Raw relevance scores, in the order of `texts`.
    ///
    /// An unreachable model fails with `Error::Unavailable`.
    async fn score_pairs(&self, query: &str, texts: &[String]) -> Result<Vec<f32>>;

    fn model_name(&self) -> &str;

    async fn health_check(&self) -> Result<bool>;
}
