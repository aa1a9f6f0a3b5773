//! Domain models for hrmatch.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

pub use pgvector::Vector;

use crate::defaults;
use crate::error::Error;

// =============================================================================
// CANDIDATES & SUBMISSIONS
// =============================================================================

/// A person applying for positions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: Uuid,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub linkedin: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Candidate {
    /// "First Last", or "Unknown" when neither part is present.
    pub fn display_name(&self) -> String {
        let name = format!(
            "{} {}",
            self.first_name.as_deref().unwrap_or(""),
            self.last_name.as_deref().unwrap_or("")
        );
        let name = name.trim();
        if name.is_empty() {
            "Unknown".to_string()
        } else {
            name.to_string()
        }
    }
}

/// Candidate attributes mapped from a form submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewCandidate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub linkedin: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
    pub zip_code: Option<String>,
}

/// Workflow status of a submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    #[default]
    Submitted,
    Parsed,
    Embedded,
    Matched,
    Failed,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Submitted => "submitted",
            SubmissionStatus::Parsed => "parsed",
            SubmissionStatus::Embedded => "embedded",
            SubmissionStatus::Matched => "matched",
            SubmissionStatus::Failed => "failed",
        }
    }
}

impl FromStr for SubmissionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submitted" => Ok(SubmissionStatus::Submitted),
            "parsed" => Ok(SubmissionStatus::Parsed),
            "embedded" => Ok(SubmissionStatus::Embedded),
            "matched" => Ok(SubmissionStatus::Matched),
            "failed" => Ok(SubmissionStatus::Failed),
            other => Err(Error::InvalidInput(format!(
                "unknown submission status: {}",
                other
            ))),
        }
    }
}

/// One application instance: resume text plus parsed form attributes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub submission_id: Uuid,
    pub candidate_id: Uuid,
    pub form_submission_id: String,
    pub status: SubmissionStatus,
    pub position: Option<String>,
    pub current_company: Option<String>,
    pub current_role: Option<String>,
    pub years_experience: Option<i32>,
    pub min_salary: Option<f64>,
    pub max_salary: Option<f64>,
    pub salary_currency: Option<String>,
    pub education_level: Option<String>,
    pub field_of_study: Option<String>,
    pub university: Option<String>,
    pub graduation_year: Option<i32>,
    pub core_competency: Option<String>,
    pub preferred_role_type: Option<String>,
    pub preferred_industry: Option<String>,
    pub work_preference: Option<String>,
    pub willing_to_relocate: Option<String>,
    pub us_work_authorized: bool,
    pub visa_sponsorship_required: bool,
    pub resume_url: Option<String>,
    pub resume_raw_text: Option<String>,
    pub resume_text_hash: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Submission {
    /// Whether parsed resume text is available for embedding.
    pub fn has_text(&self) -> bool {
        self.resume_raw_text
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }
}

/// Submission attributes mapped from a form submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewSubmission {
    pub form_submission_id: String,
    pub position: Option<String>,
    pub current_company: Option<String>,
    pub current_role: Option<String>,
    pub years_experience: Option<i32>,
    pub min_salary: Option<f64>,
    pub max_salary: Option<f64>,
    pub salary_currency: Option<String>,
    pub education_level: Option<String>,
    pub field_of_study: Option<String>,
    pub university: Option<String>,
    pub graduation_year: Option<i32>,
    pub core_competency: Option<String>,
    pub preferred_role_type: Option<String>,
    pub preferred_industry: Option<String>,
    pub work_preference: Option<String>,
    pub willing_to_relocate: Option<String>,
    pub us_work_authorized: Option<bool>,
    pub visa_sponsorship_required: Option<bool>,
    pub resume_url: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub last_updated: Option<DateTime<Utc>>,
}

/// A submission joined with its candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionWithCandidate {
    pub submission: Submission,
    pub candidate: Candidate,
}

/// Fingerprints used to detect re-delivered form submissions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentHashes {
    pub content_hash: String,
    pub file_hash: Option<String>,
    pub metadata_hash: String,
    pub composite_hash: String,
}

/// Stored fingerprints of an existing record, for duplicate checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredHashes {
    /// Submission UUID or job id rendered as text.
    pub record_id: String,
    pub hashes: ContentHashes,
}

// =============================================================================
// COMPANIES & JOB POSTINGS
// =============================================================================

/// A hiring company.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Company {
    pub company_id: i32,
    pub name: String,
    pub industry: Option<String>,
    pub company_size: Option<String>,
    pub website: Option<String>,
    pub description: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_position: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Company attributes mapped from a form submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewCompany {
    pub name: Option<String>,
    pub industry: Option<String>,
    pub company_size: Option<String>,
    pub website: Option<String>,
    pub description: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub postal_code: Option<String>,
    pub contact_name: Option<String>,
    pub contact_email: Option<String>,
    pub contact_phone: Option<String>,
    pub contact_position: Option<String>,
}

/// A job posting owned by a company.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPosting {
    pub job_id: i32,
    pub company_id: i32,
    pub form_submission_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub description_url: Option<String>,
    pub description_raw_text: Option<String>,
    pub description_text_hash: Option<String>,
    pub requirements: Option<String>,
    pub responsibilities: Option<String>,
    pub employment_type: Option<String>,
    pub experience_level: Option<String>,
    pub location: Option<String>,
    pub remote_work: bool,
    pub salary_min: Option<f64>,
    pub salary_max: Option<f64>,
    pub salary_currency: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobPosting {
    /// Whether parsed description text is available for embedding.
    pub fn has_text(&self) -> bool {
        self.description_raw_text
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }
}

/// Job posting attributes mapped from a form submission.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewJobPosting {
    pub form_submission_id: Option<String>,
    /// Position of the vacancy within its form submission (1-based).
    pub vacancy_slot: i32,
    pub title: Option<String>,
    pub description: Option<String>,
    pub description_url: Option<String>,
    pub requirements: Option<String>,
    pub responsibilities: Option<String>,
    pub employment_type: Option<String>,
    pub experience_level: Option<String>,
    pub location: Option<String>,
    pub remote_work: Option<bool>,
    pub salary_min: Option<f64>,
    pub salary_max: Option<f64>,
    pub salary_currency: Option<String>,
    pub form_last_updated: Option<DateTime<Utc>>,
}

// =============================================================================
// EMBEDDING PROVENANCE
// =============================================================================

/// Kind of entity an embedding was generated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Resume,
    JobDescription,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Resume => "resume",
            SourceType::JobDescription => "job_description",
        }
    }

    /// Vector store collection holding this source type.
    pub fn collection(&self) -> &'static str {
        match self {
            SourceType::Resume => defaults::RESUME_COLLECTION,
            SourceType::JobDescription => defaults::JOB_COLLECTION,
        }
    }

    /// Prefix of vector document ids for this source type.
    pub fn document_prefix(&self) -> &'static str {
        match self {
            SourceType::Resume => "resume",
            SourceType::JobDescription => "job",
        }
    }

    /// The collection searched when this source type is the query.
    pub fn opposite(&self) -> SourceType {
        match self {
            SourceType::Resume => SourceType::JobDescription,
            SourceType::JobDescription => SourceType::Resume,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "resume" => Ok(SourceType::Resume),
            "job_description" => Ok(SourceType::JobDescription),
            other => Err(Error::InvalidInput(format!("unknown source type: {}", other))),
        }
    }
}

/// Provenance of one vector store document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingMetadata {
    pub embedding_id: Uuid,
    pub source_type: SourceType,
    pub source_id: String,
    pub document_id: String,
    pub collection_name: String,
    /// The exact (preprocessed) text that was embedded.
    pub text_content: String,
    /// Hash of the raw source text at embedding time.
    pub source_text_hash: Option<String>,
    pub model_name: String,
    pub additional_metadata: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request to record embedding provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEmbeddingMetadata {
    pub source_type: SourceType,
    pub source_id: String,
    pub document_id: String,
    pub collection_name: String,
    pub text_content: String,
    pub source_text_hash: Option<String>,
    pub model_name: String,
    pub additional_metadata: Option<JsonValue>,
}

/// A source whose embedding is missing or out of date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StaleSource {
    pub source_id: String,
    /// Present when an older embedding exists and must be replaced.
    pub existing_document_id: Option<String>,
}

// =============================================================================
// MATCHING
// =============================================================================

/// Direction of a matching run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchType {
    JobToResumes,
    ResumeToJobs,
}

impl SearchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SearchType::JobToResumes => "job_to_resumes",
            SearchType::ResumeToJobs => "resume_to_jobs",
        }
    }

    /// `analysis_type` recorded on persisted rows.
    pub fn analysis_type(&self) -> &'static str {
        match self {
            SearchType::JobToResumes => "job_to_resumes_rerank",
            SearchType::ResumeToJobs => "resume_to_jobs_rerank",
        }
    }

    /// Source type of the query target.
    pub fn target_source(&self) -> SourceType {
        match self {
            SearchType::JobToResumes => SourceType::JobDescription,
            SearchType::ResumeToJobs => SourceType::Resume,
        }
    }

    /// Source type of the candidates searched.
    pub fn candidate_source(&self) -> SourceType {
        self.target_source().opposite()
    }
}

/// Parameters of one matching invocation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchRequest {
    pub top_k: usize,
    pub min_similarity: f32,
    #[serde(default = "default_min_rerank_score")]
    pub min_rerank_score: f32,
}

fn default_min_rerank_score() -> f32 {
    defaults::MIN_RERANK_SCORE
}

impl MatchRequest {
    pub fn new(top_k: usize, min_similarity: f32) -> Self {
        Self {
            top_k,
            min_similarity,
            min_rerank_score: defaults::MIN_RERANK_SCORE,
        }
    }

    /// Defaults for matching resumes to one job.
    pub fn for_job() -> Self {
        Self::new(
            defaults::JOB_TO_RESUMES_TOP_K,
            defaults::JOB_TO_RESUMES_MIN_SIMILARITY,
        )
    }

    /// Defaults for matching jobs to one resume.
    pub fn for_resume() -> Self {
        Self::new(
            defaults::RESUME_TO_JOBS_TOP_K,
            defaults::RESUME_TO_JOBS_MIN_SIMILARITY,
        )
    }

    /// Defaults for batch runs.
    pub fn batch() -> Self {
        Self::new(defaults::BATCH_TOP_K, defaults::BATCH_MIN_SIMILARITY)
    }

    pub fn with_min_rerank_score(mut self, score: f32) -> Self {
        self.min_rerank_score = score;
        self
    }

    /// Neighbours requested from the vector store.
    pub fn n_results(&self) -> usize {
        self.top_k
            .saturating_mul(defaults::RETRIEVAL_OVERFETCH)
            .min(defaults::MAX_QUERY_RESULTS)
    }
}

/// Snapshot of search parameters stored with every analysis row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    pub top_k: usize,
    pub min_similarity: f32,
    pub min_rerank_score: f32,
    pub search_type: SearchType,
    pub query_text_length: usize,
    pub original_text_length: usize,
    pub text_truncated: bool,
}

/// Workflow statistics stored with every analysis row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStats {
    pub total_candidates_found: usize,
    pub reranked_candidates: usize,
    pub processing_time: DateTime<Utc>,
    pub collection: String,
}

// =============================================================================
// ANALYSIS RESULTS
// =============================================================================

/// One scored (job, submission) pair ready to persist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAnalysisResult {
    pub session_id: Option<i64>,
    pub job_id: i32,
    pub submission_id: Uuid,
    pub original_similarity: f64,
    pub rerank_score: f64,
    pub final_score: f64,
    pub score_improvement: f64,
    pub rank_position: i32,
    pub search_params: JsonValue,
    pub reranker_model: String,
    pub workflow_stats: JsonValue,
    pub job_title: Option<String>,
    pub company_id: Option<i32>,
    pub candidate_name: Option<String>,
    pub candidate_email: Option<String>,
    pub total_candidates_found: i32,
    pub analysis_type: String,
    pub processed_at: DateTime<Utc>,
}

/// A persisted reranker analysis row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerAnalysisResult {
    pub analysis_id: i64,
    pub session_id: Option<i64>,
    pub job_id: i32,
    pub submission_id: Uuid,
    pub original_similarity: f64,
    pub rerank_score: f64,
    pub final_score: f64,
    pub score_improvement: f64,
    pub rank_position: i32,
    pub search_params: JsonValue,
    pub reranker_model: String,
    pub workflow_stats: Option<JsonValue>,
    pub job_title: Option<String>,
    pub company_id: Option<i32>,
    pub candidate_name: Option<String>,
    pub candidate_email: Option<String>,
    pub total_candidates_found: i32,
    pub analysis_type: String,
    pub processed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// Request to open an analysis session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAnalysisSession {
    pub session_uuid: Uuid,
    pub job_id: Option<i32>,
    pub submission_id: Option<Uuid>,
    pub company_id: Option<i32>,
    pub analysis_type: String,
    pub search_params: JsonValue,
    pub reranker_model: String,
    pub started_at: DateTime<Utc>,
}

/// Groups the analysis rows of one matching invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerAnalysisSession {
    pub session_id: i64,
    pub session_uuid: Uuid,
    pub job_id: Option<i32>,
    pub submission_id: Option<Uuid>,
    pub company_id: Option<i32>,
    pub analysis_type: String,
    pub total_results: i32,
    pub search_params: JsonValue,
    pub reranker_model: String,
    pub session_stats: Option<JsonValue>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Analysis write carried by a `persist_analysis` task after the first
/// attempt failed.
///
/// `session` is replayed through the idempotent `create_session`, so rows
/// end up grouped under the same session whether or not it was opened before
/// the failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeferredAnalysis {
    #[serde(default)]
    pub session: Option<NewAnalysisSession>,
    #[serde(default)]
    pub session_stats: JsonValue,
    #[serde(default)]
    pub results: Vec<NewAnalysisResult>,
}

/// Analysis count for one calendar day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: i64,
}

/// Aggregate analytics over all analyses of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAnalytics {
    pub job_id: i32,
    pub total_analyses: i64,
    pub avg_rerank_score: Option<f64>,
    pub avg_improvement: Option<f64>,
    pub top_score: Option<f64>,
    pub analyses_by_date: Vec<DailyCount>,
}

// =============================================================================
// TASK QUEUE
// =============================================================================

/// Status of a task in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Cancelled => "cancelled",
        }
    }
}

impl FromStr for TaskStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "cancelled" => Ok(TaskStatus::Cancelled),
            other => Err(Error::InvalidInput(format!("unknown task status: {}", other))),
        }
    }
}

/// Named queue a task is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskQueue {
    FilloutProcessing,
    Embeddings,
    Reranking,
    Orchestration,
}

impl TaskQueue {
    pub const ALL: [TaskQueue; 4] = [
        TaskQueue::FilloutProcessing,
        TaskQueue::Embeddings,
        TaskQueue::Reranking,
        TaskQueue::Orchestration,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskQueue::FilloutProcessing => "fillout_processing",
            TaskQueue::Embeddings => "embeddings",
            TaskQueue::Reranking => "reranking",
            TaskQueue::Orchestration => "orchestration",
        }
    }
}

impl fmt::Display for TaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskQueue {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskQueue::ALL
            .into_iter()
            .find(|q| q.as_str() == s.trim())
            .ok_or_else(|| Error::InvalidInput(format!("unknown queue: {}", s)))
    }
}

/// Soft and hard execution limits of a task type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLimits {
    pub soft_secs: u64,
    pub hard_secs: u64,
    pub max_retries: i32,
}

impl TaskLimits {
    pub const fn new(soft_secs: u64, hard_secs: u64) -> Self {
        Self {
            soft_secs,
            hard_secs,
            max_retries: defaults::TASK_MAX_RETRIES,
        }
    }
}

/// Type of background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Pull new resume submissions from the form API
    FetchResumes,
    /// Pull new company/job submissions from the form API
    FetchJobs,
    /// Download and extract resume documents
    ParseResumeText,
    /// Download and extract job description documents
    ParseJobText,
    /// Embed resumes with new or changed text
    GenerateResumeEmbeddings,
    /// Embed job descriptions with new or changed text
    GenerateJobEmbeddings,
    /// Remove embeddings whose source disappeared
    CleanupEmbeddings,
    /// Retrieval-only match of resumes for one job
    MatchResumesForJob,
    /// Retrieval-only match of jobs for one resume
    MatchJobsForResume,
    /// Sequential retrieval over many jobs
    BatchMatchJobs,
    /// Sequential retrieval over many resumes
    BatchMatchResumes,
    /// Full search, rerank and persist run for one job
    RerankResumesForJob,
    /// Full search, rerank and persist run for one resume
    RerankJobsForResume,
    /// Deferred write of analysis rows after a persistence failure
    PersistAnalysis,
    /// Fan out rerank tasks for every embedded job and resume
    LaunchReranking,
    /// Chain fetch, parse, embed and rerank stages
    RunFullPipeline,
}

impl TaskType {
    pub const ALL: [TaskType; 16] = [
        TaskType::FetchResumes,
        TaskType::FetchJobs,
        TaskType::ParseResumeText,
        TaskType::ParseJobText,
        TaskType::GenerateResumeEmbeddings,
        TaskType::GenerateJobEmbeddings,
        TaskType::CleanupEmbeddings,
        TaskType::MatchResumesForJob,
        TaskType::MatchJobsForResume,
        TaskType::BatchMatchJobs,
        TaskType::BatchMatchResumes,
        TaskType::RerankResumesForJob,
        TaskType::RerankJobsForResume,
        TaskType::PersistAnalysis,
        TaskType::LaunchReranking,
        TaskType::RunFullPipeline,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::FetchResumes => "fetch_resumes",
            TaskType::FetchJobs => "fetch_jobs",
            TaskType::ParseResumeText => "parse_resume_text",
            TaskType::ParseJobText => "parse_job_text",
            TaskType::GenerateResumeEmbeddings => "generate_resume_embeddings",
            TaskType::GenerateJobEmbeddings => "generate_job_embeddings",
            TaskType::CleanupEmbeddings => "cleanup_embeddings",
            TaskType::MatchResumesForJob => "match_resumes_for_job",
            TaskType::MatchJobsForResume => "match_jobs_for_resume",
            TaskType::BatchMatchJobs => "batch_match_jobs",
            TaskType::BatchMatchResumes => "batch_match_resumes",
            TaskType::RerankResumesForJob => "rerank_resumes_for_job",
            TaskType::RerankJobsForResume => "rerank_jobs_for_resume",
            TaskType::PersistAnalysis => "persist_analysis",
            TaskType::LaunchReranking => "launch_reranking",
            TaskType::RunFullPipeline => "run_full_pipeline",
        }
    }

    /// Queue this task type is routed to.
    pub fn queue(&self) -> TaskQueue {
        match self {
            TaskType::FetchResumes
            | TaskType::FetchJobs
            | TaskType::ParseResumeText
            | TaskType::ParseJobText => TaskQueue::FilloutProcessing,
            TaskType::GenerateResumeEmbeddings
            | TaskType::GenerateJobEmbeddings
            | TaskType::CleanupEmbeddings => TaskQueue::Embeddings,
            TaskType::MatchResumesForJob
            | TaskType::MatchJobsForResume
            | TaskType::BatchMatchJobs
            | TaskType::BatchMatchResumes
            | TaskType::RerankResumesForJob
            | TaskType::RerankJobsForResume
            | TaskType::PersistAnalysis => TaskQueue::Reranking,
            TaskType::LaunchReranking | TaskType::RunFullPipeline => TaskQueue::Orchestration,
        }
    }

    /// Default priority (higher = more urgent).
    pub fn default_priority(&self) -> i32 {
        match self {
            // Deferred writes hold an already computed ranking
            TaskType::PersistAnalysis => 9,
            TaskType::MatchResumesForJob | TaskType::MatchJobsForResume => 7,
            TaskType::RerankResumesForJob | TaskType::RerankJobsForResume => 6,
            TaskType::FetchResumes | TaskType::FetchJobs => 5,
            TaskType::ParseResumeText | TaskType::ParseJobText => 5,
            TaskType::GenerateResumeEmbeddings | TaskType::GenerateJobEmbeddings => 4,
            TaskType::LaunchReranking | TaskType::RunFullPipeline => 3,
            TaskType::BatchMatchJobs | TaskType::BatchMatchResumes => 2,
            TaskType::CleanupEmbeddings => 1,
        }
    }

    /// Soft/hard time limits and retry ceiling.
    pub fn limits(&self) -> TaskLimits {
        match self {
            TaskType::FetchResumes | TaskType::FetchJobs => TaskLimits::new(300, 420),
            TaskType::ParseResumeText | TaskType::ParseJobText => TaskLimits::new(600, 720),
            TaskType::GenerateResumeEmbeddings
            | TaskType::GenerateJobEmbeddings
            | TaskType::CleanupEmbeddings => TaskLimits::new(600, 720),
            TaskType::MatchResumesForJob | TaskType::MatchJobsForResume => {
                TaskLimits::new(300, 360)
            }
            TaskType::RerankResumesForJob | TaskType::RerankJobsForResume => {
                TaskLimits::new(600, 720)
            }
            TaskType::BatchMatchJobs
            | TaskType::BatchMatchResumes
            | TaskType::LaunchReranking
            | TaskType::RunFullPipeline => TaskLimits::new(1800, 2100),
            TaskType::PersistAnalysis => TaskLimits {
                soft_secs: 60,
                hard_secs: 120,
                max_retries: defaults::RETRY_DELAYS_SECS.len() as i32,
            },
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::InvalidInput(format!("unknown task type: {}", s)))
    }
}

/// A task in the processing queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub task_type: TaskType,
    pub queue: TaskQueue,
    pub status: TaskStatus,
    pub priority: i32,
    pub payload: Option<JsonValue>,
    pub result: Option<JsonValue>,
    pub error_message: Option<String>,
    pub progress_percent: i32,
    pub progress_message: Option<String>,
    pub retry_count: i32,
    pub max_retries: i32,
    pub run_after: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Queue statistics summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: i64,
    pub running: i64,
    pub completed_last_hour: i64,
    pub failed_last_hour: i64,
    pub total: i64,
}
