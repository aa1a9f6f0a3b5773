//! Search → rerank → persist.
//!
//! ```text
//! search ──err──▶ error (retryable when upstream is unavailable)
//!   │
//!   ▼
//! rerank ──err──▶ degraded: retrieval order, reranked = false
//!   │
//!   ▼
//! persist ──err──▶ logged, persist_analysis task enqueued
//!   │
//!   ▼
//! ranked results
//! ```
//!
//! Each run opens its own analysis session and stamps every row with one
//! `processed_at`, so repeated runs never overwrite each other.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use hrmatch_core::{
    defaults, AnalysisRepository, BlendedScore, DeferredAnalysis, MatchRequest,
    NewAnalysisResult, NewAnalysisSession, NewTask, Result, SearchParams, SearchType,
    TaskRepository, TaskType, WorkflowStats,
};

use crate::rerank::{RerankOutput, RerankStage, RerankedMatch};
use crate::retrieval::{
    MatchedEntity, RetrievalResult, RetrievalStatistics, RetrievalStatus, RetrievedMatch,
    Retriever,
};

/// One entry of a pipeline ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineMatch {
    pub rank_position: usize,
    pub entity: MatchedEntity,
    pub document_id: String,
    pub similarity: f32,
    /// Absent when reranking was skipped or failed
    pub score: Option<BlendedScore>,
    pub snippet: Option<String>,
}

impl PipelineMatch {
    fn reranked(m: RerankedMatch) -> Self {
        Self {
            rank_position: m.rank_position,
            entity: m.matched.entity,
            document_id: m.matched.document_id,
            similarity: m.matched.similarity,
            score: Some(m.score),
            snippet: m.matched.snippet,
        }
    }

    fn retrieved(position: usize, m: RetrievedMatch) -> Self {
        Self {
            rank_position: position,
            entity: m.entity,
            document_id: m.document_id,
            similarity: m.similarity,
            score: None,
            snippet: m.snippet,
        }
    }
}

/// What happened to the ranking's analysis rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PersistStatus {
    /// Nothing to store (no matches, or reranking did not run)
    Skipped,
    Persisted { session_id: i64, inserted: u64 },
    /// Write failed; rows handed to a `persist_analysis` task
    Deferred { task_id: Uuid, error: String },
    /// Write failed and could not be deferred
    Failed { error: String },
}

/// Result of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchOutcome {
    pub search_type: SearchType,
    pub status: RetrievalStatus,
    pub target: Option<MatchedEntity>,
    pub matches: Vec<PipelineMatch>,
    /// Validated retrieval matches before reranking
    pub total_found: usize,
    pub reranked: bool,
    pub rerank_error: Option<String>,
    /// Whether the rerank failure was an outage worth retrying
    pub rerank_retryable: bool,
    pub reranker_model: String,
    pub search_params: SearchParams,
    pub statistics: RetrievalStatistics,
    pub persist: PersistStatus,
    pub processed_at: DateTime<Utc>,
    pub message: String,
}

impl MatchOutcome {
    pub fn is_degraded(&self) -> bool {
        self.rerank_error.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMatchItem {
    pub target_id: String,
    pub outcome: Option<MatchOutcome>,
    pub error: Option<String>,
}

/// Per-target outcomes of a sequential batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchMatchReport {
    pub search_type: SearchType,
    pub total_processed: usize,
    pub successful: usize,
    pub failed: usize,
    /// Successful runs that fell back to retrieval order
    pub degraded: usize,
    pub items: Vec<BatchMatchItem>,
    pub processed_at: DateTime<Utc>,
}

/// Two-stage matching with persistence.
pub struct MatchingPipeline {
    retriever: Retriever,
    rerank: RerankStage,
    analysis: Arc<dyn AnalysisRepository>,
    tasks: Option<Arc<dyn TaskRepository>>,
    batch_delay: Duration,
}

impl MatchingPipeline {
    pub fn new(
        retriever: Retriever,
        rerank: RerankStage,
        analysis: Arc<dyn AnalysisRepository>,
    ) -> Self {
        Self {
            retriever,
            rerank,
            analysis,
            tasks: None,
            batch_delay: Duration::from_millis(defaults::BATCH_ITEM_DELAY_MS),
        }
    }

    /// Enables deferring failed writes to a `persist_analysis` task.
    pub fn with_task_repository(mut self, tasks: Arc<dyn TaskRepository>) -> Self {
        self.tasks = Some(tasks);
        self
    }

    pub fn with_batch_delay(mut self, delay: Duration) -> Self {
        self.batch_delay = delay;
        self
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    pub fn rerank_stage(&self) -> &RerankStage {
        &self.rerank
    }

    pub async fn run_for_job(&self, job_id: i32, request: MatchRequest) -> Result<MatchOutcome> {
        self.run(SearchType::JobToResumes, &job_id.to_string(), request)
            .await
    }

    pub async fn run_for_resume(
        &self,
        submission_id: Uuid,
        request: MatchRequest,
    ) -> Result<MatchOutcome> {
        self.run(SearchType::ResumeToJobs, &submission_id.to_string(), request)
            .await
    }

    #[instrument(
        skip(self, request),
        fields(
            subsystem = "search",
            component = "pipeline",
            op = "run",
            search_type = search_type.as_str(),
            target_id = %target_id,
        )
    )]
    pub async fn run(
        &self,
        search_type: SearchType,
        target_id: &str,
        request: MatchRequest,
    ) -> Result<MatchOutcome> {
        let retrieval = self.retriever.find(search_type, target_id, request).await?;
        let reranker_model = self.rerank.model_name().to_string();

        if !retrieval.is_completed() || retrieval.matches.is_empty() {
            info!(status = retrieval.status.as_str(), "Nothing to rerank");
            return Ok(self.unranked_outcome(retrieval, request, reranker_model, None));
        }

        let query = retrieval
            .target
            .as_ref()
            .map(|t| t.text.clone())
            .unwrap_or_default();

        let output = match self
            .rerank
            .rerank(
                &query,
                retrieval.matches.clone(),
                request.top_k,
                request.min_rerank_score,
            )
            .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!(
                    degraded = true,
                    retryable = e.is_retryable(),
                    error = %e,
                    "Rerank failed, returning retrieval order"
                );
                return Ok(self.unranked_outcome(retrieval, request, reranker_model, Some(e)));
            }
        };

        let processed_at = Utc::now();
        let search_params = SearchParams {
            top_k: request.top_k,
            min_similarity: request.min_similarity,
            min_rerank_score: request.min_rerank_score,
            search_type,
            query_text_length: output.query_text_length,
            original_text_length: output.original_text_length,
            text_truncated: output.text_truncated,
        };

        let persist = if output.matches.is_empty() {
            PersistStatus::Skipped
        } else {
            self.persist(&retrieval, &output, &search_params, processed_at)
                .await
        };

        let matches: Vec<PipelineMatch> = output
            .matches
            .into_iter()
            .map(PipelineMatch::reranked)
            .collect();
        info!(
            total_found = retrieval.total_found,
            result_count = matches.len(),
            "Matching run complete"
        );

        Ok(MatchOutcome {
            search_type,
            status: retrieval.status,
            target: retrieval.target.map(|t| t.entity),
            total_found: retrieval.total_found,
            message: format!(
                "Reranked {} of {} candidates",
                matches.len(),
                retrieval.total_found
            ),
            matches,
            reranked: true,
            rerank_error: None,
            rerank_retryable: false,
            reranker_model,
            search_params,
            statistics: retrieval.statistics,
            persist,
            processed_at,
        })
    }

    /// Run every job in turn, pausing between items.
    pub async fn run_batch_for_jobs(
        &self,
        job_ids: &[i32],
        request: MatchRequest,
    ) -> BatchMatchReport {
        let ids: Vec<String> = job_ids.iter().map(|id| id.to_string()).collect();
        self.run_batch(SearchType::JobToResumes, &ids, request).await
    }

    pub async fn run_batch_for_resumes(
        &self,
        submission_ids: &[Uuid],
        request: MatchRequest,
    ) -> BatchMatchReport {
        let ids: Vec<String> = submission_ids.iter().map(|id| id.to_string()).collect();
        self.run_batch(SearchType::ResumeToJobs, &ids, request).await
    }

    async fn run_batch(
        &self,
        search_type: SearchType,
        target_ids: &[String],
        request: MatchRequest,
    ) -> BatchMatchReport {
        let mut report = BatchMatchReport {
            search_type,
            total_processed: target_ids.len(),
            successful: 0,
            failed: 0,
            degraded: 0,
            items: Vec::with_capacity(target_ids.len()),
            processed_at: Utc::now(),
        };

        for (i, target_id) in target_ids.iter().enumerate() {
            if i > 0 && !self.batch_delay.is_zero() {
                tokio::time::sleep(self.batch_delay).await;
            }
            match self.run(search_type, target_id, request).await {
                Ok(outcome) => {
                    report.successful += 1;
                    if outcome.is_degraded() {
                        report.degraded += 1;
                    }
                    report.items.push(BatchMatchItem {
                        target_id: target_id.clone(),
                        outcome: Some(outcome),
                        error: None,
                    });
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(
                        subsystem = "search",
                        component = "pipeline",
                        target_id = %target_id,
                        error = %e,
                        "Batch item failed"
                    );
                    report.items.push(BatchMatchItem {
                        target_id: target_id.clone(),
                        outcome: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        info!(
            subsystem = "search",
            component = "pipeline",
            op = "run_batch",
            search_type = search_type.as_str(),
            total = report.total_processed,
            successful = report.successful,
            failed = report.failed,
            degraded = report.degraded,
            "Batch matching complete"
        );
        report.processed_at = Utc::now();
        report
    }

    /// Outcome for runs that stop before (or fail during) reranking.
    fn unranked_outcome(
        &self,
        retrieval: RetrievalResult,
        request: MatchRequest,
        reranker_model: String,
        rerank_error: Option<hrmatch_core::Error>,
    ) -> MatchOutcome {
        let text_length = retrieval.target.as_ref().map_or(0, |t| t.text_length);
        let search_params = SearchParams {
            top_k: request.top_k,
            min_similarity: request.min_similarity,
            min_rerank_score: request.min_rerank_score,
            search_type: retrieval.search_params.search_type,
            query_text_length: text_length,
            original_text_length: text_length,
            text_truncated: false,
        };
        let message = match &rerank_error {
            Some(e) => format!("Reranking unavailable, retrieval order returned: {}", e),
            None => retrieval.message.clone(),
        };
        let matches = retrieval
            .matches
            .into_iter()
            .enumerate()
            .map(|(i, m)| PipelineMatch::retrieved(i + 1, m))
            .collect();

        MatchOutcome {
            search_type: retrieval.search_params.search_type,
            status: retrieval.status,
            target: retrieval.target.map(|t| t.entity),
            matches,
            total_found: retrieval.total_found,
            reranked: false,
            rerank_retryable: rerank_error.as_ref().is_some_and(|e| e.is_retryable()),
            rerank_error: rerank_error.map(|e| e.to_string()),
            reranker_model,
            search_params,
            statistics: retrieval.statistics,
            persist: PersistStatus::Skipped,
            processed_at: retrieval.processed_at,
            message,
        }
    }

    async fn persist(
        &self,
        retrieval: &RetrievalResult,
        output: &RerankOutput,
        search_params: &SearchParams,
        processed_at: DateTime<Utc>,
    ) -> PersistStatus {
        let search_type = search_params.search_type;
        let Some(target) = retrieval.target.as_ref().map(|t| &t.entity) else {
            return PersistStatus::Skipped;
        };

        let params_json = serde_json::to_value(search_params).unwrap_or_default();
        let workflow_stats = WorkflowStats {
            total_candidates_found: retrieval.total_found,
            reranked_candidates: output.matches.len(),
            processing_time: processed_at,
            collection: search_type.candidate_source().collection().to_string(),
        };
        let stats_json = serde_json::to_value(&workflow_stats).unwrap_or_default();

        let (job_id, submission_id, company_id) = match target {
            MatchedEntity::Job {
                job_id, company_id, ..
            } => (Some(*job_id), None, Some(*company_id)),
            MatchedEntity::Resume { submission_id, .. } => (None, Some(*submission_id), None),
        };
        let session = NewAnalysisSession {
            session_uuid: Uuid::new_v4(),
            job_id,
            submission_id,
            company_id,
            analysis_type: search_type.analysis_type().to_string(),
            search_params: params_json.clone(),
            reranker_model: output.model.clone(),
            started_at: processed_at,
        };

        let session_id = match self.analysis.create_session(&session).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!(
                    subsystem = "search",
                    component = "pipeline",
                    error = %e,
                    "Failed to open analysis session"
                );
                None
            }
        };

        let rows: Vec<NewAnalysisResult> = output
            .matches
            .iter()
            .filter_map(|m| {
                analysis_row(
                    target,
                    m,
                    session_id,
                    &params_json,
                    &stats_json,
                    &output.model,
                    search_type,
                    retrieval.total_found,
                    processed_at,
                )
            })
            .collect();

        let session_stats = json!({
            "reranked_candidates": rows.len(),
            "total_candidates_found": retrieval.total_found,
            "below_min_score": output.below_min_score,
            "out_of_range": output.out_of_range,
        });

        let write = async {
            let session_id = session_id.ok_or_else(|| {
                hrmatch_core::Error::Internal("analysis session not created".into())
            })?;
            let inserted = self.analysis.insert_results(&rows).await?;
            self.analysis
                .complete_session(session_id, rows.len() as i32, session_stats.clone())
                .await?;
            Ok::<_, hrmatch_core::Error>((session_id, inserted))
        };

        let written = write.await;
        match written {
            Ok((session_id, inserted)) => {
                info!(
                    subsystem = "search",
                    component = "pipeline",
                    session_id,
                    inserted,
                    "Analysis results stored"
                );
                PersistStatus::Persisted {
                    session_id,
                    inserted,
                }
            }
            Err(e) => {
                error!(
                    subsystem = "search",
                    component = "pipeline",
                    error = %e,
                    row_count = rows.len(),
                    "Failed to store analysis results"
                );
                let deferred = DeferredAnalysis {
                    session: Some(session),
                    session_stats,
                    results: rows,
                };
                self.defer(deferred, e.to_string()).await
            }
        }
    }

    async fn defer(&self, deferred: DeferredAnalysis, error: String) -> PersistStatus {
        let Some(tasks) = &self.tasks else {
            return PersistStatus::Failed { error };
        };
        let payload = match serde_json::to_value(&deferred) {
            Ok(payload) => payload,
            Err(e) => {
                return PersistStatus::Failed {
                    error: format!("{}; payload encoding failed: {}", error, e),
                }
            }
        };
        match tasks
            .enqueue(NewTask::new(TaskType::PersistAnalysis).with_payload(payload))
            .await
        {
            Ok(task_id) => {
                warn!(
                    subsystem = "search",
                    component = "pipeline",
                    task_id = %task_id,
                    row_count = deferred.results.len(),
                    "Deferred analysis write to persist_analysis task"
                );
                PersistStatus::Deferred { task_id, error }
            }
            Err(enqueue_err) => {
                error!(
                    subsystem = "search",
                    component = "pipeline",
                    error = %enqueue_err,
                    "Failed to enqueue persist_analysis task"
                );
                PersistStatus::Failed {
                    error: format!("{}; enqueue failed: {}", error, enqueue_err),
                }
            }
        }
    }
}

/// Build the stored row for one (target, match) pair.
#[allow(clippy::too_many_arguments)]
fn analysis_row(
    target: &MatchedEntity,
    ranked: &RerankedMatch,
    session_id: Option<i64>,
    search_params: &serde_json::Value,
    workflow_stats: &serde_json::Value,
    model: &str,
    search_type: SearchType,
    total_found: usize,
    processed_at: DateTime<Utc>,
) -> Option<NewAnalysisResult> {
    let (job, resume) = match (target, &ranked.matched.entity) {
        (job @ MatchedEntity::Job { .. }, resume @ MatchedEntity::Resume { .. }) => (job, resume),
        (resume @ MatchedEntity::Resume { .. }, job @ MatchedEntity::Job { .. }) => (job, resume),
        _ => return None,
    };
    let MatchedEntity::Job {
        job_id,
        title,
        company_id,
    } = job
    else {
        return None;
    };
    let MatchedEntity::Resume {
        submission_id,
        candidate_name,
        candidate_email,
        ..
    } = resume
    else {
        return None;
    };

    let score = ranked.score;
    Some(NewAnalysisResult {
        session_id,
        job_id: *job_id,
        submission_id: *submission_id,
        original_similarity: score.similarity as f64,
        rerank_score: score.raw_rerank as f64,
        final_score: score.final_score as f64,
        score_improvement: score.improvement as f64,
        rank_position: ranked.rank_position as i32,
        search_params: search_params.clone(),
        reranker_model: model.to_string(),
        workflow_stats: workflow_stats.clone(),
        job_title: Some(title.clone()),
        company_id: Some(*company_id),
        candidate_name: Some(candidate_name.clone()),
        candidate_email: candidate_email.clone(),
        total_candidates_found: total_found as i32,
        analysis_type: search_type.analysis_type().to_string(),
        processed_at,
    })
}
