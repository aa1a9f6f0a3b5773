//! Retrieval, reranking and deferred persistence handlers.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use tracing::{info, instrument, warn};

use hrmatch_core::{
    AnalysisRepository, DeferredAnalysis, Error, JobPostingRepository, MatchRequest, Result,
    SearchType, SubmissionRepository, TaskType,
};
use hrmatch_search::MatchingPipeline;

use crate::handler::{TaskContext, TaskHandler, TaskOutcome};

/// The job id or submission UUID the payload names for `search_type`.
fn target_id(ctx: &TaskContext, search_type: SearchType) -> Result<String> {
    match search_type {
        SearchType::JobToResumes => ctx.job_id().map(|id| id.to_string()),
        SearchType::ResumeToJobs => ctx.submission_id().map(|id| id.to_string()),
    }
}

fn single_defaults(search_type: SearchType) -> MatchRequest {
    match search_type {
        SearchType::JobToResumes => MatchRequest::for_job(),
        SearchType::ResumeToJobs => MatchRequest::for_resume(),
    }
}

/// Retrieval-only matching for one target.
pub struct MatchHandler {
    search_type: SearchType,
    pipeline: Arc<MatchingPipeline>,
}

impl MatchHandler {
    pub fn new(search_type: SearchType, pipeline: Arc<MatchingPipeline>) -> Self {
        Self {
            search_type,
            pipeline,
        }
    }
}

#[async_trait]
impl TaskHandler for MatchHandler {
    fn task_type(&self) -> TaskType {
        match self.search_type {
            SearchType::JobToResumes => TaskType::MatchResumesForJob,
            SearchType::ResumeToJobs => TaskType::MatchJobsForResume,
        }
    }

    #[instrument(
        skip(self, ctx),
        fields(subsystem = "tasks", component = "match", op = "execute")
    )]
    async fn execute(&self, ctx: TaskContext) -> TaskOutcome {
        let request = ctx.match_request(single_defaults(self.search_type));
        let target = target_id(&ctx, self.search_type);
        let (request, target) = match (request, target) {
            (Ok(request), Ok(target)) => (request, target),
            (Err(e), _) | (_, Err(e)) => return TaskOutcome::from_error(&e),
        };

        let result = self
            .pipeline
            .retriever()
            .find(self.search_type, &target, request)
            .await;
        TaskOutcome::from_result(result)
    }
}

/// Sequential retrieval over many targets.
///
/// Targets come from the payload's `job_ids` / `submission_ids`, or every
/// active job / resume with text when absent.
pub struct BatchMatchHandler {
    search_type: SearchType,
    pipeline: Arc<MatchingPipeline>,
    submissions: Arc<dyn SubmissionRepository>,
    postings: Arc<dyn JobPostingRepository>,
}

impl BatchMatchHandler {
    pub fn new(
        search_type: SearchType,
        pipeline: Arc<MatchingPipeline>,
        submissions: Arc<dyn SubmissionRepository>,
        postings: Arc<dyn JobPostingRepository>,
    ) -> Self {
        Self {
            search_type,
            pipeline,
            submissions,
            postings,
        }
    }

    async fn targets(&self, ctx: &TaskContext) -> Result<Vec<String>> {
        let key = match self.search_type {
            SearchType::JobToResumes => "job_ids",
            SearchType::ResumeToJobs => "submission_ids",
        };
        if let Some(listed) = ctx.payload().and_then(|p| p.get(key)) {
            let items = listed
                .as_array()
                .ok_or_else(|| Error::InvalidInput(format!("{} must be a list", key)))?;
            return items
                .iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => Ok(s.trim().to_string()),
                    serde_json::Value::Number(n) => Ok(n.to_string()),
                    other => Err(Error::InvalidInput(format!("invalid id in {}: {}", key, other))),
                })
                .collect();
        }

        Ok(match self.search_type {
            SearchType::JobToResumes => self
                .postings
                .list_active_with_text(None)
                .await?
                .into_iter()
                .map(|p| p.job_id.to_string())
                .collect(),
            SearchType::ResumeToJobs => self
                .submissions
                .list_with_text(None)
                .await?
                .into_iter()
                .map(|s| s.submission_id.to_string())
                .collect(),
        })
    }
}

#[async_trait]
impl TaskHandler for BatchMatchHandler {
    fn task_type(&self) -> TaskType {
        match self.search_type {
            SearchType::JobToResumes => TaskType::BatchMatchJobs,
            SearchType::ResumeToJobs => TaskType::BatchMatchResumes,
        }
    }

    #[instrument(
        skip(self, ctx),
        fields(subsystem = "tasks", component = "batch_match", op = "execute")
    )]
    async fn execute(&self, ctx: TaskContext) -> TaskOutcome {
        let start = Instant::now();
        let request = match ctx.match_request(MatchRequest::batch()) {
            Ok(request) => request,
            Err(e) => return TaskOutcome::from_error(&e),
        };
        let targets = match self.targets(&ctx).await {
            Ok(targets) => targets,
            Err(e) => return TaskOutcome::from_error(&e),
        };

        ctx.report_progress(10, Some(&format!("Matching {} targets...", targets.len())));
        let result = self
            .pipeline
            .retriever()
            .find_batch(self.search_type, &targets, request)
            .await;

        info!(
            search_type = self.search_type.as_str(),
            total = result.total_processed,
            successful = result.successful,
            failed = result.failed,
            duration_ms = start.elapsed().as_millis() as u64,
            "Batch retrieval complete"
        );
        ctx.report_progress(100, Some("Batch matching complete"));
        TaskOutcome::from_result(Ok(result))
    }
}

/// Search, rerank and persist for one target.
pub struct RerankHandler {
    search_type: SearchType,
    pipeline: Arc<MatchingPipeline>,
}

impl RerankHandler {
    pub fn new(search_type: SearchType, pipeline: Arc<MatchingPipeline>) -> Self {
        Self {
            search_type,
            pipeline,
        }
    }
}

#[async_trait]
impl TaskHandler for RerankHandler {
    fn task_type(&self) -> TaskType {
        match self.search_type {
            SearchType::JobToResumes => TaskType::RerankResumesForJob,
            SearchType::ResumeToJobs => TaskType::RerankJobsForResume,
        }
    }

    #[instrument(
        skip(self, ctx),
        fields(subsystem = "tasks", component = "rerank", op = "execute")
    )]
    async fn execute(&self, ctx: TaskContext) -> TaskOutcome {
        let request = ctx.match_request(single_defaults(self.search_type));
        let target = target_id(&ctx, self.search_type);
        let (request, target) = match (request, target) {
            (Ok(request), Ok(target)) => (request, target),
            (Err(e), _) | (_, Err(e)) => return TaskOutcome::from_error(&e),
        };

        ctx.report_progress(10, Some("Searching and reranking..."));
        let outcome = match self.pipeline.run(self.search_type, &target, request).await {
            Ok(outcome) => outcome,
            Err(e) => return TaskOutcome::from_error(&e),
        };

        // A reranker outage is retried; the retrieval order is not stored.
        if outcome.is_degraded() && outcome.rerank_retryable {
            let error = outcome.rerank_error.clone().unwrap_or_default();
            warn!(
                target_id = %target,
                error = %error,
                "Reranker unavailable, task will be retried"
            );
            return TaskOutcome::RetryableError(format!("Reranking unavailable: {}", error));
        }

        ctx.report_progress(100, Some("Reranking complete"));
        TaskOutcome::from_result(Ok(outcome))
    }
}

/// Writes analysis rows whose first write failed, then completes their session.
pub struct PersistAnalysisHandler {
    analysis: Arc<dyn AnalysisRepository>,
}

impl PersistAnalysisHandler {
    pub fn new(analysis: Arc<dyn AnalysisRepository>) -> Self {
        Self { analysis }
    }

    async fn persist(&self, deferred: DeferredAnalysis) -> Result<JsonValue> {
        let DeferredAnalysis {
            session,
            session_stats,
            mut results,
        } = deferred;

        let session_id = match &session {
            Some(session) => Some(self.analysis.create_session(session).await?),
            None => None,
        };
        if let Some(id) = session_id {
            for row in results.iter_mut().filter(|r| r.session_id.is_none()) {
                row.session_id = Some(id);
            }
        }

        let inserted = self.analysis.insert_results(&results).await?;
        if let Some(id) = session_id {
            self.analysis
                .complete_session(id, results.len() as i32, session_stats)
                .await?;
        }

        info!(
            submitted = results.len(),
            inserted,
            session_id,
            "Deferred analysis results stored"
        );
        Ok(json!({
            "submitted": results.len(),
            "inserted": inserted,
            "session_id": session_id,
        }))
    }
}

#[async_trait]
impl TaskHandler for PersistAnalysisHandler {
    fn task_type(&self) -> TaskType {
        TaskType::PersistAnalysis
    }

    #[instrument(
        skip(self, ctx),
        fields(subsystem = "tasks", component = "persist", op = "execute")
    )]
    async fn execute(&self, ctx: TaskContext) -> TaskOutcome {
        let deferred: DeferredAnalysis = match ctx.payload_as() {
            Ok(deferred) => deferred,
            Err(e) => return TaskOutcome::from_error(&e),
        };
        if deferred.results.is_empty() {
            return TaskOutcome::Ok(Some(json!({"submitted": 0, "inserted": 0})));
        }
        TaskOutcome::from_result(self.persist(deferred).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::test_task;
    use uuid::Uuid;

    #[test]
    fn test_target_id_by_direction() {
        let id = Uuid::new_v4();
        let ctx = TaskContext::new(test_task(
            TaskType::RerankJobsForResume,
            Some(json!({"job_id": 4, "submission_id": id.to_string()})),
        ));
        assert_eq!(target_id(&ctx, SearchType::JobToResumes).unwrap(), "4");
        assert_eq!(
            target_id(&ctx, SearchType::ResumeToJobs).unwrap(),
            id.to_string()
        );
    }

    #[test]
    fn test_single_defaults_differ_by_direction() {
        assert_eq!(single_defaults(SearchType::JobToResumes), MatchRequest::for_job());
        assert_eq!(single_defaults(SearchType::ResumeToJobs), MatchRequest::for_resume());
    }

    #[test]
    fn test_deferred_payload_defaults_to_empty() {
        let deferred: DeferredAnalysis = serde_json::from_value(json!({})).unwrap();
        assert!(deferred.session.is_none());
        assert!(deferred.results.is_empty());
    }
}
